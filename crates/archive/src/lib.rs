//! Keepsake archive orchestration
//!
//! This crate ties the ledger, the filters and the codecs together:
//! - `job`: job files and the per-run `RunningJob`
//! - `names`: the archive set of a job, ordered by edition
//! - `backup`: directory walk into a new encrypted archive
//! - `unpack`: restore or test every archive of a job in edition order
//! - `ownership`: owner/group transfer where the platform has it

pub mod backup;
pub mod entry;
pub mod job;
pub mod names;
pub mod ownership;
pub mod unpack;

// Re-exports
pub use backup::{BackupContext, BackupSummary};
pub use job::{load_jobs, shared_excludes, Job, RunningJob};
pub use names::{ArchiveName, ArchiveSet};
pub use unpack::{UnpackContext, UnpackMode, UnpackSummary};
