//! Content-seen ledger
//!
//! This crate provides:
//! - `SeenStore`: the per-job table of (path, edition) -> (mtime, hash)
//!   deciding which regular files a backup has to archive
//! - `Session`: the single long-lived transaction a store runs in
//!
//! The ledger lives on disk encrypted with the job's codec. While a store is
//! open the plaintext database exists only as a private temporary file.

pub mod session;
pub mod store;

// Re-exports
pub use session::Session;
pub use store::{SeenRecord, SeenStore, Update};

/// File name suffix appended to a job's base name for its ledger
pub const LEDGER_SUFFIX: &str = "_seen.db";
