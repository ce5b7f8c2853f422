//! Owner and group transfer
//!
//! On Unix the numeric ids travel in the tar header and are reapplied on
//! restore. Elsewhere nothing is recorded and restoring is a no-op.

use std::fs::Metadata;
use std::io;
use std::path::Path;

/// The `(uid, gid)` to record for an entry, if the platform has them
#[cfg(unix)]
pub fn assign_ids(meta: &Metadata) -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
pub fn assign_ids(_meta: &Metadata) -> Option<(u32, u32)> {
    None
}

/// Reapply recorded ids without following a final symlink
#[cfg(unix)]
pub fn restore_ownership(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    std::os::unix::fs::lchown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
pub fn restore_ownership(_path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
    Ok(())
}
