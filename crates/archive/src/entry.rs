//! Classifying walked entries and building their tar headers

use crate::ownership;
use filetime::FileTime;
use keepsake_core::paths;
use std::fs::{FileType, Metadata};
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};

/// What a walked entry becomes in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    /// Devices, pipes, sockets: logged and skipped
    Unsupported(&'static str),
}

impl EntryKind {
    pub fn of(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Unsupported(special_name(file_type))
        }
    }
}

#[cfg(unix)]
fn special_name(file_type: FileType) -> &'static str {
    use std::os::unix::fs::FileTypeExt;
    if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else if file_type.is_fifo() {
        "named pipe"
    } else if file_type.is_socket() {
        "socket"
    } else {
        "unknown"
    }
}

#[cfg(not(unix))]
fn special_name(_file_type: FileType) -> &'static str {
    "unknown"
}

/// Entry name for an absolute path: the path without its root
///
/// The root itself has no name and is not archived.
pub fn entry_name(path: &Path) -> Option<PathBuf> {
    let name = paths::strip_root(path);
    if name.as_os_str().is_empty() {
        None
    } else {
        Some(name)
    }
}

/// The archived path an entry name stands for
pub fn archived_path(name: &Path) -> PathBuf {
    Path::new("/").join(name)
}

/// Modification time in whole seconds since the epoch
pub fn mtime_secs(meta: &Metadata) -> i64 {
    FileTime::from_last_modification_time(meta).unix_seconds()
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

/// A GNU header carrying mode, mtime, size and (where available) ids
///
/// The path and checksum are filled in by the tar builder when appending.
pub fn header_for(meta: &Metadata, kind: EntryType, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(permission_bits(meta));
    header.set_mtime(mtime_secs(meta).max(0) as u64);
    if let Some((uid, gid)) = ownership::assign_ids(meta) {
        header.set_uid(uid as u64);
        header.set_gid(gid as u64);
    }
    header
}
