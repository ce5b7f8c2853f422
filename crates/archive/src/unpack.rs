//! Restoring and testing a job's archives
//!
//! Every archive of the job is read in edition order, so later editions
//! overwrite what earlier ones restored. Each entry's archived path is
//! `/` + its entry name; the filter chain sees that path, the replacement
//! chain rewrites it, and an optional prefix relocates the result.

use crate::entry;
use crate::job::RunningJob;
use crate::ownership;
use filetime::FileTime;
use flate2::read::GzDecoder;
use keepsake_core::paths;
use keepsake_core::{Codec, Error, Result};
use keepsake_filter::{Filters, Replacements};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, Entry, Header};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnpackMode {
    /// Write entries to disk
    #[default]
    Restore,
    /// Decrypt and list entries without writing anything
    Test,
}

/// Settings for one restore or test run
#[derive(Debug, Clone, Default)]
pub struct UnpackContext {
    pub filters: Filters,
    pub replacements: Replacements,
    pub prefix: Option<PathBuf>,
    pub mode: UnpackMode,
}

impl UnpackContext {
    /// Where an archived path lands after replacements and prefix
    pub fn target_for(&self, archived: &Path) -> PathBuf {
        let replaced = PathBuf::from(self.replacements.replace(&archived.to_string_lossy()));
        match &self.prefix {
            Some(prefix) => prefix.join(paths::strip_root(&replaced)),
            None => replaced,
        }
    }
}

/// What one job's restore or test did
#[derive(Debug, Clone, Default)]
pub struct UnpackSummary {
    pub archives: usize,
    pub entries: usize,
    pub filtered: usize,
    pub failures: usize,
    /// Resolved target of every matching entry, in archive order; filled
    /// in test mode only
    pub listed: Vec<PathBuf>,
}

/// Directory metadata applied once an archive's files are in place
struct PendingDir {
    target: PathBuf,
    header: Header,
}

impl RunningJob {
    /// Restore or test every archive of this job, oldest first
    ///
    /// A stream that fails to decrypt or decode aborts the job. Entries that
    /// fail individually are logged; if any did, the run ends with
    /// [`Error::AggregateRestoreErrors`].
    pub fn unpack(&self, ctx: &UnpackContext) -> Result<UnpackSummary> {
        let codec = self.codec();
        let archives = self.archive_set()?;
        let mut summary = UnpackSummary::default();

        if ctx.mode == UnpackMode::Restore {
            if let Some(prefix) = &ctx.prefix {
                fs::create_dir_all(prefix)?;
            }
        }

        for archive in archives.iter() {
            info!(job = %self.name(), archive = %archive.path.display(), mode = ?ctx.mode, "reading archive");
            unpack_archive(&codec, &archive.path, ctx, &mut summary)?;
            summary.archives += 1;
        }

        info!(
            job = %self.name(),
            archives = summary.archives,
            entries = summary.entries,
            failures = summary.failures,
            "unpack complete"
        );
        if summary.failures > 0 {
            return Err(Error::AggregateRestoreErrors(summary.failures));
        }
        Ok(summary)
    }
}

fn unpack_archive(
    codec: &Codec,
    path: &Path,
    ctx: &UnpackContext,
    summary: &mut UnpackSummary,
) -> Result<()> {
    let plain = codec.wrap_reader(BufReader::new(File::open(path)?))?;
    let mut archive = Archive::new(GzDecoder::new(plain));
    let mut pending = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.into_owned();
        if paths::has_parent_dir(&name) {
            warn!(entry = %name.display(), "refusing entry that climbs out of its root");
            summary.failures += 1;
            continue;
        }
        let archived = entry::archived_path(&name);
        if !ctx.filters.include(&archived) {
            summary.filtered += 1;
            continue;
        }
        let target = ctx.target_for(&archived);
        summary.entries += 1;

        match ctx.mode {
            UnpackMode::Test => {
                info!(path = %target.display(), "ok");
                summary.listed.push(target);
            }
            UnpackMode::Restore => match restore_entry(&mut entry, &target, &mut pending) {
                Ok(()) => debug!(path = %target.display(), "restored"),
                Err(e) => {
                    warn!(path = %target.display(), "restore failed: {}", e);
                    summary.failures += 1;
                }
            },
        }
    }

    // Deepest first, so a read-only parent does not block its children.
    for dir in pending.iter().rev() {
        if let Err(e) = apply_metadata(&dir.target, &dir.header) {
            warn!(path = %dir.target.display(), "directory metadata not restored: {}", e);
            summary.failures += 1;
        }
    }

    // Read through the gzip trailer and the codec's final chunk so that
    // truncation or tampering after the last tar block is still caught.
    let mut gz = archive.into_inner();
    io::copy(&mut gz, &mut io::sink())?;
    io::copy(&mut gz.into_inner(), &mut io::sink())?;
    Ok(())
}

fn restore_entry<R: Read>(
    entry: &mut Entry<'_, R>,
    target: &Path,
    pending: &mut Vec<PendingDir>,
) -> Result<()> {
    let header = entry.header().clone();
    let kind = header.entry_type();

    if kind.is_dir() {
        fs::create_dir_all(target)?;
        pending.push(PendingDir {
            target: target.to_path_buf(),
            header,
        });
        return Ok(());
    }

    if kind.is_symlink() {
        let link = entry
            .link_name()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "symlink without target"))?
            .into_owned();
        ensure_parent(target)?;
        if fs::symlink_metadata(target).is_ok_and(|meta| !meta.is_dir()) {
            fs::remove_file(target)?;
        }
        make_symlink(&link, target)?;
    } else if kind.is_file() {
        ensure_parent(target)?;
        if fs::symlink_metadata(target).is_ok_and(|meta| meta.file_type().is_symlink()) {
            fs::remove_file(target)?;
        }
        let mut out = File::create(target)?;
        io::copy(entry, &mut out)?;
        out.sync_all()?;
    } else {
        debug!(path = %target.display(), kind = ?kind, "skipping unsupported entry");
        return Ok(());
    }

    apply_metadata(target, &header)
}

/// Permissions, then ownership (best effort), then modification time
fn apply_metadata(target: &Path, header: &Header) -> Result<()> {
    let is_symlink = header.entry_type().is_symlink();
    if !is_symlink {
        set_mode(target, header.mode()?)?;
    }

    if let (Ok(uid), Ok(gid)) = (header.uid(), header.gid()) {
        if let (Ok(uid), Ok(gid)) = (u32::try_from(uid), u32::try_from(gid)) {
            if let Err(e) = ownership::restore_ownership(target, uid, gid) {
                debug!(path = %target.display(), "ownership not restored: {}", e);
            }
        }
    }

    let mtime = FileTime::from_unix_time(i64::try_from(header.mtime()?).unwrap_or(i64::MAX), 0);
    if is_symlink {
        filetime::set_symlink_file_times(target, mtime, mtime)?;
    } else {
        filetime::set_file_mtime(target, mtime)?;
    }
    Ok(())
}

fn ensure_parent(target: &Path) -> io::Result<()> {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(target: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(target: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(target)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(target, perms)
}

#[cfg(unix)]
fn make_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn make_symlink(_link: &Path, _target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not restored on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_filter::{Rule, Scope};

    #[test]
    fn test_target_plain() {
        let ctx = UnpackContext::default();
        assert_eq!(ctx.target_for(Path::new("/data/a.txt")), PathBuf::from("/data/a.txt"));
    }

    #[test]
    fn test_target_with_prefix() {
        let ctx = UnpackContext {
            prefix: Some(PathBuf::from("/restore")),
            ..Default::default()
        };
        assert_eq!(
            ctx.target_for(Path::new("/data/a.txt")),
            PathBuf::from("/restore/data/a.txt")
        );
    }

    #[test]
    fn test_target_replaces_before_prefix() {
        let mut replacements = Replacements::new();
        replacements.push(Rule::new(Scope::Prefix, "/data", "/srv"));
        let ctx = UnpackContext {
            replacements,
            prefix: Some(PathBuf::from("/restore")),
            ..Default::default()
        };
        assert_eq!(
            ctx.target_for(Path::new("/data/a.txt")),
            PathBuf::from("/restore/srv/a.txt")
        );
    }
}
