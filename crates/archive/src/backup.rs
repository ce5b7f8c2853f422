//! Backing a job up into a new archive
//!
//! The archive is a tar stream, gzip-compressed, sealed by the job's codec:
//!
//! ```text
//! walk -> tar::Builder -> GzEncoder -> CodecWriter -> BufWriter<File>
//! ```
//!
//! Directories and symlinks are written on every run. Regular files are
//! written only when the ledger says they changed since the last edition.

use crate::entry::{self, EntryKind};
use crate::job::RunningJob;
use flate2::write::GzEncoder;
use flate2::Compression;
use keepsake_core::paths;
use keepsake_core::{hash_file, Edition, Error, Result};
use keepsake_filter::{escape_pattern, Filters};
use keepsake_ledger::{SeenStore, Update};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Settings shared by every job of one backup run
#[derive(Debug, Clone, Default)]
pub struct BackupContext {
    /// Chain built from the command line
    pub filters: Filters,
    /// Escaped patterns for files any job writes
    pub shared_excludes: Vec<String>,
    /// Roll history back to this edition before writing
    pub remove_after: Option<Edition>,
}

/// What one job's backup did
#[derive(Debug, Clone, Default)]
pub struct BackupSummary {
    pub archive: PathBuf,
    pub archived: usize,
    pub unchanged: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed_archives: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Archived,
    Unchanged,
    Directory,
    Symlink,
    Skipped,
}

impl RunningJob {
    /// Write this run's edition of the job
    ///
    /// Per-entry failures are logged and counted; the ledger records only
    /// files that made it into the archive. A failure of the archive stream
    /// itself aborts the job, removes the partial archive and leaves the
    /// ledger untouched. Archives of editions dropped by `remove_after` are
    /// deleted only after the ledger has committed.
    pub fn backup(&self, ctx: &BackupContext) -> Result<BackupSummary> {
        let edition = self.edition.ok_or(Error::NoEdition)?;
        let codec = self.codec();
        let root = paths::absolute(&self.job.path);

        let mut filters = ctx
            .filters
            .with_excludes(&self.job.excludes)?
            .with_excludes(&ctx.shared_excludes)?;
        if filters.has_includes() {
            // The walk has to reach the included paths through the root.
            filters.add_include(&escape_pattern(&root.to_string_lossy()))?;
        }

        let mut store = SeenStore::open(&self.ledger_path(), &codec, Some(edition))?;
        let mut summary = BackupSummary::default();

        // Archives newer than the cutoff are only deleted once the ledger
        // rollback has been committed.
        let doomed: Vec<PathBuf> = match &ctx.remove_after {
            Some(after) => {
                let rows = store.remove_editions_after(after)?;
                let newer: Vec<PathBuf> = self
                    .archive_set()?
                    .newer_than(after)
                    .map(|archive| archive.path.clone())
                    .collect();
                debug!(rows, archives = newer.len(), "rolling ledger back to {}", after);
                newer
            }
            None => Vec::new(),
        };

        let archive_path = self.new_archive_path()?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&archive_path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::ArchiveExists(archive_path.clone()),
                _ => Error::from(e),
            })?;
        summary.archive = archive_path.clone();

        info!(job = %self.name(), root = %root.display(), archive = %archive_path.display(), "backing up");

        let written = self.write_archive(file, &root, &filters, &mut store, &mut summary);
        if let Err(e) = written {
            if let Err(remove) = fs::remove_file(&archive_path) {
                warn!(archive = %archive_path.display(), "could not remove partial archive: {}", remove);
            }
            return Err(e);
        }

        store.close()?;
        for path in doomed {
            fs::remove_file(&path)?;
            info!(archive = %path.display(), "removed archive from a dropped edition");
            summary.removed_archives += 1;
        }

        info!(
            job = %self.name(),
            archived = summary.archived,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "backup complete"
        );
        Ok(summary)
    }

    fn write_archive(
        &self,
        file: File,
        root: &Path,
        filters: &Filters,
        store: &mut SeenStore,
        summary: &mut BackupSummary,
    ) -> Result<()> {
        let sealed = self.codec().wrap_writer(BufWriter::new(file))?;
        let mut tar = Builder::new(GzEncoder::new(sealed, Compression::default()));
        tar.follow_symlinks(false);

        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("walk error: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            if !filters.include(entry.path()) {
                debug!(path = %entry.path().display(), "filtered out");
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                summary.skipped += 1;
                continue;
            }

            match archive_entry(&mut tar, store, &entry) {
                Ok(Outcome::Archived) => summary.archived += 1,
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Ok(Outcome::Directory) => summary.directories += 1,
                Ok(Outcome::Symlink) => summary.symlinks += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), "not archived: {}", e);
                    summary.failed += 1;
                }
            }
        }

        let gz = tar.into_inner()?;
        let sealed = gz.finish()?;
        let buffered = sealed.finish()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

fn archive_entry<W: Write>(
    tar: &mut Builder<W>,
    store: &mut SeenStore,
    entry: &DirEntry,
) -> Result<Outcome> {
    let path = entry.path();
    let Some(name) = entry::entry_name(path) else {
        return Ok(Outcome::Skipped);
    };

    match EntryKind::of(entry.file_type()) {
        EntryKind::Directory => {
            let meta = entry.metadata().map_err(io::Error::from)?;
            let mut header = entry::header_for(&meta, EntryType::Directory, 0);
            tar.append_data(&mut header, &name, io::empty())?;
            Ok(Outcome::Directory)
        }
        EntryKind::Symlink => {
            let meta = entry.metadata().map_err(io::Error::from)?;
            let target = fs::read_link(path)?;
            let mut header = entry::header_for(&meta, EntryType::Symlink, 0);
            tar.append_link(&mut header, &name, &target)?;
            Ok(Outcome::Symlink)
        }
        EntryKind::File => {
            let meta = entry.metadata().map_err(io::Error::from)?;
            let key = path.to_string_lossy();
            let update = store.update(
                &key,
                entry::mtime_secs(&meta),
                || Ok(hash_file(path)?),
                || append_file(tar, path, &name),
            )?;
            match update {
                Update::Archived => {
                    debug!(path = %path.display(), "archived");
                    Ok(Outcome::Archived)
                }
                Update::Unchanged => Ok(Outcome::Unchanged),
            }
        }
        EntryKind::Unsupported(kind) => {
            warn!(path = %path.display(), "skipping {}", kind);
            Ok(Outcome::Skipped)
        }
    }
}

/// Append a regular file, keeping the tar stream well-formed
///
/// The header promises the size seen at open time. A file that shrinks or
/// fails mid-read is padded with zeros to that size and reported as an
/// error so the ledger does not record it.
fn append_file<W: Write>(tar: &mut Builder<W>, path: &Path, name: &Path) -> Result<()> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    let mut header = entry::header_for(&meta, EntryType::Regular, meta.len());
    let mut body = SizedBody::new(file, meta.len());
    tar.append_data(&mut header, name, &mut body)?;
    body.into_result()
}

/// Reads exactly `remaining` bytes, zero-filling after a short or failed read
struct SizedBody<R> {
    inner: R,
    remaining: u64,
    fault: Option<io::Error>,
}

impl<R: Read> SizedBody<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
            fault: None,
        }
    }

    fn into_result(self) -> Result<()> {
        match self.fault {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl<R: Read> Read for SizedBody<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || out.is_empty() {
            return Ok(0);
        }
        let want = out.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let out = &mut out[..want];

        let n = if self.fault.is_none() {
            match self.inner.read(out) {
                Ok(0) => {
                    self.fault = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank while archiving",
                    ));
                    0
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
                Err(e) => {
                    self.fault = Some(e);
                    0
                }
            }
        } else {
            0
        };

        let n = if n == 0 {
            out.fill(0);
            out.len()
        } else {
            n
        };
        self.remaining -= n as u64;
        Ok(n)
    }
}
