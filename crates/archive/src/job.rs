//! Job files and running jobs
//!
//! A job file is a stream of concatenated JSON objects:
//!
//! ```json
//! {"BaseName": "backups/home", "Path": "/home", "Excludes": ["*.tmp"], "Passphrase": "..."}
//! {"BaseName": "backups/etc", "Path": "/etc", "Passphrase": "...", "Codec": "resistant"}
//! ```
//!
//! Relative `BaseName` and `Path` values are resolved against the directory
//! holding the job file.

use crate::names::ArchiveSet;
use keepsake_core::paths;
use keepsake_core::{Codec, CodecKind, Edition, Error, Result};
use keepsake_filter::escape_pattern;
use keepsake_ledger::{SeenStore, LEDGER_SUFFIX};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One backup unit as written in the job file
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    /// Stem of the archive and ledger file names
    pub base_name: PathBuf,

    /// Root of the tree to archive
    pub path: PathBuf,

    /// Glob patterns excluded from this job only
    #[serde(default)]
    pub excludes: Vec<String>,

    pub passphrase: String,

    #[serde(default)]
    pub codec: CodecKind,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("base_name", &self.base_name)
            .field("path", &self.path)
            .field("excludes", &self.excludes)
            .field("passphrase", &"[REDACTED]")
            .field("codec", &self.codec)
            .finish()
    }
}

impl Job {
    /// Make `base_name` and `path` absolute relative to `dir`
    pub fn resolved(mut self, dir: &Path) -> Result<Self> {
        self.base_name = paths::resolve_against(dir, &self.base_name);
        self.path = paths::resolve_against(dir, &self.path);
        if self.base_name.file_name().is_none() {
            return Err(Error::InvalidJob(format!(
                "base name {} has no file name",
                self.base_name.display()
            )));
        }
        Ok(self)
    }
}

/// A job paired with the edition of the current run
///
/// Backups carry the new edition; restore, test and listing carry none.
#[derive(Debug, Clone)]
pub struct RunningJob {
    pub job: Job,
    pub edition: Option<Edition>,
}

impl RunningJob {
    pub fn new(job: Job, edition: Option<Edition>) -> Self {
        Self { job, edition }
    }

    /// Short name for log lines: the leaf of the base name
    pub fn name(&self) -> String {
        self.job
            .base_name
            .file_name()
            .map(|leaf| leaf.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn codec(&self) -> Codec {
        self.job.codec.with_passphrase(&self.job.passphrase)
    }

    /// Directory holding the archives and the ledger
    pub fn dir(&self) -> PathBuf {
        match self.job.base_name.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.with_suffix(LEDGER_SUFFIX)
    }

    /// `{base_name}_{edition}{suffix}`
    pub fn archive_path(&self, edition: &Edition) -> PathBuf {
        self.with_suffix(&format!("_{edition}{}", self.codec().archive_suffix()))
    }

    /// Archive file for the current run's edition
    pub fn new_archive_path(&self) -> Result<PathBuf> {
        let edition = self.edition.ok_or(Error::NoEdition)?;
        Ok(self.archive_path(&edition))
    }

    /// Every archive of this job on disk, oldest first
    pub fn archive_set(&self) -> Result<ArchiveSet> {
        ArchiveSet::scan(
            &self.dir(),
            &format!("{}_", self.name()),
            self.codec().archive_suffix(),
        )
    }

    /// Files this job writes, which no job may back up
    ///
    /// Covers the existing archives, the archive about to be written (when
    /// the run has an edition) and the ledger.
    pub fn own_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .archive_set()?
            .iter()
            .map(|archive| archive.path.clone())
            .collect();
        if let Some(edition) = &self.edition {
            files.push(self.archive_path(edition));
        }
        files.push(self.ledger_path());
        Ok(files)
    }

    /// Editions recorded in this job's ledger, ascending
    pub fn list_editions(&self) -> Result<Vec<Edition>> {
        let store = SeenStore::open(&self.ledger_path(), &self.codec(), None)?;
        let editions = store.list_editions()?;
        store.close()?;
        Ok(editions)
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.job.base_name.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Read every job from a job file
pub fn load_jobs(job_file: &Path, edition: Option<Edition>) -> Result<Vec<RunningJob>> {
    let file = File::open(job_file)?;
    let dir = match job_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => paths::absolute(parent),
        _ => paths::absolute(Path::new(".")),
    };

    let mut jobs = Vec::new();
    for job in serde_json::Deserializer::from_reader(BufReader::new(file)).into_iter::<Job>() {
        let job = job.map_err(|e| Error::InvalidJob(format!("{}: {e}", job_file.display())))?;
        let job = job.resolved(&dir)?;
        debug!(base = %job.base_name.display(), root = %job.path.display(), "loaded job");
        jobs.push(RunningJob::new(job, edition));
    }
    Ok(jobs)
}

/// Escaped exclude patterns for every file any of `jobs` writes
pub fn shared_excludes(jobs: &[RunningJob]) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for job in jobs {
        for file in job.own_files()? {
            patterns.push(escape_pattern(&paths::absolute(&file).to_string_lossy()));
        }
    }
    Ok(patterns)
}
