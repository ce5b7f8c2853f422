//! The archive set of a job

use keepsake_core::{Edition, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// One archive file and the edition encoded in its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub path: PathBuf,
    pub edition: Edition,
}

/// A job's archives, ascending by edition
#[derive(Debug, Clone, Default)]
pub struct ArchiveSet {
    names: Vec<ArchiveName>,
}

impl ArchiveSet {
    /// Collect the regular files in `dir` named `{prefix}{edition}{suffix}`
    ///
    /// A matching name whose middle is not a valid edition fails the scan.
    pub fn scan(dir: &Path, prefix: &str, suffix: &str) -> Result<Self> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(middle) = file_name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
            else {
                continue;
            };
            let edition = Edition::parse(middle)?;
            trace!(archive = file_name, %edition, "found archive");
            names.push(ArchiveName {
                path: entry.path(),
                edition,
            });
        }
        Ok(Self::from_names(names))
    }

    pub fn from_names(mut names: Vec<ArchiveName>) -> Self {
        names.sort_by_key(|name| name.edition);
        Self { names }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchiveName> {
        self.names.iter()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Archives strictly newer than `edition`
    pub fn newer_than<'a>(&'a self, edition: &'a Edition) -> impl Iterator<Item = &'a ArchiveName> {
        self.names.iter().filter(move |name| name.edition > *edition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::Error;

    const SUFFIX: &str = ".tar.gz.asc";

    fn touch(dir: &Path, name: &str) -> anyhow::Result<()> {
        fs::write(dir.join(name), b"")?;
        Ok(())
    }

    #[test]
    fn test_scan_sorts_by_edition() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "home_2024-03-01T00-00-00Z.tar.gz.asc")?;
        touch(dir.path(), "home_2023-12-31T23-59-59Z.tar.gz.asc")?;
        touch(dir.path(), "home_2024-01-15T12-00-00Z.tar.gz.asc")?;

        let set = ArchiveSet::scan(dir.path(), "home_", SUFFIX)?;
        let editions: Vec<String> = set.iter().map(|a| a.edition.to_string()).collect();
        assert_eq!(
            editions,
            vec![
                "2023-12-31T23-59-59Z",
                "2024-01-15T12-00-00Z",
                "2024-03-01T00-00-00Z"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_scan_ignores_other_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "home_2024-03-01T00-00-00Z.tar.gz.asc")?;
        touch(dir.path(), "home_seen.db")?;
        touch(dir.path(), "homework_2024-03-01T00-00-00Z.tar.gz.asc")?;
        touch(dir.path(), "home_2024-03-01T00-00-00Z.tar.gz.ksr")?;
        fs::create_dir(dir.path().join("home_2024-04-01T00-00-00Z.tar.gz.asc"))?;

        let set = ArchiveSet::scan(dir.path(), "home_", SUFFIX)?;
        assert_eq!(set.len(), 1);
        Ok(())
    }

    #[test]
    fn test_scan_rejects_bad_edition() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "home_yesterday.tar.gz.asc")?;
        assert!(matches!(
            ArchiveSet::scan(dir.path(), "home_", SUFFIX),
            Err(Error::InvalidEdition(_))
        ));
        Ok(())
    }

    #[test]
    fn test_newer_than() -> anyhow::Result<()> {
        let names = (1..=3)
            .map(|i| -> anyhow::Result<ArchiveName> {
                Ok(ArchiveName {
                    path: PathBuf::from(format!("/b/{i}")),
                    edition: Edition::from_unix(i * 1000)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let set = ArchiveSet::from_names(names);

        let cutoff = Edition::from_unix(1000)?;
        let newer: Vec<_> = set.newer_than(&cutoff).map(|a| a.path.clone()).collect();
        assert_eq!(newer, vec![PathBuf::from("/b/2"), PathBuf::from("/b/3")]);
        Ok(())
    }
}
