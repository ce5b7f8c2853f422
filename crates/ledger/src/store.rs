//! Encrypted content-seen store

use crate::session::{sql_error, Session};
use keepsake_core::atomic::atomic_write;
use keepsake_core::{Codec, ContentHash, Edition, Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS files(
    filename TEXT NOT NULL,
    edition INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    hash BLOB NOT NULL,
    PRIMARY KEY (filename, edition)
)";

/// Outcome of [`SeenStore::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// The file was handed to the archive callback and recorded
    Archived,
    /// The file matches its most recent record and was skipped
    Unchanged,
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRecord {
    pub path: String,
    pub edition: Edition,
    /// Modification time in whole seconds since the epoch
    pub mtime: i64,
    pub hash: ContentHash,
}

/// The content-seen ledger of one job
///
/// Opening decrypts the ledger into a private working copy and starts one
/// transaction. [`SeenStore::close`] commits and re-encrypts it; dropping the
/// store instead rolls back and leaves the encrypted ledger untouched. The
/// working copy is deleted either way.
pub struct SeenStore {
    // Declared before `working` so the connection closes before the file goes.
    session: Session,
    working: NamedTempFile,
    ledger_path: PathBuf,
    codec: Codec,
    edition: Option<Edition>,
}

impl SeenStore {
    /// Open the ledger at `ledger_path`, creating an empty one if absent
    ///
    /// Pass the current edition for a backup run; restore, test and listing
    /// open without one and may not call [`SeenStore::update`].
    pub fn open(ledger_path: &Path, codec: &Codec, edition: Option<Edition>) -> Result<Self> {
        let working = extract(ledger_path, codec)
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", ledger_path.display())))?;

        let session = Connection::open(working.path())
            .and_then(|conn| conn.execute_batch(SCHEMA).map(|()| conn))
            .map_err(|e| Error::StoreUnavailable(format!("{}: {e}", ledger_path.display())))
            .and_then(|conn| {
                Session::begin(conn).map_err(|e| {
                    Error::StoreUnavailable(format!("{}: {e}", ledger_path.display()))
                })
            })?;

        debug!(ledger = %ledger_path.display(), working = %working.path().display(), "opened seen store");
        Ok(Self {
            session,
            working,
            ledger_path: ledger_path.to_path_buf(),
            codec: codec.clone(),
            edition,
        })
    }

    pub fn edition(&self) -> Option<Edition> {
        self.edition
    }

    /// Decide whether a regular file goes into the current edition
    ///
    /// - No record for `path`: hash it, archive it
    /// - `mtime_now` not newer than the record: unchanged, no hashing
    /// - Otherwise hash it; archive only if the hash differs
    ///
    /// A row for the current edition is inserted only once `archive` has
    /// succeeded.
    pub fn update<H, A>(&mut self, path: &str, mtime_now: i64, hash: H, archive: A) -> Result<Update>
    where
        H: FnOnce() -> Result<ContentHash>,
        A: FnOnce() -> Result<()>,
    {
        let edition = self.edition.ok_or(Error::NoEdition)?;
        let previous = self.latest(path)?;

        if let Some(prev) = &previous {
            if mtime_now <= prev.mtime {
                return Ok(Update::Unchanged);
            }
        }

        let hash_now = hash()?;
        if previous.is_some_and(|prev| prev.hash == hash_now) {
            return Ok(Update::Unchanged);
        }

        archive()?;

        self.session
            .conn()
            .prepare_cached("INSERT INTO files VALUES (?1, ?2, ?3, ?4)")
            .and_then(|mut stmt| {
                stmt.execute(params![path, edition.unix(), mtime_now, hash_now.as_bytes().as_slice()])
            })
            .map_err(sql_error)?;
        Ok(Update::Archived)
    }

    /// The most recent record for `path`, by edition
    pub fn latest(&self, path: &str) -> Result<Option<SeenRecord>> {
        let row = self
            .session
            .conn()
            .prepare_cached(
                "SELECT edition, mtime, hash FROM files WHERE filename = ?1
                 ORDER BY edition DESC LIMIT 1",
            )
            .and_then(|mut stmt| {
                stmt.query_row(params![path], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, Vec<u8>>(2)?))
                })
                .optional()
            })
            .map_err(sql_error)?;

        let Some((edition, mtime, hash)) = row else {
            return Ok(None);
        };
        let hash = ContentHash::from_slice(&hash)
            .ok_or_else(|| Error::Ledger(format!("malformed hash recorded for {path}")))?;
        Ok(Some(SeenRecord {
            path: path.to_string(),
            edition: Edition::from_unix(edition)?,
            mtime,
            hash,
        }))
    }

    /// Every edition with at least one row, ascending
    pub fn list_editions(&self) -> Result<Vec<Edition>> {
        let mut stmt = self
            .session
            .conn()
            .prepare_cached("SELECT DISTINCT edition FROM files ORDER BY edition")
            .map_err(sql_error)?;
        let secs = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(sql_error)?;
        secs.into_iter().map(Edition::from_unix).collect()
    }

    /// Delete every row newer than `edition`, returning how many went
    pub fn remove_editions_after(&mut self, edition: &Edition) -> Result<usize> {
        let removed = self
            .session
            .conn()
            .execute("DELETE FROM files WHERE edition > ?1", params![edition.unix()])
            .map_err(sql_error)?;
        info!(after = %edition, removed, "rolled back ledger");
        Ok(removed)
    }

    /// Commit, then re-encrypt the working copy over the ledger file
    pub fn close(self) -> Result<()> {
        let SeenStore {
            mut session,
            working,
            ledger_path,
            codec,
            ..
        } = self;

        session.commit()?;
        drop(session);

        atomic_write(&ledger_path, |file| {
            let mut plain = File::open(working.path())?;
            let mut sealed = codec.wrap_writer(file)?;
            io::copy(&mut plain, &mut sealed)?;
            sealed.finish()?.flush()?;
            Ok(())
        })?;
        debug!(ledger = %ledger_path.display(), "closed seen store");
        Ok(())
    }

    #[cfg(test)]
    fn working_path(&self) -> PathBuf {
        self.working.path().to_path_buf()
    }
}

/// Decrypt the ledger into a fresh private temporary file
fn extract(ledger_path: &Path, codec: &Codec) -> Result<NamedTempFile> {
    let mut working = tempfile::Builder::new()
        .prefix("keepsake-seen-")
        .tempfile()?;

    match File::open(ledger_path) {
        Ok(sealed) => {
            let mut plain = codec.wrap_reader(sealed)?;
            io::copy(&mut plain, working.as_file_mut())?;
            working.as_file_mut().flush()?;
            debug!(ledger = %ledger_path.display(), "decrypted existing ledger");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(ledger = %ledger_path.display(), "creating new ledger");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(working)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::hash::hash_bytes;
    use std::cell::Cell;

    fn edition(secs: i64) -> Edition {
        Edition::from_unix(secs).unwrap()
    }

    fn ledger(dir: &Path) -> PathBuf {
        dir.join(format!("job{}", crate::LEDGER_SUFFIX))
    }

    /// Run `update` and report (outcome, hash calls, archive calls)
    fn run(store: &mut SeenStore, path: &str, mtime: i64, content: &[u8]) -> (Update, u32, u32) {
        let hashed = Cell::new(0);
        let archived = Cell::new(0);
        let outcome = store
            .update(
                path,
                mtime,
                || {
                    hashed.set(hashed.get() + 1);
                    Ok(hash_bytes(content))
                },
                || {
                    archived.set(archived.get() + 1);
                    Ok(())
                },
            )
            .unwrap();
        (outcome, hashed.get(), archived.get())
    }

    #[test]
    fn test_new_file_is_archived_and_recorded() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::armored("pw");
        let mut store = SeenStore::open(&ledger(dir.path()), &codec, Some(edition(100)))?;

        assert_eq!(run(&mut store, "/data/a.txt", 50, b"x"), (Update::Archived, 1, 1));

        let record = store.latest("/data/a.txt")?.unwrap();
        assert_eq!(record.edition, edition(100));
        assert_eq!(record.mtime, 50);
        assert_eq!(record.hash, hash_bytes(b"x"));
        Ok(())
    }

    #[test]
    fn test_old_mtime_skips_hashing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::armored("pw");
        let path = ledger(dir.path());

        let mut store = SeenStore::open(&path, &codec, Some(edition(100)))?;
        run(&mut store, "/data/a.txt", 50, b"x");
        store.close()?;

        let mut store = SeenStore::open(&path, &codec, Some(edition(200)))?;
        assert_eq!(run(&mut store, "/data/a.txt", 50, b"x"), (Update::Unchanged, 0, 0));
        assert_eq!(run(&mut store, "/data/a.txt", 40, b"other"), (Update::Unchanged, 0, 0));
        assert_eq!(store.list_editions()?, vec![edition(100)]);
        Ok(())
    }

    #[test]
    fn test_touched_identical_file_hashed_once_not_archived() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::armored("pw");
        let path = ledger(dir.path());

        let mut store = SeenStore::open(&path, &codec, Some(edition(100)))?;
        run(&mut store, "/data/a.txt", 50, b"x");
        store.close()?;

        let mut store = SeenStore::open(&path, &codec, Some(edition(200)))?;
        assert_eq!(run(&mut store, "/data/a.txt", 60, b"x"), (Update::Unchanged, 1, 0));
        assert_eq!(store.latest("/data/a.txt")?.unwrap().edition, edition(100));
        Ok(())
    }

    #[test]
    fn test_second_row_in_same_edition_is_refused() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::armored("pw");
        let mut store = SeenStore::open(&ledger(dir.path()), &codec, Some(edition(100)))?;

        run(&mut store, "/data/a.txt", 50, b"x");
        let again = store.update("/data/a.txt", 60, || Ok(hash_bytes(b"y")), || Ok(()));
        assert!(matches!(again, Err(Error::Ledger(_))));

        let record = store.latest("/data/a.txt")?.unwrap();
        assert_eq!(record.mtime, 50);
        assert_eq!(record.hash, hash_bytes(b"x"));
        Ok(())
    }

    #[test]
    fn test_changed_file_gets_new_row() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::resistant("pw");
        let path = ledger(dir.path());

        let mut store = SeenStore::open(&path, &codec, Some(edition(100)))?;
        run(&mut store, "/data/a.txt", 50, b"x");
        store.close()?;

        let mut store = SeenStore::open(&path, &codec, Some(edition(200)))?;
        assert_eq!(run(&mut store, "/data/a.txt", 60, b"y"), (Update::Archived, 1, 1));
        let record = store.latest("/data/a.txt")?.unwrap();
        assert_eq!(record.edition, edition(200));
        assert_eq!(record.hash, hash_bytes(b"y"));
        assert_eq!(store.list_editions()?, vec![edition(100), edition(200)]);
        Ok(())
    }

    #[test]
    fn test_failed_archive_records_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::armored("pw");
        let mut store = SeenStore::open(&ledger(dir.path()), &codec, Some(edition(100)))?;

        let result = store.update(
            "/data/a.txt",
            50,
            || Ok(hash_bytes(b"x")),
            || Err(Error::Io(io::Error::new(io::ErrorKind::Other, "disk full"))),
        );
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(store.latest("/data/a.txt")?.is_none());
        Ok(())
    }

    #[test]
    fn test_update_without_edition() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = SeenStore::open(&ledger(dir.path()), &Codec::armored("pw"), None)?;
        let result = store.update("/a", 1, || Ok(hash_bytes(b"")), || Ok(()));
        assert!(matches!(result, Err(Error::NoEdition)));
        Ok(())
    }

    #[test]
    fn test_ledger_is_encrypted_at_rest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = ledger(dir.path());
        let mut store = SeenStore::open(&path, &Codec::armored("pw"), Some(edition(100)))?;
        run(&mut store, "/secret/name.txt", 1, b"x");
        store.close()?;

        let bytes = std::fs::read(&path)?;
        assert!(bytes.starts_with(b"-----BEGIN KEEPSAKE MESSAGE-----"));
        assert!(!bytes.windows(6).any(|w| w == b"secret"));
        Ok(())
    }

    #[test]
    fn test_drop_rolls_back_and_removes_working_copy() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::armored("pw");
        let path = ledger(dir.path());

        let mut store = SeenStore::open(&path, &codec, Some(edition(100)))?;
        run(&mut store, "/data/a.txt", 50, b"x");
        store.close()?;
        let sealed_before = std::fs::read(&path)?;

        let mut store = SeenStore::open(&path, &codec, Some(edition(200)))?;
        run(&mut store, "/data/b.txt", 50, b"y");
        let working = store.working_path();
        assert!(working.exists());
        drop(store);

        assert!(!working.exists());
        assert_eq!(std::fs::read(&path)?, sealed_before);
        Ok(())
    }

    #[test]
    fn test_wrong_passphrase_is_store_unavailable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = ledger(dir.path());
        SeenStore::open(&path, &Codec::armored("right"), Some(edition(100)))?.close()?;

        let result = SeenStore::open(&path, &Codec::armored("wrong"), None);
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        Ok(())
    }

    #[test]
    fn test_remove_editions_after() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let codec = Codec::armored("pw");
        let path = ledger(dir.path());

        for (secs, content) in [(100, b"a"), (200, b"b"), (300, b"c")] {
            let mut store = SeenStore::open(&path, &codec, Some(edition(secs)))?;
            run(&mut store, "/data/f", secs, content);
            run(&mut store, "/data/g", secs, content);
            store.close()?;
        }

        let mut store = SeenStore::open(&path, &codec, None)?;
        assert_eq!(store.remove_editions_after(&edition(100))?, 4);
        assert_eq!(store.list_editions()?, vec![edition(100)]);
        store.close()?;

        let store = SeenStore::open(&path, &codec, None)?;
        assert_eq!(store.list_editions()?, vec![edition(100)]);
        Ok(())
    }
}
