//! One long-lived ledger transaction

use keepsake_core::{Error, Result};
use rusqlite::Connection;
use tracing::warn;

/// An open `BEGIN ... COMMIT` span over a connection
///
/// Dropping a session that was not committed rolls the transaction back.
pub struct Session {
    conn: Connection,
    active: bool,
}

impl Session {
    pub fn begin(conn: Connection) -> Result<Self> {
        conn.execute_batch("BEGIN").map_err(sql_error)?;
        Ok(Self { conn, active: true })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Commit every change made in this session
    pub fn commit(&mut self) -> Result<()> {
        if self.active {
            self.conn.execute_batch("COMMIT").map_err(sql_error)?;
            self.active = false;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("ledger rollback failed: {}", e);
            }
        }
    }
}

/// Map a SQLite failure on an open ledger
pub(crate) fn sql_error(err: rusqlite::Error) -> Error {
    Error::Ledger(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    fn table(path: &std::path::Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE IF NOT EXISTS t(x INTEGER)").unwrap();
        conn
    }

    #[test]
    fn test_commit_persists() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db");

        let mut session = Session::begin(table(&path))?;
        session.conn().execute("INSERT INTO t VALUES (1)", [])?;
        session.commit()?;
        assert!(!session.is_active());
        drop(session);

        assert_eq!(count(&table(&path)), 1);
        Ok(())
    }

    #[test]
    fn test_drop_rolls_back() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db");

        let session = Session::begin(table(&path))?;
        session.conn().execute("INSERT INTO t VALUES (1)", [])?;
        drop(session);

        assert_eq!(count(&table(&path)), 0);
        Ok(())
    }
}
