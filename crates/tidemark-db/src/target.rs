use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tidemark_common::{Error, Result, Target};
use tracing::{debug, info};

/// A SQLite database that migration scripts run against.
pub struct SqliteTarget {
    conn: Connection,
    transactional: bool,
}

impl SqliteTarget {
    pub fn open(db_path: &Path, busy_timeout: Duration, transactional: bool) -> Result<Self> {
        info!("opening target database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Target(format!("failed to open database: {e}")))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::Target(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            conn,
            transactional,
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Target(format!("failed to open in-memory database: {e}")))?;
        Ok(Self {
            conn,
            transactional: true,
        })
    }

    /// Run each script in its own transaction (the default) or not.
    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Target for SqliteTarget {
    fn execute_script(&mut self, script: &str) -> Result<()> {
        debug!("executing script ({} bytes)", script.len());
        if !self.transactional {
            return self
                .conn
                .execute_batch(script)
                .map_err(|e| Error::Target(e.to_string()));
        }

        // Dropping the transaction on error rolls the whole script back.
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Target(format!("failed to begin transaction: {e}")))?;
        tx.execute_batch(script)
            .map_err(|e| Error::Target(e.to_string()))?;
        tx.commit()
            .map_err(|e| Error::Target(format!("failed to commit: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(target: &SqliteTarget) -> i64 {
        target
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn runs_multi_statement_scripts() {
        let mut target = SqliteTarget::in_memory().unwrap();
        target
            .execute_script(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);
                 INSERT INTO users (email) VALUES ('a@example.com');",
            )
            .unwrap();

        let count: i64 = target
            .connection()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn failed_script_is_rolled_back() {
        let mut target = SqliteTarget::in_memory().unwrap();
        let err = target
            .execute_script("CREATE TABLE ok_table (id INTEGER); INSERT INTO missing VALUES (1);")
            .unwrap_err();

        assert!(matches!(err, Error::Target(_)));
        assert!(err.to_string().contains("missing"));
        assert_eq!(table_count(&target), 0);
    }

    #[test]
    fn non_transactional_mode_keeps_partial_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut target =
            SqliteTarget::open(&dir.path().join("t.db"), Duration::from_secs(1), false).unwrap();
        target
            .execute_script("CREATE TABLE kept (id INTEGER); INSERT INTO missing VALUES (1);")
            .unwrap_err();
        assert_eq!(table_count(&target), 1);
    }

    #[test]
    fn in_memory_target_honours_transactional_flag() {
        let mut target = SqliteTarget::in_memory().unwrap().with_transactional(false);
        target
            .execute_script("CREATE TABLE kept (id INTEGER); INSERT INTO missing VALUES (1);")
            .unwrap_err();
        assert_eq!(table_count(&target), 1);
    }
}
