use std::sync::LazyLock;

use regex::Regex;
use tidemark_common::{Error, Result};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

/// Names of the bookkeeping tables kept next to the user's schema.
///
/// Both names are interpolated into SQL, so they are validated as plain
/// identifiers up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTables {
    table: String,
    lock_table: String,
}

impl StateTables {
    pub fn new(table: impl Into<String>, lock_table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let lock_table = lock_table.into();
        for name in [&table, &lock_table] {
            if !IDENTIFIER.is_match(name) {
                return Err(Error::Config(format!("invalid table name '{name}'")));
            }
        }
        if table.eq_ignore_ascii_case(&lock_table) {
            return Err(Error::Config(
                "state table and lock table must differ".to_string(),
            ));
        }
        Ok(Self { table, lock_table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn lock_table(&self) -> &str {
        &self.lock_table
    }

    /// DDL for both tables. Safe to run repeatedly.
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {lock} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                heartbeat_at TEXT NOT NULL
            );",
            table = self.table,
            lock = self.lock_table,
        )
    }
}

impl Default for StateTables {
    fn default() -> Self {
        Self {
            table: "_tidemark_migrations".to_string(),
            lock_table: "_tidemark_lock".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        let tables = StateTables::new("schema_history", "schema_lock").unwrap();
        assert_eq!(tables.table(), "schema_history");
        assert!(tables.create_sql().contains("CREATE TABLE IF NOT EXISTS schema_lock"));
    }

    #[test]
    fn rejects_injection_and_collisions() {
        assert!(StateTables::new("t; DROP TABLE x", "lock").is_err());
        assert!(StateTables::new("1table", "lock").is_err());
        assert!(StateTables::new("same", "SAME").is_err());
    }
}
