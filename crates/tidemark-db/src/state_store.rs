use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use tidemark_common::{AppliedRecord, Error, Migration, Result, Version};
use tracing::{debug, info};

use crate::schema::StateTables;
use crate::store::{LockAttempt, LockHolder, LockStore, StateStore};

/// SQLite-backed record of applied migrations and the run lock.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
    tables: StateTables,
}

impl SqliteStateStore {
    pub fn open(db_path: &Path, tables: StateTables, busy_timeout: StdDuration) -> Result<Self> {
        info!("opening state store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::StateRead(format!("failed to open database: {e}")))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::StateRead(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::StateRead(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            tables,
        })
    }

    /// Open an existing database without creating it or changing its
    /// journal mode. Every write fails.
    pub fn open_read_only(
        db_path: &Path,
        tables: StateTables,
        busy_timeout: StdDuration,
    ) -> Result<Self> {
        debug!("opening state store read-only at {}", db_path.display());
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .map_err(|e| Error::StateRead(format!("failed to open database: {e}")))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::StateRead(format!("failed to set busy timeout: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            tables,
        })
    }

    pub fn in_memory(tables: StateTables) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::StateRead(format!("failed to open in-memory database: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            tables,
        })
    }

    pub fn tables(&self) -> &StateTables {
        &self.tables
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StateRead("state store lock poisoned".into()))
    }

    fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| Error::StateRead(format!("failed to inspect schema: {e}")))?;
        Ok(count > 0)
    }

    fn read_holder(conn: &Connection, lock_table: &str) -> rusqlite::Result<Option<RawHolder>> {
        conn.query_row(
            &format!("SELECT owner, acquired_at, heartbeat_at FROM {lock_table} WHERE id = 1"),
            [],
            |row| {
                Ok(RawHolder {
                    owner: row.get(0)?,
                    acquired_at: row.get(1)?,
                    heartbeat_at: row.get(2)?,
                })
            },
        )
        .optional()
    }
}

struct RawHolder {
    owner: String,
    acquired_at: String,
    heartbeat_at: String,
}

impl RawHolder {
    fn parse(self) -> Result<LockHolder> {
        Ok(LockHolder {
            owner: self.owner,
            acquired_at: parse_datetime(&self.acquired_at)?,
            heartbeat_at: parse_datetime(&self.heartbeat_at)?,
        })
    }
}

impl StateStore for SqliteStateStore {
    fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(&self.tables.create_sql())
            .map_err(|e| Error::StateWrite(format!("failed to create state tables: {e}")))?;
        debug!("state tables ready ({})", self.tables.table());
        Ok(())
    }

    fn list_applied(&self) -> Result<Vec<AppliedRecord>> {
        let conn = self.connection()?;
        if !Self::table_exists(&conn, self.tables.table())? {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, name, checksum, applied_at FROM {} ORDER BY version ASC",
                self.tables.table()
            ))
            .map_err(|e| Error::StateRead(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| Error::StateRead(format!("failed to query applied migrations: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let (version, name, checksum, applied_at) =
                row.map_err(|e| Error::StateRead(format!("failed to read applied row: {e}")))?;
            let version = u64::try_from(version).map_err(|_| {
                Error::StateRead(format!("negative version {version} in state table"))
            })?;
            records.push(AppliedRecord {
                version: Version::new(version),
                name,
                checksum,
                applied_at: parse_datetime(&applied_at)?,
            });
        }
        Ok(records)
    }

    fn record_applied(&self, migration: &Migration) -> Result<AppliedRecord> {
        let version = to_sql_version(migration.version)?;
        let applied_at = Utc::now();
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (version, name, checksum, applied_at) VALUES (?1, ?2, ?3, ?4)",
                self.tables.table()
            ),
            params![version, migration.name, migration.checksum, applied_at.to_rfc3339()],
        )
        .map_err(|e| {
            Error::StateWrite(format!(
                "failed to record {} as applied: {e}",
                migration.to_ref()
            ))
        })?;

        Ok(AppliedRecord {
            version: migration.version,
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at,
        })
    }

    fn record_reverted(&self, version: Version) -> Result<()> {
        let sql_version = to_sql_version(version)?;
        let conn = self.connection()?;
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE version = ?1", self.tables.table()),
                params![sql_version],
            )
            .map_err(|e| {
                Error::StateWrite(format!("failed to remove applied record {version}: {e}"))
            })?;

        if removed == 0 {
            return Err(Error::StateWrite(format!(
                "no applied record for version {version}"
            )));
        }
        Ok(())
    }
}

impl LockStore for SqliteStateStore {
    fn try_acquire(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<LockAttempt> {
        let lock_table = self.tables.lock_table();
        let mut conn = self.connection()?;
        // IMMEDIATE takes the write lock up front so two runs can't both see
        // an empty lock row.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::StateWrite(format!("failed to begin lock transaction: {e}")))?;

        let existing = Self::read_holder(&tx, lock_table)
            .map_err(|e| Error::StateRead(format!("failed to read lock: {e}")))?
            .map(RawHolder::parse)
            .transpose()?;

        let now_text = now.to_rfc3339();
        let attempt = match existing {
            Some(holder) if holder.owner != owner && now - holder.heartbeat_at < stale_after => {
                return Ok(LockAttempt::Held(holder));
            }
            Some(holder) => {
                tx.execute(
                    &format!(
                        "UPDATE {lock_table} SET owner = ?1, acquired_at = ?2, heartbeat_at = ?2 \
                         WHERE id = 1"
                    ),
                    params![owner, now_text],
                )
                .map_err(|e| Error::StateWrite(format!("failed to take over lock: {e}")))?;
                let reclaimed = (holder.owner != owner).then_some(holder);
                LockAttempt::Acquired { reclaimed }
            }
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO {lock_table} (id, owner, acquired_at, heartbeat_at) \
                         VALUES (1, ?1, ?2, ?2)"
                    ),
                    params![owner, now_text],
                )
                .map_err(|e| Error::StateWrite(format!("failed to write lock: {e}")))?;
                LockAttempt::Acquired { reclaimed: None }
            }
        };

        tx.commit()
            .map_err(|e| Error::StateWrite(format!("failed to commit lock: {e}")))?;
        Ok(attempt)
    }

    fn heartbeat(&self, owner: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.connection()?;
        let updated = conn
            .execute(
                &format!(
                    "UPDATE {} SET heartbeat_at = ?1 WHERE id = 1 AND owner = ?2",
                    self.tables.lock_table()
                ),
                params![now.to_rfc3339(), owner],
            )
            .map_err(|e| Error::StateWrite(format!("failed to refresh lock: {e}")))?;

        if updated == 0 {
            return Err(Error::StateWrite(format!(
                "lock is no longer held by {owner}"
            )));
        }
        Ok(())
    }

    fn release(&self, owner: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE id = 1 AND owner = ?1",
                self.tables.lock_table()
            ),
            params![owner],
        )
        .map_err(|e| Error::StateWrite(format!("failed to release lock: {e}")))?;
        Ok(())
    }

    fn holder(&self) -> Result<Option<LockHolder>> {
        let conn = self.connection()?;
        if !Self::table_exists(&conn, self.tables.lock_table())? {
            return Ok(None);
        }
        Self::read_holder(&conn, self.tables.lock_table())
            .map_err(|e| Error::StateRead(format!("failed to read lock: {e}")))?
            .map(RawHolder::parse)
            .transpose()
    }
}

fn to_sql_version(version: Version) -> Result<i64> {
    i64::try_from(version.get())
        .map_err(|_| Error::StateWrite(format!("version {version} does not fit in SQLite INTEGER")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
        .map_err(|e| Error::StateRead(format!("invalid timestamp '{s}': {e}")))
}
