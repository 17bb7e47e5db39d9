use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tidemark_common::{Error, Result, Target};
use tidemark_config::{AppConfig, ChecksumPolicy, OrphanPolicy, SafetyConfig};
use tidemark_db::{LockHolder, SqliteStateStore, SqliteTarget, StateStore, StateTables};
use tracing::debug;

use crate::down::{DownMode, DownReport, run_down};
use crate::interrupt::Interrupt;
use crate::source::{DirectorySource, MigrationSource};
use crate::status::{StatusReport, run_status};
use crate::up::{UpReport, run_up};

/// Policies the executors follow.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub orphans: OrphanPolicy,
    pub checksums: ChecksumPolicy,
    pub lock_stale_after: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&SafetyConfig::default())
    }
}

impl From<&SafetyConfig> for EngineOptions {
    fn from(safety: &SafetyConfig) -> Self {
        let secs = i64::try_from(safety.lock_stale_after_secs).unwrap_or(i64::MAX);
        Self {
            orphans: safety.orphans,
            checksums: safety.checksums,
            lock_stale_after: Duration::try_seconds(secs).unwrap_or(Duration::MAX),
        }
    }
}

/// A source, a state store and a target wired together.
///
/// An engine opened with [`Engine::read_only`] has no target and only
/// answers `status` and `lock_holder`.
pub struct Engine {
    source: Box<dyn MigrationSource>,
    store: Box<dyn StateStore>,
    target: Option<Box<dyn Target>>,
    options: EngineOptions,
    interrupt: Interrupt,
}

impl Engine {
    pub fn new(
        source: Box<dyn MigrationSource>,
        store: Box<dyn StateStore>,
        target: Box<dyn Target>,
    ) -> Self {
        Self {
            source,
            store,
            target: Some(target),
            options: EngineOptions::default(),
            interrupt: Interrupt::new(),
        }
    }

    /// Build the SQLite-backed engine described by `config`.
    ///
    /// With `database: ":memory:"` the state store and the target are two
    /// separate throwaway databases that vanish when the engine is dropped.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let tables = StateTables::new(&config.state.table, &config.state.lock_table)?;
        let busy_timeout = StdDuration::from_millis(config.connection.busy_timeout_ms);
        let database = config.connection.database.as_str();

        let (store, target) = if database == ":memory:" {
            (
                SqliteStateStore::in_memory(tables)?,
                SqliteTarget::in_memory()?.with_transactional(config.connection.transactional),
            )
        } else {
            let path = Path::new(database);
            (
                SqliteStateStore::open(path, tables, busy_timeout)?,
                SqliteTarget::open(path, busy_timeout, config.connection.transactional)?,
            )
        };

        let source = DirectorySource::new(&config.migrations_dir, config.discovery.unmatched);
        Ok(Self::new(Box::new(source), Box::new(store), Box::new(target))
            .with_options(EngineOptions::from(&config.safety)))
    }

    /// Engine for `status` that never creates, migrates or locks the
    /// database. A database file that doesn't exist yet reads as empty.
    pub fn read_only(config: &AppConfig) -> Result<Self> {
        let tables = StateTables::new(&config.state.table, &config.state.lock_table)?;
        let busy_timeout = StdDuration::from_millis(config.connection.busy_timeout_ms);
        let path = Path::new(&config.connection.database);

        let store = if config.connection.database == ":memory:" || !path.exists() {
            debug!("database {} does not exist yet", path.display());
            SqliteStateStore::in_memory(tables)?
        } else {
            SqliteStateStore::open_read_only(path, tables, busy_timeout)?
        };

        let source = DirectorySource::new(&config.migrations_dir, config.discovery.unmatched);
        Ok(Self {
            source: Box::new(source),
            store: Box::new(store),
            target: None,
            options: EngineOptions::from(&config.safety),
            interrupt: Interrupt::new(),
        })
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Handle that stops a running `up` or `down` at the next migration
    /// boundary.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn up(&mut self) -> Result<UpReport> {
        let target = writable(&mut self.target)?;
        run_up(
            self.source.as_ref(),
            self.store.as_ref(),
            target,
            &self.options,
            &self.interrupt,
        )
    }

    pub fn down(&mut self, mode: DownMode) -> Result<DownReport> {
        let target = writable(&mut self.target)?;
        run_down(
            self.source.as_ref(),
            self.store.as_ref(),
            target,
            &self.options,
            &self.interrupt,
            mode,
        )
    }

    pub fn status(&self) -> Result<StatusReport> {
        run_status(self.source.as_ref(), self.store.as_ref())
    }

    /// Current holder of the run lock, if any.
    pub fn lock_holder(&self) -> Result<Option<LockHolder>> {
        self.store.holder()
    }
}

fn writable(target: &mut Option<Box<dyn Target>>) -> Result<&mut dyn Target> {
    match target {
        Some(target) => Ok(target.as_mut()),
        None => Err(Error::Config(
            "engine was opened read-only and cannot run migrations".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_safety_config() {
        let safety = SafetyConfig {
            orphans: OrphanPolicy::Error,
            checksums: ChecksumPolicy::Ignore,
            lock_stale_after_secs: 30,
        };
        let options = EngineOptions::from(&safety);
        assert_eq!(options.orphans, OrphanPolicy::Error);
        assert_eq!(options.checksums, ChecksumPolicy::Ignore);
        assert_eq!(options.lock_stale_after, Duration::seconds(30));
    }

    #[test]
    fn from_config_opens_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("migrations")).unwrap();
        std::fs::write(
            dir.path().join("migrations/1_init.sql"),
            "-- up\nCREATE TABLE t (id INTEGER);\n-- down\nDROP TABLE t;\n",
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.migrations_dir = dir.path().join("migrations");
        config.connection.database = dir.path().join("app.db").to_string_lossy().into_owned();

        let mut engine = Engine::from_config(&config).unwrap();
        assert_eq!(engine.up().unwrap().applied.len(), 1);
        assert_eq!(engine.status().unwrap().applied_count(), 1);
        assert!(engine.lock_holder().unwrap().is_none());

        let mut reopened = Engine::from_config(&config).unwrap();
        assert!(reopened.up().unwrap().is_noop());
    }

    fn config_in(dir: &Path) -> AppConfig {
        std::fs::create_dir(dir.join("migrations")).unwrap();
        std::fs::write(
            dir.join("migrations/1_init.sql"),
            "-- up\nCREATE TABLE t (id INTEGER);\n-- down\nDROP TABLE t;\n",
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.migrations_dir = dir.join("migrations");
        config.connection.database = dir.join("app.db").to_string_lossy().into_owned();
        config
    }

    #[test]
    fn read_only_status_leaves_missing_database_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let mut engine = Engine::read_only(&config).unwrap();
        let status = engine.status().unwrap();
        assert_eq!(status.pending_count(), 1);
        assert!(engine.lock_holder().unwrap().is_none());
        assert!(matches!(engine.up(), Err(Error::Config(_))));

        assert!(!dir.path().join("app.db").exists());
    }

    #[test]
    fn read_only_status_sees_applied_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        Engine::from_config(&config).unwrap().up().unwrap();

        let engine = Engine::read_only(&config).unwrap();
        assert_eq!(engine.status().unwrap().applied_count(), 1);
    }

    #[test]
    fn in_memory_config_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.connection.database = ":memory:".to_string();
        config.connection.transactional = false;

        let mut engine = Engine::from_config(&config).unwrap();
        assert_eq!(engine.up().unwrap().applied.len(), 1);
        assert_eq!(engine.status().unwrap().applied_count(), 1);
    }
}
