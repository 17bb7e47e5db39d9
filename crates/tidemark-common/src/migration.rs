use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{MigrationRef, Result};
use crate::types::{Version, checksum};

/// The thing migrations are applied to.
///
/// Implementations own their connection; the executors only ever hand a
/// `&mut dyn Target` to one action at a time.
pub trait Target: Send {
    /// Execute a raw script. Implementations decide whether the script runs
    /// inside a transaction.
    fn execute_script(&mut self, script: &str) -> Result<()>;
}

/// Programmatic migration step.
pub type ActionFn = Arc<dyn Fn(&mut dyn Target) -> Result<()> + Send + Sync>;

/// One direction of a migration.
#[derive(Clone)]
pub enum MigrationAction {
    /// Raw script handed to the target as-is.
    Script(String),
    /// Rust callback. `fingerprint` stands in for the script text when
    /// computing checksums, so bump it when the callback changes.
    Callback { fingerprint: String, run: ActionFn },
}

impl MigrationAction {
    pub fn script(sql: impl Into<String>) -> Self {
        Self::Script(sql.into())
    }

    pub fn callback<F>(fingerprint: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut dyn Target) -> Result<()> + Send + Sync + 'static,
    {
        Self::Callback {
            fingerprint: fingerprint.into(),
            run: Arc::new(run),
        }
    }

    pub fn apply(&self, target: &mut dyn Target) -> Result<()> {
        match self {
            Self::Script(sql) => target.execute_script(sql),
            Self::Callback { run, .. } => run(target),
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            Self::Script(sql) => sql,
            Self::Callback { fingerprint, .. } => fingerprint,
        }
    }
}

impl fmt::Debug for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(sql) => f.debug_tuple("Script").field(&sql.len()).finish(),
            Self::Callback { fingerprint, .. } => f
                .debug_struct("Callback")
                .field("fingerprint", fingerprint)
                .finish_non_exhaustive(),
        }
    }
}

/// A discovered, immutable migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: Version,
    pub name: String,
    pub up: MigrationAction,
    pub down: Option<MigrationAction>,
    pub checksum: String,
}

impl Migration {
    pub fn new(
        version: Version,
        name: impl Into<String>,
        up: MigrationAction,
        down: Option<MigrationAction>,
    ) -> Self {
        let checksum = checksum([
            up.fingerprint(),
            down.as_ref().map(MigrationAction::fingerprint).unwrap_or(""),
        ]);
        Self {
            version,
            name: name.into(),
            up,
            down,
            checksum,
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    pub fn to_ref(&self) -> MigrationRef {
        MigrationRef::new(self.version, self.name.clone())
    }
}

/// Persisted evidence that a migration ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRecord {
    pub version: Version,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

impl AppliedRecord {
    pub fn to_ref(&self) -> MigrationRef {
        MigrationRef::new(self.version, self.name.clone())
    }
}
