use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::types::Version;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("state read error: {0}")]
    StateRead(String),

    #[error("state write error: {0}")]
    StateWrite(String),

    #[error("cannot revert {migration}: {reason}")]
    MissingDownAction {
        migration: MigrationRef,
        reason: String,
    },

    #[error("{direction} action for {migration} failed: {message}")]
    ActionExecution {
        migration: MigrationRef,
        direction: Direction,
        message: String,
    },

    #[error("migration lock is held by {owner} (last heartbeat {heartbeat_at})")]
    LockContention { owner: String, heartbeat_at: String },

    #[error("checksum mismatch for {migration}: recorded {recorded}, current {current}")]
    ChecksumMismatch {
        migration: MigrationRef,
        recorded: String,
        current: String,
    },

    #[error("applied migrations missing from source: {0}")]
    Orphaned(String),

    #[error("target error: {0}")]
    Target(String),

    #[error("run interrupted")]
    Interrupted,

    #[error("{0}")]
    Aborted(Box<RunFailure>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The run failure behind an aborted up/down run, if this is one.
    pub fn run_failure(&self) -> Option<&RunFailure> {
        match self {
            Error::Aborted(failure) => Some(failure),
            _ => None,
        }
    }

    /// The underlying error, looking through a run failure.
    pub fn root(&self) -> &Error {
        match self {
            Error::Aborted(failure) => failure.cause.root(),
            other => other,
        }
    }
}

/// Direction a migration is being executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Lightweight identity of a migration used in reports and errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRef {
    pub version: Version,
    pub name: String,
}

impl MigrationRef {
    pub fn new(version: Version, name: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
        }
    }
}

impl fmt::Display for MigrationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.version, self.name)
    }
}

/// A multi-migration run that stopped early.
///
/// `completed` holds the migrations whose action and state write both
/// finished in this run, in execution order. `failed` is the migration the
/// run stopped on, when the failure is attributable to one.
#[derive(Debug)]
pub struct RunFailure {
    pub direction: Direction,
    pub completed: Vec<MigrationRef>,
    pub failed: Option<MigrationRef>,
    pub cause: Error,
}

impl RunFailure {
    pub fn last_completed(&self) -> Option<&MigrationRef> {
        self.completed.last()
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failed {
            Some(failed) => write!(
                f,
                "{} run stopped at {failed}: {}",
                self.direction, self.cause
            )?,
            None => write!(f, "{} run stopped: {}", self.direction, self.cause)?,
        }
        let verb = match self.direction {
            Direction::Up => "applied",
            Direction::Down => "reverted",
        };
        match self.last_completed() {
            Some(last) => write!(
                f,
                " (last {verb} in this run: {last}, {} total)",
                self.completed.len()
            ),
            None => write!(f, " (nothing {verb} in this run)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::Discovery("duplicate version 3".into());
        assert_eq!(e.to_string(), "discovery error: duplicate version 3");

        let e = Error::ChecksumMismatch {
            migration: MigrationRef::new(Version::new(7), "users"),
            recorded: "aa".into(),
            current: "bb".into(),
        };
        assert_eq!(
            e.to_string(),
            "checksum mismatch for 7_users: recorded aa, current bb"
        );

        let e = Error::Other("misc".into());
        assert_eq!(e.to_string(), "misc");
    }

    #[test]
    fn run_failure_names_last_success_and_first_failure() {
        let failure = RunFailure {
            direction: Direction::Up,
            completed: vec![MigrationRef::new(Version::new(1), "a")],
            failed: Some(MigrationRef::new(Version::new(2), "b")),
            cause: Error::Target("no such table: t".into()),
        };
        assert_eq!(
            failure.to_string(),
            "up run stopped at 2_b: target error: no such table: t \
             (last applied in this run: 1_a, 1 total)"
        );
    }

    #[test]
    fn run_failure_without_progress() {
        let failure = RunFailure {
            direction: Direction::Down,
            completed: Vec::new(),
            failed: None,
            cause: Error::Interrupted,
        };
        assert_eq!(
            failure.to_string(),
            "down run stopped: run interrupted (nothing reverted in this run)"
        );
    }

    #[test]
    fn root_looks_through_aborted_runs() {
        let e = Error::Aborted(Box::new(RunFailure {
            direction: Direction::Up,
            completed: Vec::new(),
            failed: None,
            cause: Error::Interrupted,
        }));
        assert!(matches!(e.root(), Error::Interrupted));
        assert!(e.run_failure().is_some());
    }
}
