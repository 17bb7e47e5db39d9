use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tidemark_common::{
    AppliedRecord, Direction, Error, Migration, MigrationRef, Result, Target, Version,
};
use tidemark_db::StateStore;
use tracing::{error, info, warn};

use crate::engine::EngineOptions;
use crate::guard::RunLock;
use crate::interrupt::Interrupt;
use crate::reconcile;
use crate::source::MigrationSource;

/// Which applied migrations a down run reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownMode {
    /// Only the highest applied version.
    Last,
    /// Everything, newest first.
    All,
}

impl fmt::Display for DownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownMode::Last => f.write_str("last"),
            DownMode::All => f.write_str("all"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownReport {
    pub mode: DownMode,
    /// Migrations reverted by this run, in order.
    pub reverted: Vec<MigrationRef>,
}

impl DownReport {
    /// True when there was nothing applied to revert.
    pub fn nothing_to_revert(&self) -> bool {
        self.reverted.is_empty()
    }
}

/// Revert applied migrations according to `mode`, newest first.
///
/// The down action for each applied record is looked up in `source` by
/// version. A record with no source migration, or one without a down action,
/// stops the run with `MissingDownAction`; so does the first failing action
/// or state write. Anything not yet reverted stays applied.
pub fn run_down<S: StateStore + ?Sized>(
    source: &dyn MigrationSource,
    store: &S,
    target: &mut dyn Target,
    options: &EngineOptions,
    interrupt: &Interrupt,
    mode: DownMode,
) -> Result<DownReport> {
    let discovered = source.migrations()?;
    store.initialize()?;
    let lock = RunLock::acquire(store, options.lock_stale_after)?;

    let applied = store.list_applied()?;
    let mut report = DownReport {
        mode,
        reverted: Vec::new(),
    };
    if applied.is_empty() {
        info!("nothing to revert");
        return Ok(report);
    }

    let selected: Vec<&AppliedRecord> = match mode {
        DownMode::Last => applied.last().into_iter().collect(),
        DownMode::All => applied.iter().rev().collect(),
    };
    let by_version: HashMap<Version, &Migration> =
        discovered.iter().map(|m| (m.version, m)).collect();

    info!("reverting {} migrations (mode {mode})", selected.len());

    for record in selected {
        let fail = |completed: Vec<MigrationRef>, cause: Error| {
            reconcile::aborted(Direction::Down, completed, Some(record.to_ref()), cause)
        };

        if interrupt.is_triggered() {
            warn!("interrupted before reverting {}", record.to_ref());
            return Err(reconcile::aborted(
                Direction::Down,
                report.reverted,
                None,
                Error::Interrupted,
            ));
        }

        let Some(migration) = by_version.get(&record.version).copied() else {
            let cause = Error::MissingDownAction {
                migration: record.to_ref(),
                reason: "migration not found in source".to_string(),
            };
            return Err(fail(report.reverted, cause));
        };
        let Some(down) = migration.down.as_ref() else {
            let cause = Error::MissingDownAction {
                migration: record.to_ref(),
                reason: "migration has no down action".to_string(),
            };
            return Err(fail(report.reverted, cause));
        };
        let drift = (migration.checksum != record.checksum)
            .then(|| reconcile::check_drift(options.checksums, migration, &record.checksum));
        if let Some(Err(cause)) = drift {
            return Err(fail(report.reverted, cause));
        }

        info!("reverting {}", record.to_ref());
        if let Err(e) = down.apply(target) {
            error!("reverting {} failed: {e}", record.to_ref());
            let cause = Error::ActionExecution {
                migration: record.to_ref(),
                direction: Direction::Down,
                message: reconcile::detail(&e),
            };
            return Err(fail(report.reverted, cause));
        }

        if let Err(e) = store.record_reverted(record.version) {
            error!(
                "{} was reverted but its applied record could not be removed: {e}",
                record.to_ref()
            );
            let cause = Error::StateWrite(format!(
                "{} was reverted on the target but is still recorded as applied; \
                 inspect the target before re-running: {}",
                record.to_ref(),
                reconcile::detail(&e)
            ));
            return Err(fail(report.reverted, cause));
        }
        report.reverted.push(record.to_ref());

        if let Err(e) = lock.heartbeat() {
            return Err(reconcile::aborted(Direction::Down, report.reverted, None, e));
        }
    }

    info!("reverted {} migrations", report.reverted.len());
    Ok(report)
}
