use serde::Serialize;
use tidemark_common::{Direction, Error, MigrationRef, Result, Target};
use tidemark_db::StateStore;
use tracing::{error, info, warn};

use crate::engine::EngineOptions;
use crate::guard::RunLock;
use crate::interrupt::Interrupt;
use crate::reconcile;
use crate::source::MigrationSource;

/// What an up run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpReport {
    /// Migrations applied by this run, in order.
    pub applied: Vec<MigrationRef>,
    /// Migrations that were already applied before the run.
    pub already_applied: usize,
    pub orphaned: Vec<MigrationRef>,
    pub drifted: Vec<MigrationRef>,
}

impl UpReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Apply every pending migration in ascending version order.
///
/// Each migration's action runs and its state record is written before the
/// next one starts. The first failure stops the run; migrations applied
/// before it stay applied and are listed in the returned
/// [`RunFailure`](tidemark_common::RunFailure).
pub fn run_up<S: StateStore + ?Sized>(
    source: &dyn MigrationSource,
    store: &S,
    target: &mut dyn Target,
    options: &EngineOptions,
    interrupt: &Interrupt,
) -> Result<UpReport> {
    let discovered = source.migrations()?;
    store.initialize()?;
    let lock = RunLock::acquire(store, options.lock_stale_after)?;

    let applied = store.list_applied()?;
    let orphaned = reconcile::orphaned(&discovered, &applied);
    reconcile::check_orphans(options.orphans, &orphaned)?;

    let drifted = reconcile::drifted(&discovered, &applied);
    for (migration, recorded) in &drifted {
        reconcile::check_drift(options.checksums, migration, recorded)?;
    }

    let pending = reconcile::pending(&discovered, &applied);
    let mut report = UpReport {
        applied: Vec::with_capacity(pending.len()),
        already_applied: applied.len() - orphaned.len(),
        orphaned: reconcile::refs(orphaned.iter().copied()),
        drifted: drifted.iter().map(|(m, _)| m.to_ref()).collect(),
    };

    if pending.is_empty() {
        info!("nothing to apply, {} migrations up to date", report.already_applied);
        return Ok(report);
    }

    let latest = applied.last().map(|r| r.version);
    info!("applying {} pending migrations from {}", pending.len(), source.describe());

    for migration in pending {
        if interrupt.is_triggered() {
            warn!("interrupted before {}", migration.to_ref());
            return Err(reconcile::aborted(
                Direction::Up,
                report.applied,
                None,
                Error::Interrupted,
            ));
        }
        if let Some(latest) = latest.filter(|latest| migration.version < *latest) {
            warn!(
                "applying {} out of order (already applied up to {latest})",
                migration.to_ref()
            );
        }

        info!("applying {}", migration.to_ref());
        if let Err(e) = migration.up.apply(target) {
            error!("{} failed: {e}", migration.to_ref());
            let cause = Error::ActionExecution {
                migration: migration.to_ref(),
                direction: Direction::Up,
                message: reconcile::detail(&e),
            };
            return Err(reconcile::aborted(
                Direction::Up,
                report.applied,
                Some(migration.to_ref()),
                cause,
            ));
        }

        if let Err(e) = store.record_applied(migration) {
            error!(
                "{} ran but could not be recorded as applied: {e}",
                migration.to_ref()
            );
            let cause = Error::StateWrite(format!(
                "{} ran against the target but was not recorded as applied; \
                 inspect the target before re-running: {}",
                migration.to_ref(),
                reconcile::detail(&e)
            ));
            return Err(reconcile::aborted(
                Direction::Up,
                report.applied,
                Some(migration.to_ref()),
                cause,
            ));
        }
        report.applied.push(migration.to_ref());

        if let Err(e) = lock.heartbeat() {
            return Err(reconcile::aborted(Direction::Up, report.applied, None, e));
        }
    }

    info!("applied {} migrations", report.applied.len());
    Ok(report)
}
