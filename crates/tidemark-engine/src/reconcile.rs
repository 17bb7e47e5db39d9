use std::collections::{BTreeMap, HashSet};

use tidemark_common::{
    AppliedRecord, Direction, Error, Migration, MigrationRef, Result, RunFailure, Version,
};
use tidemark_config::{ChecksumPolicy, OrphanPolicy};
use tracing::warn;

/// Applied records with no discovered migration.
pub(crate) fn orphaned<'r>(
    discovered: &[Migration],
    applied: &'r [AppliedRecord],
) -> Vec<&'r AppliedRecord> {
    let known: HashSet<Version> = discovered.iter().map(|m| m.version).collect();
    applied
        .iter()
        .filter(|record| !known.contains(&record.version))
        .collect()
}

/// Discovered migrations with no applied record, ascending.
pub(crate) fn pending<'m>(
    discovered: &'m [Migration],
    applied: &[AppliedRecord],
) -> Vec<&'m Migration> {
    let done: HashSet<Version> = applied.iter().map(|r| r.version).collect();
    discovered
        .iter()
        .filter(|m| !done.contains(&m.version))
        .collect()
}

/// Applied migrations whose current checksum differs from the recorded one.
pub(crate) fn drifted<'m>(
    discovered: &'m [Migration],
    applied: &[AppliedRecord],
) -> Vec<(&'m Migration, String)> {
    let recorded: BTreeMap<Version, &AppliedRecord> =
        applied.iter().map(|r| (r.version, r)).collect();
    discovered
        .iter()
        .filter_map(|m| {
            recorded
                .get(&m.version)
                .filter(|record| record.checksum != m.checksum)
                .map(|record| (m, record.checksum.clone()))
        })
        .collect()
}

pub(crate) fn check_orphans(policy: OrphanPolicy, orphaned: &[&AppliedRecord]) -> Result<()> {
    if orphaned.is_empty() {
        return Ok(());
    }
    let names = orphaned
        .iter()
        .map(|r| r.to_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    match policy {
        OrphanPolicy::Warn => {
            warn!("applied migrations missing from source: {names}");
            Ok(())
        }
        OrphanPolicy::Error => Err(Error::Orphaned(names)),
    }
}

pub(crate) fn check_drift(
    policy: ChecksumPolicy,
    migration: &Migration,
    recorded: &str,
) -> Result<()> {
    match policy {
        ChecksumPolicy::Ignore => Ok(()),
        ChecksumPolicy::Warn => {
            warn!(
                "{} changed since it was applied (recorded checksum {recorded}, current {})",
                migration.to_ref(),
                migration.checksum
            );
            Ok(())
        }
        ChecksumPolicy::Error => Err(Error::ChecksumMismatch {
            migration: migration.to_ref(),
            recorded: recorded.to_string(),
            current: migration.checksum.clone(),
        }),
    }
}

pub(crate) fn refs<'a>(records: impl IntoIterator<Item = &'a AppliedRecord>) -> Vec<MigrationRef> {
    records.into_iter().map(AppliedRecord::to_ref).collect()
}

/// Wrap `cause` as a run that stopped after `completed`.
pub(crate) fn aborted(
    direction: Direction,
    completed: Vec<MigrationRef>,
    failed: Option<MigrationRef>,
    cause: Error,
) -> Error {
    Error::Aborted(Box::new(RunFailure {
        direction,
        completed,
        failed,
        cause,
    }))
}

/// Error text without the variant prefix, for re-wrapping.
pub(crate) fn detail(error: &Error) -> String {
    match error {
        Error::StateWrite(msg) | Error::StateRead(msg) | Error::Target(msg) => msg.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tidemark_common::MigrationAction;

    fn migration(version: u64, sql: &str) -> Migration {
        Migration::new(
            Version::new(version),
            format!("m{version}"),
            MigrationAction::script(sql),
            None,
        )
    }

    fn record(m: &Migration) -> AppliedRecord {
        AppliedRecord {
            version: m.version,
            name: m.name.clone(),
            checksum: m.checksum.clone(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn classifies_pending_orphaned_and_drifted() {
        let discovered = vec![migration(1, "A;"), migration(2, "B;"), migration(3, "C;")];
        let mut changed = record(&discovered[1]);
        changed.checksum = "stale".into();
        let gone = record(&migration(9, "Z;"));
        let applied = vec![record(&discovered[0]), changed, gone];

        let pending: Vec<u64> = pending(&discovered, &applied)
            .iter()
            .map(|m| m.version.get())
            .collect();
        assert_eq!(pending, vec![3]);

        let orphans = orphaned(&discovered, &applied);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].version, Version::new(9));

        let drift = drifted(&discovered, &applied);
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].0.version, Version::new(2));
        assert_eq!(drift[0].1, "stale");
    }

    #[test]
    fn policies_decide_between_warning_and_error() {
        let gone = record(&migration(9, "Z;"));
        assert!(check_orphans(OrphanPolicy::Warn, &[&gone]).is_ok());
        assert!(matches!(
            check_orphans(OrphanPolicy::Error, &[&gone]),
            Err(Error::Orphaned(_))
        ));

        let m = migration(1, "A;");
        assert!(check_drift(ChecksumPolicy::Ignore, &m, "x").is_ok());
        assert!(check_drift(ChecksumPolicy::Warn, &m, "x").is_ok());
        assert!(matches!(
            check_drift(ChecksumPolicy::Error, &m, "x"),
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}
