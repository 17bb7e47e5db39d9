use chrono::{DateTime, Utc};
use serde::Serialize;
use tidemark_common::{AppliedRecord, Result, Version};
use tidemark_db::StateStore;

use crate::reconcile;
use crate::source::MigrationSource;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationState {
    Applied {
        applied_at: DateTime<Utc>,
        /// Source changed since the migration was applied.
        drifted: bool,
    },
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub version: Version,
    pub name: String,
    pub reversible: bool,
    #[serde(flatten)]
    pub state: MigrationState,
}

impl StatusEntry {
    pub fn is_applied(&self) -> bool {
        matches!(self.state, MigrationState::Applied { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// Every discovered migration, ascending.
    pub entries: Vec<StatusEntry>,
    /// Applied records whose migration is no longer in the source.
    pub orphaned: Vec<AppliedRecord>,
}

impl StatusReport {
    pub fn applied_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_applied()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len() - self.applied_count()
    }

    pub fn entry(&self, version: Version) -> Option<&StatusEntry> {
        self.entries.iter().find(|e| e.version == version)
    }
}

/// Diff the source against the state store. Reads only.
pub fn run_status<S: StateStore + ?Sized>(
    source: &dyn MigrationSource,
    store: &S,
) -> Result<StatusReport> {
    let discovered = source.migrations()?;
    let applied = store.list_applied()?;

    let entries = discovered
        .iter()
        .map(|migration| {
            let state = match applied.iter().find(|r| r.version == migration.version) {
                Some(record) => MigrationState::Applied {
                    applied_at: record.applied_at,
                    drifted: record.checksum != migration.checksum,
                },
                None => MigrationState::Pending,
            };
            StatusEntry {
                version: migration.version,
                name: migration.name.clone(),
                reversible: migration.is_reversible(),
                state,
            }
        })
        .collect();

    let orphaned = reconcile::orphaned(&discovered, &applied)
        .into_iter()
        .cloned()
        .collect();

    Ok(StatusReport { entries, orphaned })
}
