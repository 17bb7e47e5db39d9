use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration, usually read from `tidemark.yml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory scanned for migration files.
    pub migrations_dir: PathBuf,
    pub connection: ConnectionConfig,
    pub state: StateConfig,
    pub discovery: DiscoveryConfig,
    pub safety: SafetyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            connection: ConnectionConfig::default(),
            state: StateConfig::default(),
            discovery: DiscoveryConfig::default(),
            safety: SafetyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// SQLite database path, or `:memory:`.
    pub database: String,
    pub busy_timeout_ms: u64,
    /// Wrap each migration script in a transaction.
    pub transactional: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            database: "tidemark.db".to_string(),
            busy_timeout_ms: 5_000,
            transactional: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub table: String,
    pub lock_table: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            table: "_tidemark_migrations".to_string(),
            lock_table: "_tidemark_lock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub unmatched: UnmatchedPolicy,
}

/// What to do with directory entries that don't look like migrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Log a warning and carry on.
    #[default]
    Skip,
    /// Fail discovery.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub orphans: OrphanPolicy,
    pub checksums: ChecksumPolicy,
    /// A lock whose heartbeat is older than this may be taken over.
    pub lock_stale_after_secs: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            orphans: OrphanPolicy::default(),
            checksums: ChecksumPolicy::default(),
            lock_stale_after_secs: 600,
        }
    }
}

/// Applied migrations whose source has disappeared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    #[default]
    Warn,
    Error,
}

/// Applied migrations whose source changed since they ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    Ignore,
    #[default]
    Warn,
    Error,
}
