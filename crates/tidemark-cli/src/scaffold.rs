use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tidemark_common::{Error, Result, Version};
use tidemark_config::{AppConfig, ConfigLoader, UnmatchedPolicy};
use tidemark_engine::{DirectorySource, MigrationSource};
use tracing::info;

const DEFAULT_NAME: &str = "migration";

/// What `tidemark init` created.
pub struct Initialized {
    pub config_path: PathBuf,
    pub migrations_dir: PathBuf,
    pub created_dir: bool,
}

/// Files written by `tidemark new`.
pub struct NewMigration {
    pub version: Version,
    pub name: String,
    pub up: PathBuf,
    pub down: PathBuf,
}

/// Write a default config next to an (existing or new) migrations directory.
/// Never overwrites a config file.
pub fn init(loader: &ConfigLoader) -> Result<Initialized> {
    let config = AppConfig::default();
    loader.write_new(&config)?;

    let base = loader.path().parent().unwrap_or_else(|| Path::new(""));
    let migrations_dir = base.join(&config.migrations_dir);
    let created_dir = !migrations_dir.is_dir();
    std::fs::create_dir_all(&migrations_dir).map_err(|e| {
        Error::Config(format!(
            "failed to create {}: {e}",
            migrations_dir.display()
        ))
    })?;

    info!("initialized {}", loader.path().display());
    Ok(Initialized {
        config_path: loader.path().to_path_buf(),
        migrations_dir,
        created_dir,
    })
}

/// Create `<version>_<name>.up.sql` and `.down.sql` templates in `dir`.
///
/// The version is the UTC timestamp `YYYYMMDDHHMMSS` of `now`, or one past
/// the newest existing version when the clock is not ahead of it.
pub fn new_migration(dir: &Path, raw_name: &str, now: DateTime<Utc>) -> Result<NewMigration> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;

    let existing = DirectorySource::new(dir, UnmatchedPolicy::Skip)
        .migrations()?
        .last()
        .map(|m| m.version);
    let version = next_version(now, existing)?;
    let name = sanitize_name(raw_name);

    let stem = format!("{version}_{name}");
    let up = dir.join(format!("{stem}.up.sql"));
    let down = dir.join(format!("{stem}.down.sql"));

    write_template(
        &up,
        &format!("-- {stem}: up\n-- Statements that apply this change.\n"),
    )?;
    write_template(
        &down,
        &format!(
            "-- {stem}: down\n-- Statements that undo the up script.\n\
             -- Leave this file with comments only to mark the migration irreversible.\n"
        ),
    )?;

    info!("created migration {stem}");
    Ok(NewMigration {
        version,
        name,
        up,
        down,
    })
}

pub fn sanitize_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.is_empty() && !name.ends_with('_') {
            name.push('_');
        }
    }
    let name = name.trim_end_matches('_');
    if name.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        name.to_string()
    }
}

pub fn next_version(now: DateTime<Utc>, newest: Option<Version>) -> Result<Version> {
    let stamp: Version = now.format("%Y%m%d%H%M%S").to_string().parse()?;
    match newest {
        Some(newest) if newest >= stamp => newest
            .get()
            .checked_add(1)
            .map(Version::new)
            .filter(|next| *next <= Version::MAX)
            .ok_or_else(|| Error::Discovery(format!("no version available after {newest}"))),
        _ => Ok(stamp),
    }
}

fn write_template(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::Config(format!("failed to create {}: {e}", path.display())))?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
