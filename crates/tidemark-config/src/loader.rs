use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const DEFAULT_CONFIG_FILE: &str = "tidemark.yml";

/// Reads `AppConfig` from a YAML or TOML file.
///
/// Relative paths inside the file (`migrations_dir`, `connection.database`)
/// are resolved against the directory containing the file, so the tool
/// behaves the same regardless of the working directory.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loader for `tidemark.yml` in the current directory.
    pub fn default_location() -> Self {
        Self::new(DEFAULT_CONFIG_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            return Err(Error::Config(format!(
                "config file {} not found (run `tidemark init` to create one)",
                self.path.display()
            )));
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", self.path.display())))?;

        let config = parse_config(&self.path, &contents)?;
        let base = self.path.parent().unwrap_or(Path::new(""));
        let config = resolve_paths(config, base);
        debug!(
            "loaded config from {} (migrations in {})",
            self.path.display(),
            config.migrations_dir.display()
        );
        Ok(config)
    }

    /// Write `config` to the loader's path. Refuses to replace an existing
    /// file.
    pub fn write_new(&self, config: &AppConfig) -> Result<()> {
        if self.path.exists() {
            return Err(Error::Config(format!(
                "{} already exists",
                self.path.display()
            )));
        }
        let rendered = render_config(&self.path, config)?;
        std::fs::write(&self.path, rendered)
            .map_err(|e| Error::Config(format!("failed to write {}: {e}", self.path.display())))?;
        info!("config written to {}", self.path.display());
        Ok(())
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

fn parse_config(path: &Path, contents: &str) -> Result<AppConfig> {
    match extension(path) {
        "yml" | "yaml" => serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other:?}"
        ))),
    }
}

fn render_config(path: &Path, config: &AppConfig) -> Result<String> {
    match extension(path) {
        "yml" | "yaml" => serde_yaml::to_string(config)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}"))),
        "toml" => toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}"))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other:?}"
        ))),
    }
}

fn resolve_paths(mut config: AppConfig, base: &Path) -> AppConfig {
    if config.migrations_dir.is_relative() {
        config.migrations_dir = base.join(&config.migrations_dir);
    }
    let database = &config.connection.database;
    if database != ":memory:" && Path::new(database).is_relative() {
        config.connection.database = base.join(database).to_string_lossy().into_owned();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChecksumPolicy, OrphanPolicy, UnmatchedPolicy};

    #[test]
    fn loads_yaml_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.yml");
        std::fs::write(
            &path,
            "migrations_dir: db/migrations\nsafety:\n  orphans: error\n",
        )
        .unwrap();

        let config = ConfigLoader::new(&path).load().unwrap();
        assert_eq!(config.migrations_dir, dir.path().join("db/migrations"));
        assert_eq!(config.safety.orphans, OrphanPolicy::Error);
        assert_eq!(config.safety.checksums, ChecksumPolicy::Warn);
        assert_eq!(config.safety.lock_stale_after_secs, 600);
        assert_eq!(config.state.table, "_tidemark_migrations");
        assert_eq!(
            config.connection.database,
            dir.path().join("tidemark.db").to_string_lossy()
        );
    }

    #[test]
    fn loads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.toml");
        std::fs::write(
            &path,
            r#"
migrations_dir = "/srv/migrations"

[connection]
database = ":memory:"
transactional = false

[discovery]
unmatched = "reject"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new(&path).load().unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("/srv/migrations"));
        assert_eq!(config.connection.database, ":memory:");
        assert!(!config.connection.transactional);
        assert_eq!(config.discovery.unmatched, UnmatchedPolicy::Reject);
    }

    #[test]
    fn missing_file_points_at_init() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::new(dir.path().join("nope.yml"))
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("tidemark init"));
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = ConfigLoader::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn write_new_round_trips_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.yml");
        let loader = ConfigLoader::new(&path);

        loader.write_new(&AppConfig::default()).unwrap();
        let loaded = loader.load().unwrap();
        assert_eq!(loaded.migrations_dir, dir.path().join("migrations"));

        assert!(loader.write_new(&AppConfig::default()).is_err());
    }
}
