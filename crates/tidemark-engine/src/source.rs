use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tidemark_common::{Error, Migration, MigrationAction, Result, Version};
use tidemark_config::UnmatchedPolicy;
use tracing::{debug, warn};

/// `<version>_<name>.up.sql`, `<version>_<name>.down.sql` or `<version>_<name>.sql`
static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_([A-Za-z0-9_-]+)\.(up\.sql|down\.sql|sql)$").expect("valid file name regex")
});

static SECTION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^--\s*(up|down)\s*$").expect("valid section regex"));

/// Somewhere migrations come from.
///
/// Every call re-reads the underlying definitions and returns them in
/// strictly ascending version order, so calling it twice without changes in
/// between yields the same sequence.
pub trait MigrationSource: Send + Sync {
    fn migrations(&self) -> Result<Vec<Migration>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Migrations stored as SQL files in a single directory.
///
/// Two layouts are understood, and may be mixed:
///
/// * paired files: `20240101_users.up.sql` plus an optional
///   `20240101_users.down.sql`;
/// * single files: `20240101_users.sql` with `-- up` and optional `-- down`
///   section markers.
///
/// A down script that is empty or only contains comments makes the migration
/// irreversible. Hidden entries are ignored; any other entry that doesn't fit
/// the naming scheme is handled per [`UnmatchedPolicy`].
pub struct DirectorySource {
    dir: PathBuf,
    unmatched: UnmatchedPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Up,
    Down,
    Single,
}

#[derive(Default)]
struct Entry {
    version_text: String,
    name: String,
    up: Option<PathBuf>,
    down: Option<PathBuf>,
    single: Option<PathBuf>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, unmatched: UnmatchedPolicy) -> Self {
        Self {
            dir: dir.into(),
            unmatched,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn list_files(&self) -> Result<Vec<(String, PathBuf, bool)>> {
        if !self.dir.is_dir() {
            return Err(Error::Discovery(format!(
                "migrations directory {} does not exist",
                self.dir.display()
            )));
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            Error::Discovery(format!("failed to read {}: {e}", self.dir.display()))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::Discovery(format!("failed to read entry in {}: {e}", self.dir.display()))
            })?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            // follows symlinks
            let is_file = path.is_file();
            files.push((file_name, path, is_file));
        }
        // read_dir order is platform-dependent
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    fn unmatched_entry(&self, file_name: &str) -> Result<()> {
        match self.unmatched {
            UnmatchedPolicy::Skip => {
                warn!(
                    "skipping {file_name} in {}: not a migration file",
                    self.dir.display()
                );
                Ok(())
            }
            UnmatchedPolicy::Reject => Err(Error::Discovery(format!(
                "{file_name} in {} does not match <version>_<name>.sql",
                self.dir.display()
            ))),
        }
    }

    fn group(&self) -> Result<BTreeMap<Version, Entry>> {
        let mut grouped: BTreeMap<Version, Entry> = BTreeMap::new();

        for (file_name, path, is_file) in self.list_files()? {
            if file_name.starts_with('.') {
                continue;
            }
            let captures = match FILE_NAME.captures(&file_name) {
                Some(captures) if is_file => captures,
                _ => {
                    self.unmatched_entry(&file_name)?;
                    continue;
                }
            };

            let version: Version = captures[1].parse()?;
            let name = captures[2].to_string();
            let kind = match &captures[3] {
                "up.sql" => FileKind::Up,
                "down.sql" => FileKind::Down,
                _ => FileKind::Single,
            };

            let entry = grouped.entry(version).or_default();
            if entry.name.is_empty() {
                entry.version_text = captures[1].to_string();
                entry.name = name.clone();
            } else if entry.name != name || entry.version_text != captures[1] {
                return Err(Error::Discovery(format!(
                    "duplicate version {version}: {}_{} and {file_name}",
                    entry.version_text, entry.name
                )));
            }

            let slot = match kind {
                FileKind::Up => &mut entry.up,
                FileKind::Down => &mut entry.down,
                FileKind::Single => &mut entry.single,
            };
            if let Some(existing) = slot.as_ref() {
                return Err(Error::Discovery(format!(
                    "duplicate version {version}: {} and {file_name}",
                    existing.display()
                )));
            }
            *slot = Some(path);
        }

        Ok(grouped)
    }

    fn load(&self, version: Version, entry: Entry) -> Result<Migration> {
        let label = format!("{version}_{}", entry.name);
        match (entry.single, entry.up, entry.down) {
            (Some(single), None, None) => {
                let (up, down) = split_sections(&read_script(&single)?, &label)?;
                Ok(Migration::new(
                    version,
                    entry.name,
                    MigrationAction::Script(up),
                    down.map(MigrationAction::Script),
                ))
            }
            (Some(_), _, _) => Err(Error::Discovery(format!(
                "{label} is defined both as a single file and as paired up/down files"
            ))),
            (None, Some(up), down) => {
                let up = read_script(&up)?;
                let down = match down {
                    Some(path) => Some(read_script(&path)?).filter(|sql| !is_blank(sql)),
                    None => None,
                };
                Ok(Migration::new(
                    version,
                    entry.name,
                    MigrationAction::Script(up),
                    down.map(MigrationAction::Script),
                ))
            }
            (None, None, Some(down)) => Err(Error::Discovery(format!(
                "{} has no matching up action",
                down.display()
            ))),
            (None, None, None) => unreachable!("grouped entries always hold a file"),
        }
    }
}

impl MigrationSource for DirectorySource {
    fn migrations(&self) -> Result<Vec<Migration>> {
        let grouped = self.group()?;
        let mut migrations = Vec::with_capacity(grouped.len());
        for (version, entry) in grouped {
            migrations.push(self.load(version, entry)?);
        }
        debug!(
            "discovered {} migrations in {}",
            migrations.len(),
            self.dir.display()
        );
        Ok(migrations)
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Discovery(format!("failed to read {}: {e}", path.display())))
}

/// True when the script has nothing but whitespace and `--` comments.
fn is_blank(sql: &str) -> bool {
    sql.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with("--")
    })
}

/// Split a single-file migration into its up and down halves.
fn split_sections(content: &str, label: &str) -> Result<(String, Option<String>)> {
    if !content.lines().any(|line| SECTION_MARKER.is_match(line.trim())) {
        return Ok((content.trim().to_string(), None));
    }

    let mut up: Option<Vec<&str>> = None;
    let mut down: Option<Vec<&str>> = None;
    let mut in_down = None;

    for line in content.lines() {
        if let Some(captures) = SECTION_MARKER.captures(line.trim()) {
            let is_down = captures[1].eq_ignore_ascii_case("down");
            let section = if is_down { &mut down } else { &mut up };
            if section.is_some() {
                return Err(Error::Discovery(format!(
                    "{label} has more than one -- {} section",
                    captures[1].to_lowercase()
                )));
            }
            *section = Some(Vec::new());
            in_down = Some(is_down);
            continue;
        }
        let section = match in_down {
            Some(true) => down.as_mut(),
            Some(false) => up.as_mut(),
            None => None,
        };
        match section {
            Some(lines) => lines.push(line),
            None if is_blank(line) => {}
            None => {
                return Err(Error::Discovery(format!(
                    "{label} has statements before its first section marker"
                )));
            }
        }
    }

    let up = up.ok_or_else(|| Error::Discovery(format!("{label} has no -- up section")))?;
    let down = down
        .map(|lines| lines.join("\n").trim().to_string())
        .filter(|sql| !is_blank(sql));
    Ok((up.join("\n").trim().to_string(), down))
}

/// Migrations defined in Rust, typically as callbacks.
#[derive(Default)]
pub struct CodeSource {
    migrations: Vec<Migration>,
}

impl CodeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn add(
        &mut self,
        version: u64,
        name: impl Into<String>,
        up: MigrationAction,
        down: Option<MigrationAction>,
    ) -> &mut Self {
        self.migrations
            .push(Migration::new(Version::new(version), name, up, down));
        self
    }
}

impl MigrationSource for CodeSource {
    fn migrations(&self) -> Result<Vec<Migration>> {
        let mut migrations = self.migrations.clone();
        for migration in &migrations {
            migration.version.check_storable()?;
        }
        migrations.sort_by_key(|m| m.version);
        for pair in migrations.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(Error::Discovery(format!(
                    "duplicate version {}: {} and {}",
                    pair[0].version,
                    pair[0].to_ref(),
                    pair[1].to_ref()
                )));
            }
        }
        Ok(migrations)
    }

    fn describe(&self) -> String {
        format!("{} code-defined migrations", self.migrations.len())
    }
}
