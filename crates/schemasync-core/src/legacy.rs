//! Legacy file-based migrations
//!
//! Before the declarative engine took over, schema changes were ordered SQL
//! files named `<version>_<name>.sql`. The history of which ones ran lives in
//! the database as `MigrationRecord`s.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// A previously applied migration, as recorded in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration version
    pub version: u64,

    /// Migration name
    pub name: String,

    /// Checksum of the SQL that was applied
    pub checksum: String,

    /// When it was applied (RFC 3339)
    pub applied_at: Option<String>,
}

impl MigrationRecord {
    /// `<version>_<name>`
    pub fn label(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }
}

/// A migration file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMigration {
    /// Version parsed from the file name
    pub version: u64,

    /// Name parsed from the file name
    pub name: String,

    /// SQL body
    pub sql: String,

    /// Hex SHA-256 of the SQL body
    pub checksum: String,
}

impl LegacyMigration {
    /// Create a migration, computing its checksum
    pub fn new(version: u64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            version,
            name: name.into(),
            checksum: checksum(&sql),
            sql,
        }
    }

    /// `<version>_<name>`
    pub fn label(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }

    /// The history record this migration produces once applied
    pub fn record(&self) -> MigrationRecord {
        MigrationRecord {
            version: self.version,
            name: self.name.clone(),
            checksum: self.checksum.clone(),
            applied_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Hex SHA-256 digest of a migration body
pub fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<version>\d+)_(?P<name>[A-Za-z0-9_\-]+)\.sql$").expect("valid migration file regex")
    })
}

/// Parse `<version>_<name>.sql`
pub fn parse_file_name(file_name: &str) -> Option<(u64, String)> {
    let captures = file_name_pattern().captures(file_name)?;
    let version = captures["version"].parse().ok()?;
    Some((version, captures["name"].to_string()))
}

/// Comparison of on-disk migrations against the recorded history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Not yet recorded, in apply order
    pub pending: Vec<LegacyMigration>,

    /// Recorded and unchanged
    pub applied: Vec<MigrationRecord>,

    /// Recorded, but the file no longer matches the recorded checksum
    pub modified: Vec<(MigrationRecord, LegacyMigration)>,

    /// Recorded, but no file exists any more
    pub missing: Vec<MigrationRecord>,
}

/// Ordered set of legacy migrations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSource {
    migrations: Vec<LegacyMigration>,
}

impl MigrationSource {
    /// Build from migrations in any order
    pub fn new(migrations: Vec<LegacyMigration>) -> Result<Self, LegacySourceError> {
        let mut by_version: BTreeMap<u64, LegacyMigration> = BTreeMap::new();
        for migration in migrations {
            if let Some(existing) = by_version.get(&migration.version) {
                return Err(LegacySourceError::DuplicateVersion {
                    version: migration.version,
                    first: existing.label(),
                    second: migration.label(),
                });
            }
            by_version.insert(migration.version, migration);
        }
        Ok(Self {
            migrations: by_version.into_values().collect(),
        })
    }

    /// Discover `*.sql` files below `dir`
    ///
    /// A missing directory yields an empty source.
    pub fn from_dir(dir: &Path) -> Result<Self, LegacySourceError> {
        if !dir.exists() {
            return Ok(Self::default());
        }

        let mut migrations = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| LegacySourceError::IoError {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "sql") {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            let (version, name) = parse_file_name(&file_name).ok_or_else(|| {
                LegacySourceError::InvalidFileName(path.to_path_buf())
            })?;

            let sql = std::fs::read_to_string(path).map_err(|e| LegacySourceError::IoError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            migrations.push(LegacyMigration::new(version, name, sql));
        }

        Self::new(migrations)
    }

    /// Migrations in apply order
    pub fn migrations(&self) -> &[LegacyMigration] {
        &self.migrations
    }

    /// Number of migrations
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether there are no migrations
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Compare against the recorded history
    ///
    /// Pending migrations are the complement of the history, in version order.
    pub fn status(&self, history: &[MigrationRecord]) -> MigrationStatus {
        let recorded: BTreeMap<u64, &MigrationRecord> =
            history.iter().map(|r| (r.version, r)).collect();

        let mut status = MigrationStatus::default();
        for migration in &self.migrations {
            match recorded.get(&migration.version) {
                None => status.pending.push(migration.clone()),
                Some(record) if record.checksum != migration.checksum => {
                    status.modified.push(((*record).clone(), migration.clone()))
                }
                Some(record) => status.applied.push((*record).clone()),
            }
        }

        status.missing = history
            .iter()
            .filter(|r| !self.migrations.iter().any(|m| m.version == r.version))
            .cloned()
            .collect();

        status
    }
}

/// Errors reading the legacy migration directory
#[derive(Debug, thiserror::Error)]
pub enum LegacySourceError {
    #[error("IO error reading {path}: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Migration file name must look like <version>_<name>.sql: {0}")]
    InvalidFileName(PathBuf),

    #[error("Migration version {version} is used by both {first} and {second}")]
    DuplicateVersion {
        version: u64,
        first: String,
        second: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_parsing() {
        assert_eq!(
            parse_file_name("20240101_create_seller.sql"),
            Some((20240101, "create_seller".to_string()))
        );
        assert_eq!(parse_file_name("create_seller.sql"), None);
        assert_eq!(parse_file_name("0001_init.txt"), None);
    }

    #[test]
    fn checksum_is_stable() {
        let a = LegacyMigration::new(1, "init", "CREATE TABLE a (id text);");
        let b = LegacyMigration::new(1, "init", "CREATE TABLE a (id text);");
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 64);
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let result = MigrationSource::new(vec![
            LegacyMigration::new(1, "a", "select 1"),
            LegacyMigration::new(1, "b", "select 2"),
        ]);
        assert!(matches!(result, Err(LegacySourceError::DuplicateVersion { version: 1, .. })));
    }

    #[test]
    fn status_is_the_complement_of_history() {
        let source = MigrationSource::new(vec![
            LegacyMigration::new(3, "third", "select 3"),
            LegacyMigration::new(1, "first", "select 1"),
            LegacyMigration::new(2, "second", "select 2"),
        ])
        .unwrap();

        let history = vec![
            LegacyMigration::new(1, "first", "select 1").record(),
            LegacyMigration::new(2, "second", "select 2 -- edited").record(),
            LegacyMigration::new(9, "gone", "select 9").record(),
        ];

        let status = source.status(&history);
        let pending: Vec<u64> = status.pending.iter().map(|m| m.version).collect();
        assert_eq!(pending, vec![3]);
        assert_eq!(status.applied.len(), 1);
        assert_eq!(status.modified.len(), 1);
        assert_eq!(status.missing[0].version, 9);
    }

    #[test]
    fn from_dir_orders_by_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10_later.sql"), "select 10").unwrap();
        std::fs::write(dir.path().join("2_earlier.sql"), "select 2").unwrap();
        std::fs::write(dir.path().join("notes.md"), "not a migration").unwrap();

        let source = MigrationSource::from_dir(dir.path()).unwrap();
        let versions: Vec<u64> = source.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 10]);
    }

    #[test]
    fn from_dir_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("init.sql"), "select 1").unwrap();

        assert!(matches!(
            MigrationSource::from_dir(dir.path()),
            Err(LegacySourceError::InvalidFileName(_))
        ));
    }

    #[test]
    fn missing_dir_is_empty() {
        let source = MigrationSource::from_dir(Path::new("/no/such/migrations")).unwrap();
        assert!(source.is_empty());
    }
}
