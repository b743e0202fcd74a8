//! Migration directory reading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MigrateResult, MigrationError};

/// Name of the script file inside each migration directory.
pub const MIGRATION_SCRIPT: &str = "up.sql";

/// A migration unit on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Path to the migration directory.
    pub path: PathBuf,
    /// Migration identifier (the directory name, timestamp-prefixed).
    pub id: String,
    /// Position in chronological order, starting at zero.
    pub ordinal: usize,
    /// Script content.
    pub script: String,
    /// Checksum of the script content.
    pub checksum: String,
}

impl MigrationFile {
    /// Create a new migration unit from its identifier and script.
    pub fn new(id: impl Into<String>, script: impl Into<String>) -> Self {
        let script = script.into();
        let checksum = compute_checksum(&script);

        Self {
            path: PathBuf::new(),
            id: id.into(),
            ordinal: 0,
            script,
            checksum,
        }
    }

    /// Set the path for this migration.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Check that the stored checksum still matches the script.
    pub fn verify_checksum(&self) -> bool {
        compute_checksum(&self.script) == self.checksum
    }
}

/// Compute the hex SHA-256 checksum of migration content.
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// The local migration set, in strictly ascending identifier order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationDirectory {
    migrations: Vec<MigrationFile>,
}

impl MigrationDirectory {
    /// Build a directory, enforcing the ordering invariant.
    ///
    /// Every identifier must sort strictly after the one before it; ordinals
    /// are reassigned from the accepted order.
    pub fn new(migrations: Vec<MigrationFile>) -> MigrateResult<Self> {
        let mut accepted: Vec<MigrationFile> = Vec::with_capacity(migrations.len());

        for (ordinal, mut migration) in migrations.into_iter().enumerate() {
            if let Some(previous) = accepted.last() {
                if previous.id == migration.id {
                    return Err(MigrationError::DuplicateMigration(migration.id));
                }
                if previous.id > migration.id {
                    return Err(MigrationError::OutOfOrder {
                        previous: previous.id.clone(),
                        current: migration.id,
                    });
                }
            }
            migration.ordinal = ordinal;
            accepted.push(migration);
        }

        Ok(Self {
            migrations: accepted,
        })
    }

    /// Migrations in chronological order.
    pub fn migrations(&self) -> &[MigrationFile] {
        &self.migrations
    }

    /// Look up a migration by identifier.
    pub fn get(&self, id: &str) -> Option<&MigrationFile> {
        self.migrations
            .binary_search_by(|m| m.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Check if a migration exists locally.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The oldest migration, if any.
    pub fn oldest(&self) -> Option<&MigrationFile> {
        self.migrations.first()
    }

    /// Identifiers in chronological order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(|m| m.id.as_str())
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Check if there are no migrations.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Source of local migration units.
#[async_trait::async_trait]
pub trait MigrationSource: Send + Sync {
    /// List all migrations in chronological order.
    async fn list_migrations(&self) -> MigrateResult<Vec<MigrationFile>>;

    /// Load and validate the migration directory.
    async fn load_directory(&self) -> MigrateResult<MigrationDirectory> {
        MigrationDirectory::new(self.list_migrations().await?)
    }
}

/// Filesystem-backed migration reader.
#[derive(Debug, Clone)]
pub struct MigrationFileManager {
    /// Directory where migrations are stored.
    migrations_dir: PathBuf,
}

impl MigrationFileManager {
    /// Create a new file manager.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Read a migration from a directory.
    async fn read_migration(&self, path: &Path) -> MigrateResult<MigrationFile> {
        let dir_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::invalid_migration("Invalid path"))?;

        validate_migration_name(dir_name)?;

        let script = tokio::fs::read_to_string(path.join(MIGRATION_SCRIPT)).await?;

        Ok(MigrationFile::new(dir_name, script).with_path(path))
    }
}

#[async_trait::async_trait]
impl MigrationSource for MigrationFileManager {
    async fn list_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        let mut migrations = Vec::new();

        if !tokio::fs::try_exists(&self.migrations_dir).await? {
            return Ok(migrations);
        }

        let mut entries = tokio::fs::read_dir(&self.migrations_dir).await?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_migration_dir(&path).await? {
                paths.push(path);
            }
        }

        // Sort by name (which is timestamp-prefixed)
        paths.sort();

        for (ordinal, path) in paths.iter().enumerate() {
            let mut migration = self.read_migration(path).await?;
            migration.ordinal = ordinal;
            migrations.push(migration);
        }

        tracing::debug!(
            dir = %self.migrations_dir.display(),
            count = migrations.len(),
            "listed local migrations"
        );

        Ok(migrations)
    }
}

/// Check if a path is a migration directory.
async fn is_migration_dir(path: &Path) -> MigrateResult<bool> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_dir() {
        return Ok(false);
    }

    // Must have a script file
    Ok(tokio::fs::try_exists(path.join(MIGRATION_SCRIPT)).await?)
}

/// Validate a migration directory name.
fn validate_migration_name(name: &str) -> MigrateResult<()> {
    // Expected format: YYYYMMDDHHMMSS_name
    let (timestamp, slug) = name.split_once('_').ok_or_else(|| {
        MigrationError::invalid_migration(format!("Invalid migration name format: {}", name))
    })?;

    if timestamp.len() != 14 || !timestamp.chars().all(|c| c.is_ascii_digit()) {
        return Err(MigrationError::invalid_migration(format!(
            "Invalid migration ID (expected timestamp): {}",
            timestamp
        )));
    }

    if slug.is_empty() {
        return Err(MigrationError::invalid_migration(format!(
            "Migration '{}' has an empty name",
            name
        )));
    }

    Ok(())
}
