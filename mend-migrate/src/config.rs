//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "mend.toml";

/// Default migrations directory (relative to project root)
pub const MIGRATIONS_DIR: &str = "./migrations";

/// Default history table name
pub const MIGRATIONS_TABLE: &str = "_mend_migrations";

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Path to the migrations directory.
    pub migrations_dir: PathBuf,
    /// Name of the history table.
    pub table_name: String,
    /// Whether drift detection may spin up a shadow database.
    pub opt_in_to_shadow_database: bool,
    /// Whether deploy takes the history lock before applying.
    pub lock: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from(MIGRATIONS_DIR),
            table_name: MIGRATIONS_TABLE.to_string(),
            opt_in_to_shadow_database: false,
            lock: true,
        }
    }
}

/// On-disk layout of `mend.toml`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    migrations: MigrationConfig,
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the `[migrations]` table from a config file.
    ///
    /// A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();

        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML source.
    pub fn from_toml(content: &str) -> MigrateResult<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| MigrationError::config(format!("Failed to parse config: {}", e)))?;
        Ok(file.migrations)
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the history table name.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Allow drift detection to use a shadow database.
    pub fn opt_in_to_shadow_database(mut self, opt_in: bool) -> Self {
        self.opt_in_to_shadow_database = opt_in;
        self
    }

    /// Set whether deploy takes the history lock.
    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = MigrationConfig::default();
        assert_eq!(config.migrations_dir, PathBuf::from("./migrations"));
        assert_eq!(config.table_name, "_mend_migrations");
        assert!(!config.opt_in_to_shadow_database);
        assert!(config.lock);
    }

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::new()
            .migrations_dir("./db/migrations")
            .table_name("schema_history")
            .opt_in_to_shadow_database(true)
            .lock(false);

        assert_eq!(config.migrations_dir, PathBuf::from("./db/migrations"));
        assert_eq!(config.table_name, "schema_history");
        assert!(config.opt_in_to_shadow_database);
        assert!(!config.lock);
    }

    #[test]
    fn test_config_from_toml_partial() {
        let config = MigrationConfig::from_toml(
            r#"
            [migrations]
            migrations_dir = "db/migrations"
            opt_in_to_shadow_database = true
            "#,
        )
        .unwrap();

        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert!(config.opt_in_to_shadow_database);
        assert_eq!(config.table_name, MIGRATIONS_TABLE);
    }

    #[test]
    fn test_config_from_toml_invalid() {
        let err = MigrationConfig::from_toml("[migrations]\nlock = \"yes\"").unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[tokio::test]
    async fn test_config_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = MigrationConfig::load(dir.path().join(CONFIG_FILE_NAME))
            .await
            .unwrap();
        assert_eq!(config, MigrationConfig::default());
    }

    #[tokio::test]
    async fn test_config_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "[migrations]\ntable_name = \"history\"\n")
            .await
            .unwrap();

        let config = MigrationConfig::load(&path).await.unwrap();
        assert_eq!(config.table_name, "history");
    }
}
