//! Migration engine: the status, deploy, and resolve drivers.

use tokio_util::sync::CancellationToken;

use crate::apply::{ApplyResult, apply_with_cancel};
use crate::config::MigrationConfig;
use crate::diagnose::{DiagnoseResult, diagnose};
use crate::drift::SchemaConnector;
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationDirectory, MigrationFileManager, MigrationSource};
use crate::history::{HistorySnapshot, MigrationHistoryRepository, MigrationStatus};
use crate::resolution::{RecoveryPlan, ResolveOutcome, advise};

/// Result of `status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// The diagnosis.
    pub diagnosis: DiagnoseResult,
    /// What to do about it.
    pub plan: RecoveryPlan,
}

impl StatusReport {
    /// Check if the database is up to date.
    pub fn is_up_to_date(&self) -> bool {
        matches!(self.plan, RecoveryPlan::UpToDate)
    }

    /// Get a summary of the status.
    pub fn summary(&self) -> String {
        let mut summary = self.plan.to_string();

        if !self.diagnosis.edited_migration_names.is_empty() {
            summary.push_str(&format!(
                " Modified after being applied: {}.",
                self.diagnosis.edited_migration_names.join(", ")
            ));
        }

        summary
    }
}

/// Result of `deploy`.
#[derive(Debug, Clone)]
pub enum DeployOutcome {
    /// Pending migrations were applied (possibly none).
    Applied(ApplyResult),
    /// The history needs manual resolution first.
    Blocked(RecoveryPlan),
}

impl DeployOutcome {
    /// Get a summary of the outcome.
    pub fn summary(&self) -> String {
        match self {
            Self::Applied(result) => result.summary(),
            Self::Blocked(plan) => plan.to_string(),
        }
    }
}

/// The reconciliation engine.
///
/// Holds the three collaborators: the local migration source, the history
/// repository, and the live-database connector. The engine does not
/// serialize concurrent callers beyond the optional deploy lock.
pub struct MigrationEngine<S, H, C>
where
    S: MigrationSource,
    H: MigrationHistoryRepository,
    C: SchemaConnector,
{
    config: MigrationConfig,
    source: S,
    history: H,
    connector: C,
}

impl<H, C> MigrationEngine<MigrationFileManager, H, C>
where
    H: MigrationHistoryRepository,
    C: SchemaConnector,
{
    /// Create an engine reading migrations from the configured directory.
    pub fn from_config(config: MigrationConfig, history: H, connector: C) -> Self {
        let source = MigrationFileManager::new(&config.migrations_dir);
        Self::new(config, source, history, connector)
    }
}

impl<S, H, C> MigrationEngine<S, H, C>
where
    S: MigrationSource,
    H: MigrationHistoryRepository,
    C: SchemaConnector,
{
    /// Create a new migration engine.
    pub fn new(config: MigrationConfig, source: S, history: H, connector: C) -> Self {
        Self {
            config,
            source,
            history,
            connector,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the history repository.
    pub fn history(&self) -> &H {
        &self.history
    }

    /// Get the live-database connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Load and validate the local migration directory.
    pub async fn load_directory(&self) -> MigrateResult<MigrationDirectory> {
        self.source.load_directory().await
    }

    /// Diagnose using the configured shadow database setting.
    pub async fn diagnose(&self) -> MigrateResult<DiagnoseResult> {
        self.diagnose_with(self.config.opt_in_to_shadow_database)
            .await
    }

    /// Diagnose with an explicit shadow database setting.
    pub async fn diagnose_with(
        &self,
        opt_in_to_shadow_database: bool,
    ) -> MigrateResult<DiagnoseResult> {
        let local = self.load_directory().await?;
        diagnose(
            &local,
            &self.history,
            &self.connector,
            opt_in_to_shadow_database,
        )
        .await
    }

    /// Report the current state and what to do about it. Read-only.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let diagnosis = self.diagnose_with(false).await?;
        let plan = advise(&diagnosis)?;

        Ok(StatusReport { diagnosis, plan })
    }

    /// Apply pending migrations if the history allows it.
    pub async fn deploy(&self) -> MigrateResult<DeployOutcome> {
        self.deploy_with_cancel(CancellationToken::new()).await
    }

    /// Apply pending migrations, stopping when `cancel` is cancelled.
    pub async fn deploy_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> MigrateResult<DeployOutcome> {
        let _lock = if self.config.lock {
            Some(self.history.acquire_lock().await?)
        } else {
            None
        };

        let local = self.load_directory().await?;

        if !self.history.has_migrations_table().await?
            && self.connector.is_empty_database().await?
        {
            tracing::info!("empty database; creating migrations table");
            self.history.initialize().await?;
        }

        let diagnosis = diagnose(&local, &self.history, &self.connector, false).await?;
        let verdict = diagnosis.verdict()?;

        if !verdict.permits_apply() {
            let plan = RecoveryPlan::for_verdict(&verdict);
            tracing::warn!(%verdict, "deploy blocked");
            return Ok(DeployOutcome::Blocked(plan));
        }

        let result =
            apply_with_cancel(&diagnosis, &local, &self.history, &self.connector, cancel).await?;

        tracing::info!(summary = %result.summary(), "deploy finished");
        Ok(DeployOutcome::Applied(result))
    }

    /// Manually record the outcome of a migration.
    ///
    /// `Applied` marks a local migration as applied without running it
    /// (baseline or hotfix); the history table is created if missing.
    /// `RolledBack` marks a failed migration as reverted so it runs again.
    pub async fn resolve(&self, migration_name: &str, outcome: ResolveOutcome) -> MigrateResult<()> {
        let local = self.load_directory().await?;
        let has_table = self.history.has_migrations_table().await?;

        match outcome {
            ResolveOutcome::Applied => {
                let migration = local
                    .get(migration_name)
                    .ok_or_else(|| MigrationError::NotFound(migration_name.to_string()))?;

                if !has_table {
                    self.history.initialize().await?;
                }

                let snapshot = HistorySnapshot::from_records(&self.history.get_records().await?)?;
                if snapshot.status(migration_name) == Some(MigrationStatus::Applied) {
                    return Err(MigrationError::invalid_resolution(
                        migration_name,
                        "it is already recorded as applied",
                    ));
                }

                self.history
                    .record_applied(migration_name, &migration.checksum, 0)
                    .await?;
            }
            ResolveOutcome::RolledBack => {
                if !has_table {
                    return Err(MigrationError::invalid_resolution(
                        migration_name,
                        "the database has no migrations table",
                    ));
                }

                let snapshot = HistorySnapshot::from_records(&self.history.get_records().await?)?;
                if snapshot.status(migration_name) != Some(MigrationStatus::Failed) {
                    return Err(MigrationError::invalid_resolution(
                        migration_name,
                        "only failed migrations can be marked as rolled back",
                    ));
                }

                self.history.mark_rolled_back(migration_name).await?;
            }
        }

        tracing::info!(migration = %migration_name, outcome = outcome.flag(), "migration resolved");
        Ok(())
    }
}
