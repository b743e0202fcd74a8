//! Ordered application of pending migrations.
//!
//! Pending migrations are applied strictly in ascending identifier order,
//! one at a time. The first failure is recorded in history and halts the
//! run; nothing after it is attempted.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::diagnose::{DiagnoseResult, Verdict, classify};
use crate::drift::{DriftReport, ScriptOutcome, SchemaConnector};
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationDirectory, MigrationFile};
use crate::history::MigrationHistoryRepository;
use crate::resolution::RecoveryPlan;

/// Logs recorded for a migration whose outcome was never confirmed.
pub const UNCONFIRMED_LOGS: &str =
    "apply was interrupted before the database confirmed the outcome; verify by hand";

/// Result of an apply run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    /// Migrations applied in this run, in order.
    pub applied_migration_names: Vec<String>,
    /// The migration that failed and halted the run.
    pub failed_migration: Option<FailedApply>,
    /// Whether the run stopped early on cancellation between migrations.
    pub interrupted: bool,
}

impl ApplyResult {
    /// Check if every pending migration was applied.
    pub fn is_complete(&self) -> bool {
        self.failed_migration.is_none() && !self.interrupted
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let mut summary = if self.applied_migration_names.is_empty() {
            "No migrations applied".to_string()
        } else {
            format!("{} applied", self.applied_migration_names.len())
        };

        if let Some(failed) = &self.failed_migration {
            summary.push_str(&format!("; '{}' failed", failed.migration_name));
        }
        if self.interrupted {
            summary.push_str("; interrupted");
        }

        summary
    }
}

/// A migration the database rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedApply {
    /// Migration identifier.
    pub migration_name: String,
    /// Error output from the database.
    pub logs: String,
}

/// Apply pending migrations.
///
/// `diagnosis` must resolve to [`Verdict::InSync`] or
/// [`Verdict::DatabaseIsBehind`]; anything else is a precondition violation.
/// Only the migrations the diagnosis reported as unapplied are candidates.
/// History is re-read before applying and drops candidates applied since,
/// so calling this twice in a row applies nothing the second time.
pub async fn apply<H, C>(
    diagnosis: &DiagnoseResult,
    local: &MigrationDirectory,
    history: &H,
    connector: &C,
) -> MigrateResult<ApplyResult>
where
    H: MigrationHistoryRepository + ?Sized,
    C: SchemaConnector + ?Sized,
{
    apply_with_cancel(diagnosis, local, history, connector, CancellationToken::new()).await
}

/// Apply pending migrations, stopping when `cancel` is cancelled.
///
/// Cancellation between migrations stops cleanly with
/// [`ApplyResult::interrupted`] set. Cancellation while a migration is in
/// flight records it as failed (its outcome is unknown) and returns
/// [`MigrationError::Cancelled`].
pub async fn apply_with_cancel<H, C>(
    diagnosis: &DiagnoseResult,
    local: &MigrationDirectory,
    history: &H,
    connector: &C,
    cancel: CancellationToken,
) -> MigrateResult<ApplyResult>
where
    H: MigrationHistoryRepository + ?Sized,
    C: SchemaConnector + ?Sized,
{
    ensure_applicable(&diagnosis.verdict()?)?;

    let pending = pending_migrations(diagnosis, local, history).await?;
    let mut result = ApplyResult::default();

    if pending.is_empty() {
        tracing::info!("no pending migrations");
        return Ok(result);
    }

    tracing::info!(count = pending.len(), "applying pending migrations");

    for migration in pending {
        if cancel.is_cancelled() {
            tracing::warn!(next = %migration.id, "apply cancelled between migrations");
            result.interrupted = true;
            return Ok(result);
        }

        let start = Instant::now();
        tracing::info!(migration = %migration.id, "applying migration");

        let outcome = tokio::select! {
            outcome = connector.apply_script(migration) => outcome,
            _ = cancel.cancelled() => {
                tracing::warn!(migration = %migration.id, "apply cancelled mid-migration");
                record_unconfirmed(history, migration, UNCONFIRMED_LOGS).await;
                return Err(MigrationError::Cancelled {
                    migration_name: migration.id.clone(),
                });
            }
        };

        match outcome {
            Ok(ScriptOutcome::Succeeded) => {
                let duration_ms = millis(start.elapsed());
                history
                    .record_applied(&migration.id, &migration.checksum, duration_ms)
                    .await?;
                tracing::info!(migration = %migration.id, duration_ms, "migration applied");
                result.applied_migration_names.push(migration.id.clone());
            }
            Ok(ScriptOutcome::Failed { logs }) => {
                tracing::warn!(migration = %migration.id, %logs, "migration failed; halting");
                history
                    .record_failed(&migration.id, &migration.checksum, &logs)
                    .await?;
                result.failed_migration = Some(FailedApply {
                    migration_name: migration.id.clone(),
                    logs,
                });
                return Ok(result);
            }
            Err(err) => {
                tracing::warn!(migration = %migration.id, error = %err, "migration outcome unknown");
                let logs = format!("{}: {}", UNCONFIRMED_LOGS, err);
                record_unconfirmed(history, migration, &logs).await;
                return Err(err);
            }
        }
    }

    tracing::info!(summary = %result.summary(), "apply finished");
    Ok(result)
}

/// Reject verdicts that do not permit applying.
pub fn ensure_applicable(verdict: &Verdict) -> MigrateResult<()> {
    if verdict.permits_apply() {
        return Ok(());
    }

    Err(MigrationError::precondition(
        verdict.name(),
        RecoveryPlan::for_verdict(verdict).to_string(),
    ))
}

/// Migrations the diagnosis reported as unapplied that history, re-read
/// from the database, still does not contain. Ascending identifier order.
async fn pending_migrations<'a, H>(
    diagnosis: &DiagnoseResult,
    local: &'a MigrationDirectory,
    history: &H,
) -> MigrateResult<Vec<&'a MigrationFile>>
where
    H: MigrationHistoryRepository + ?Sized,
{
    let planned = diagnosis.history.unapplied_migration_names();
    if planned.is_empty() {
        return Ok(Vec::new());
    }

    let records = history.get_records().await?;
    let fresh = classify(local, Some(&records), DriftReport::NoDrift)?;
    ensure_applicable(&fresh.verdict()?)?;

    let unapplied = fresh.history.unapplied_migration_names();
    let pending: Vec<&MigrationFile> = local
        .migrations()
        .iter()
        .filter(|m| planned.contains(&m.id) && unapplied.contains(&m.id))
        .collect();

    Ok(pending)
}

/// Record an in-flight migration as failed; the original error wins.
async fn record_unconfirmed<H>(history: &H, migration: &MigrationFile, logs: &str)
where
    H: MigrationHistoryRepository + ?Sized,
{
    if let Err(err) = history
        .record_failed(&migration.id, &migration.checksum, logs)
        .await
    {
        tracing::warn!(
            migration = %migration.id,
            error = %err,
            "could not record unconfirmed migration as failed"
        );
    }
}

/// Whole milliseconds, saturating at `i64::MAX`.
fn millis(elapsed: Duration) -> i64 {
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}
