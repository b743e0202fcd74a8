//! Recovery advice for a diagnosed migration history.
//!
//! The advisor turns a [`Verdict`] into a [`RecoveryPlan`]: what, if
//! anything, a human must do before migrations can be applied again. Manual
//! repairs are expressed as `resolve` commands that mark a migration as
//! applied (it was hotfixed or its changes already exist) or rolled back
//! (its partial changes were reverted by hand).
//!
//! # Example
//!
//! ```rust,ignore
//! use mend_migrate::resolution::advise;
//!
//! let diagnosis = engine.diagnose().await?;
//! let plan = advise(&diagnosis)?;
//!
//! for command in plan.commands() {
//!     println!("{command}");
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnose::{DiagnoseResult, DivergenceReason, HistoryDiagnostic, Verdict};
use crate::error::MigrateResult;
use crate::history::FailedMigration;

/// Command that re-introspects the live database into the schema definition.
pub const REINTROSPECT_COMMAND: &str = "mend db pull";

/// How a manual resolution marks a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// The migration's changes are in the database.
    Applied,
    /// The migration's changes were reverted.
    RolledBack,
}

impl ResolveOutcome {
    /// Command-line flag selecting this outcome.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Applied => "--applied",
            Self::RolledBack => "--rolled-back",
        }
    }
}

/// A `resolve` invocation the user can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveCommand {
    /// Migration to resolve.
    pub migration_name: String,
    /// Outcome to record.
    pub outcome: ResolveOutcome,
}

impl ResolveCommand {
    /// Mark a migration as applied.
    pub fn applied(migration_name: impl Into<String>) -> Self {
        Self {
            migration_name: migration_name.into(),
            outcome: ResolveOutcome::Applied,
        }
    }

    /// Mark a migration as rolled back.
    pub fn rolled_back(migration_name: impl Into<String>) -> Self {
        Self {
            migration_name: migration_name.into(),
            outcome: ResolveOutcome::RolledBack,
        }
    }
}

impl fmt::Display for ResolveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mend migrate resolve {} {}",
            self.outcome.flag(),
            self.migration_name
        )
    }
}

/// What to do about a diagnosed history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryPlan {
    /// No migrations table and no local migrations: nothing to baseline from.
    BaselineImpossible,
    /// No migrations table: mark the oldest local migration as applied.
    Baseline {
        /// The baseline candidate.
        migration_name: String,
    },
    /// A migration failed; it must be resolved one way or the other.
    ResolveFailed {
        /// The oldest failed migration.
        migration_name: String,
        /// Error output of the failed attempt.
        logs: Option<String>,
        /// Later failures, to be resolved in subsequent passes.
        remaining_failed: Vec<String>,
    },
    /// The live schema drifted while history is behind or diverged.
    ReconcileDrift {
        /// First unapplied migration, if any, to mark as applied.
        migration_name: Option<String>,
        /// Why history diverged, when it did.
        divergence: Option<DivergenceReason>,
        /// Script that would revert the drift, if computed.
        rollback: Option<String>,
    },
    /// Nothing to resolve; pending migrations can be applied.
    ApplyPending {
        /// Pending migrations, oldest first.
        migration_names: Vec<String>,
    },
    /// Database schema is up to date.
    UpToDate,
}

impl RecoveryPlan {
    /// Build the plan for a verdict.
    pub fn for_verdict(verdict: &Verdict) -> Self {
        match verdict {
            Verdict::NoMigrationsTable {
                local_migration_names,
            } => match local_migration_names.first() {
                Some(oldest) => Self::Baseline {
                    migration_name: oldest.clone(),
                },
                None => Self::BaselineImpossible,
            },
            Verdict::FailedMigrations { earliest, later } => {
                let mut failed: Vec<&FailedMigration> =
                    std::iter::once(earliest).chain(later).collect();
                failed.sort();
                let first = failed.remove(0);
                Self::ResolveFailed {
                    migration_name: first.migration_name.clone(),
                    logs: first.logs.clone(),
                    remaining_failed: failed
                        .into_iter()
                        .map(|f| f.migration_name.clone())
                        .collect(),
                }
            }
            Verdict::DriftWithDivergence { history, rollback } => Self::ReconcileDrift {
                migration_name: history.unapplied_migration_names().first().cloned(),
                divergence: match history {
                    HistoryDiagnostic::HistoriesDiverge { reason } => Some(reason.clone()),
                    _ => None,
                },
                rollback: rollback.clone(),
            },
            Verdict::DatabaseIsBehind {
                unapplied_migration_names,
            } => Self::ApplyPending {
                migration_names: unapplied_migration_names.clone(),
            },
            Verdict::InSync => Self::UpToDate,
        }
    }

    /// Resolve commands offered by this plan.
    ///
    /// For a failed migration the two commands are alternatives: run exactly one.
    pub fn commands(&self) -> Vec<ResolveCommand> {
        match self {
            Self::Baseline { migration_name } => vec![ResolveCommand::applied(migration_name)],
            Self::ResolveFailed { migration_name, .. } => vec![
                ResolveCommand::rolled_back(migration_name),
                ResolveCommand::applied(migration_name),
            ],
            Self::ReconcileDrift {
                migration_name: Some(name),
                ..
            } => vec![ResolveCommand::applied(name)],
            _ => Vec::new(),
        }
    }

    /// Check if a human must act before migrations can be applied.
    pub fn requires_manual_action(&self) -> bool {
        !matches!(self, Self::ApplyPending { .. } | Self::UpToDate)
    }
}

impl fmt::Display for RecoveryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaselineImpossible => write!(
                f,
                "The database has no migrations table and there are no local migrations to baseline from. \
                 Run `{}` to introspect the database, then create an initial migration.",
                REINTROSPECT_COMMAND
            ),
            Self::Baseline { migration_name } => write!(
                f,
                "The database has no migrations table. If its schema already matches '{}', \
                 baseline it with `{}`.",
                migration_name,
                ResolveCommand::applied(migration_name)
            ),
            Self::ResolveFailed {
                migration_name,
                remaining_failed,
                ..
            } => {
                write!(
                    f,
                    "Migration '{}' failed. If you reverted its changes by hand, run `{}`. \
                     If you fixed the database by hand, run `{}`.",
                    migration_name,
                    ResolveCommand::rolled_back(migration_name),
                    ResolveCommand::applied(migration_name)
                )?;
                if !remaining_failed.is_empty() {
                    write!(
                        f,
                        " {} more failed migration(s) must be resolved afterwards: {}.",
                        remaining_failed.len(),
                        remaining_failed.join(", ")
                    )?;
                }
                Ok(())
            }
            Self::ReconcileDrift {
                migration_name,
                divergence,
                ..
            } => {
                write!(f, "Drift detected: the database schema does not match the migration history.")?;
                if let Some(reason) = divergence {
                    write!(f, " History diverges: {}.", reason)?;
                }
                if let Some(name) = migration_name {
                    write!(
                        f,
                        " If the changes of '{}' are already in the database, run `{}`.",
                        name,
                        ResolveCommand::applied(name)
                    )?;
                }
                write!(
                    f,
                    " To capture the drift in your schema definition, run `{}`.",
                    REINTROSPECT_COMMAND
                )
            }
            Self::ApplyPending { migration_names } => write!(
                f,
                "{} pending migration(s) can be applied: {}",
                migration_names.len(),
                migration_names.join(", ")
            ),
            Self::UpToDate => write!(f, "Database schema is up to date."),
        }
    }
}

/// Compute the recovery plan for a diagnosis.
///
/// Pure: no I/O. Only malformed diagnoses are rejected (see
/// [`DiagnoseResult::verdict`]); every well-formed one has a plan.
pub fn advise(diagnosis: &DiagnoseResult) -> MigrateResult<RecoveryPlan> {
    let verdict = diagnosis.verdict()?;
    let plan = RecoveryPlan::for_verdict(&verdict);

    tracing::debug!(%verdict, manual = plan.requires_manual_action(), "advised recovery plan");

    Ok(plan)
}
