//! Migration history diagnosis.
//!
//! A diagnosis compares three sources of truth:
//!
//! - the local migration directory,
//! - the history table in the database,
//! - the live schema (via drift detection).
//!
//! The raw comparison is collected into a [`DiagnoseResult`]; a single
//! evaluation function, [`DiagnoseResult::verdict`], folds it into one
//! [`Verdict`] using a fixed precedence:
//!
//! 1. no migrations table (baseline case)
//! 2. failed migrations present
//! 3. drift detected while history is behind or diverged
//! 4. database is behind
//! 5. in sync
//!
//! Edited migrations (local checksum differs from the recorded one) are a
//! side channel reported alongside whichever branch applies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::drift::{DriftReport, SchemaConnector};
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationDirectory, MigrationFile};
use crate::history::{
    AppliedRecord, FailedMigration, HistorySnapshot, MigrationHistoryRepository, MigrationStatus,
};

/// How the history table relates to the local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HistoryDiagnostic {
    /// Every local migration has been applied.
    InSync,
    /// Local migrations exist that history does not know about.
    #[serde(rename_all = "camelCase")]
    DatabaseIsBehind {
        /// Unapplied migrations, oldest first.
        unapplied_migration_names: Vec<String>,
    },
    /// History and the local directory disagree.
    HistoriesDiverge {
        /// How they disagree.
        reason: DivergenceReason,
    },
}

impl HistoryDiagnostic {
    /// Local migrations that history does not contain, oldest first.
    pub fn unapplied_migration_names(&self) -> &[String] {
        match self {
            Self::DatabaseIsBehind {
                unapplied_migration_names,
            } => unapplied_migration_names,
            Self::HistoriesDiverge {
                reason: DivergenceReason::Interleaved {
                    unapplied_migration_names,
                    ..
                },
            } => unapplied_migration_names,
            _ => &[],
        }
    }

    /// Check if history is behind or diverged.
    pub fn is_behind_or_diverged(&self) -> bool {
        !matches!(self, Self::InSync)
    }
}

/// Why history and the local directory diverge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DivergenceReason {
    /// Migrations recorded in history are absent from the local directory.
    #[serde(rename_all = "camelCase")]
    MissingLocally {
        /// The missing migrations, oldest first.
        migration_names: Vec<String>,
    },
    /// A local migration that was never applied sorts before one that was.
    #[serde(rename_all = "camelCase")]
    Interleaved {
        /// Last migration both sides agree on.
        last_common_migration_name: Option<String>,
        /// Local migrations history does not contain, oldest first.
        unapplied_migration_names: Vec<String>,
    },
}

impl fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLocally { migration_names } => write!(
                f,
                "applied migrations missing from the migrations directory: {}",
                migration_names.join(", ")
            ),
            Self::Interleaved {
                last_common_migration_name,
                unapplied_migration_names,
            } => {
                write!(
                    f,
                    "unapplied migrations {} sort before already-applied ones",
                    unapplied_migration_names.join(", ")
                )?;
                if let Some(last) = last_common_migration_name {
                    write!(f, " (last common migration: {})", last)?;
                }
                Ok(())
            }
        }
    }
}

/// Everything a single diagnosis call observed.
///
/// Computed fresh on every call; never cache it across calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseResult {
    /// Whether the history table exists.
    pub has_migrations_table: bool,
    /// History versus local directory.
    pub history: HistoryDiagnostic,
    /// Live schema versus history.
    pub drift: DriftReport,
    /// Unresolved failed migrations, oldest attempt first.
    pub failed_migrations: Vec<FailedMigration>,
    /// Applied migrations whose local content changed since applying.
    pub edited_migration_names: Vec<String>,
}

/// The single state a diagnosis resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No history table: the database predates migration tracking.
    NoMigrationsTable {
        /// Local migrations, oldest first.
        local_migration_names: Vec<String>,
    },
    /// At least one migration failed and was not resolved.
    FailedMigrations {
        /// The earliest failed attempt.
        earliest: FailedMigration,
        /// Later failures, ordered by attempt time.
        later: Vec<FailedMigration>,
    },
    /// The live schema drifted while history is behind or diverged.
    DriftWithDivergence {
        /// The history comparison.
        history: HistoryDiagnostic,
        /// Script that would revert the drift, if computed.
        rollback: Option<String>,
    },
    /// Pending migrations can be applied.
    DatabaseIsBehind {
        /// Unapplied migrations, oldest first.
        unapplied_migration_names: Vec<String>,
    },
    /// Nothing to do.
    InSync,
}

impl Verdict {
    /// Short human-readable name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoMigrationsTable { .. } => "no migrations table",
            Self::FailedMigrations { .. } => "failed migrations",
            Self::DriftWithDivergence { .. } => "drift detected",
            Self::DatabaseIsBehind { .. } => "database is behind",
            Self::InSync => "in sync",
        }
    }

    /// Check if pending migrations may be applied in this state.
    pub fn permits_apply(&self) -> bool {
        matches!(self, Self::DatabaseIsBehind { .. } | Self::InSync)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl DiagnoseResult {
    /// Names of failed migrations, oldest attempt first.
    pub fn failed_migration_names(&self) -> Vec<&str> {
        self.failed_migrations
            .iter()
            .map(|f| f.migration_name.as_str())
            .collect()
    }

    /// Fold the observations into exactly one [`Verdict`].
    ///
    /// Shapes that cannot arise from a consistent database are rejected:
    /// contradictions are `CorruptHistory`, combinations outside the
    /// precedence table are `UnknownState`.
    pub fn verdict(&self) -> MigrateResult<Verdict> {
        if !self.has_migrations_table {
            if !self.failed_migrations.is_empty() {
                return Err(MigrationError::corrupt_history(
                    "failed migrations reported for a database without a migrations table",
                ));
            }
            if self.drift.has_drift() {
                return Err(MigrationError::corrupt_history(
                    "drift reported for a database without a migrations table",
                ));
            }
            return match &self.history {
                HistoryDiagnostic::InSync => Ok(Verdict::NoMigrationsTable {
                    local_migration_names: Vec::new(),
                }),
                HistoryDiagnostic::DatabaseIsBehind {
                    unapplied_migration_names,
                } => Ok(Verdict::NoMigrationsTable {
                    local_migration_names: unapplied_migration_names.clone(),
                }),
                HistoryDiagnostic::HistoriesDiverge { .. } => Err(MigrationError::corrupt_history(
                    "diverged history reported for a database without a migrations table",
                )),
            };
        }

        let mut failed = self.failed_migrations.clone();
        failed.sort();
        let mut failed = failed.into_iter();
        if let Some(earliest) = failed.next() {
            return Ok(Verdict::FailedMigrations {
                earliest,
                later: failed.collect(),
            });
        }

        match (&self.drift, &self.history) {
            (DriftReport::DriftDetected { rollback }, history)
                if history.is_behind_or_diverged() =>
            {
                Ok(Verdict::DriftWithDivergence {
                    history: history.clone(),
                    rollback: rollback.clone(),
                })
            }
            (
                DriftReport::NoDrift,
                HistoryDiagnostic::DatabaseIsBehind {
                    unapplied_migration_names,
                },
            ) => {
                if unapplied_migration_names.is_empty() {
                    return Err(MigrationError::corrupt_history(
                        "database reported behind with no unapplied migrations",
                    ));
                }
                Ok(Verdict::DatabaseIsBehind {
                    unapplied_migration_names: unapplied_migration_names.clone(),
                })
            }
            (DriftReport::NoDrift, HistoryDiagnostic::InSync) => Ok(Verdict::InSync),
            (DriftReport::DriftDetected { .. }, _) => Err(MigrationError::unknown_state(
                "the live schema drifted although every local migration is applied",
                "inspect the database for manual changes, then run `mend db pull` to re-introspect the schema and capture them in a new migration",
            )),
            (DriftReport::NoDrift, HistoryDiagnostic::HistoriesDiverge { reason }) => {
                Err(MigrationError::unknown_state(
                    format!("migration history diverges without drift: {}", reason),
                    divergence_help(reason),
                ))
            }
        }
    }
}

fn divergence_help(reason: &DivergenceReason) -> String {
    match reason {
        DivergenceReason::MissingLocally { migration_names } => format!(
            "restore the missing migration directories ({}) from version control",
            migration_names.join(", ")
        ),
        DivergenceReason::Interleaved {
            unapplied_migration_names,
            ..
        } => match unapplied_migration_names.first() {
            Some(first) => format!(
                "rename {} so it sorts after the applied migrations, or run `mend migrate resolve --applied {}` if its changes are already in the database",
                first, first
            ),
            None => "run `mend migrate status` to inspect the history".to_string(),
        },
    }
}

/// Compare raw history against the local directory.
///
/// `records` is `None` when the history table does not exist. `drift` is
/// taken as given; see [`diagnose`] for when it is probed.
pub fn classify(
    local: &MigrationDirectory,
    records: Option<&[AppliedRecord]>,
    drift: DriftReport,
) -> MigrateResult<DiagnoseResult> {
    let Some(records) = records else {
        let unapplied: Vec<String> = local.ids().map(String::from).collect();
        let history = if unapplied.is_empty() {
            HistoryDiagnostic::InSync
        } else {
            HistoryDiagnostic::DatabaseIsBehind {
                unapplied_migration_names: unapplied,
            }
        };

        tracing::debug!("no migrations table; treating database as a baseline candidate");

        return Ok(DiagnoseResult {
            has_migrations_table: false,
            history,
            drift: DriftReport::NoDrift,
            failed_migrations: Vec::new(),
            edited_migration_names: Vec::new(),
        });
    };

    let snapshot = HistorySnapshot::from_records(records)?;
    Ok(classify_snapshot(local, &snapshot, drift))
}

fn classify_snapshot(
    local: &MigrationDirectory,
    snapshot: &HistorySnapshot,
    drift: DriftReport,
) -> DiagnoseResult {
    let history = compare_histories(local, snapshot);
    let failed_migrations = snapshot.failed();
    let edited_migration_names = edited_migrations(local, snapshot);

    for name in &edited_migration_names {
        tracing::warn!(migration = %name, "migration was modified after it was applied");
    }

    tracing::debug!(?history, drift = drift.has_drift(), "classified migration history");

    DiagnoseResult {
        has_migrations_table: true,
        history,
        drift,
        failed_migrations,
        edited_migration_names,
    }
}

fn compare_histories(local: &MigrationDirectory, snapshot: &HistorySnapshot) -> HistoryDiagnostic {
    let missing: Vec<String> = snapshot
        .present()
        .filter(|r| !local.contains(&r.migration_name))
        .map(|r| r.migration_name.clone())
        .collect();

    if !missing.is_empty() {
        return HistoryDiagnostic::HistoriesDiverge {
            reason: DivergenceReason::MissingLocally {
                migration_names: missing,
            },
        };
    }

    let migrations = local.migrations();
    let Some(first_unapplied) = migrations.iter().position(|m| !snapshot.is_present(&m.id)) else {
        return HistoryDiagnostic::InSync;
    };

    let unapplied_migration_names: Vec<String> = migrations[first_unapplied..]
        .iter()
        .filter(|m| !snapshot.is_present(&m.id))
        .map(|m| m.id.clone())
        .collect();

    let applied_after_gap = migrations[first_unapplied..]
        .iter()
        .any(|m| snapshot.is_present(&m.id));

    if applied_after_gap {
        let last_common_migration_name = first_unapplied
            .checked_sub(1)
            .map(|idx| migrations[idx].id.clone());

        return HistoryDiagnostic::HistoriesDiverge {
            reason: DivergenceReason::Interleaved {
                last_common_migration_name,
                unapplied_migration_names,
            },
        };
    }

    HistoryDiagnostic::DatabaseIsBehind {
        unapplied_migration_names,
    }
}

fn edited_migrations(local: &MigrationDirectory, snapshot: &HistorySnapshot) -> Vec<String> {
    snapshot
        .present()
        .filter_map(|record| {
            let migration = local.get(&record.migration_name)?;
            (migration.checksum != record.checksum).then(|| record.migration_name.clone())
        })
        .collect()
}

/// Run a full diagnosis against the database collaborators.
///
/// Drift is only probed when the history table exists and no migration has
/// failed; when `opt_in_to_shadow_database` is false any rollback script the
/// connector returns is discarded. Collaborator errors are returned as-is.
pub async fn diagnose<H, C>(
    local: &MigrationDirectory,
    history: &H,
    connector: &C,
    opt_in_to_shadow_database: bool,
) -> MigrateResult<DiagnoseResult>
where
    H: MigrationHistoryRepository + ?Sized,
    C: SchemaConnector + ?Sized,
{
    if !history.has_migrations_table().await? {
        return classify(local, None, DriftReport::NoDrift);
    }

    let records = history.get_records().await?;
    let snapshot = HistorySnapshot::from_records(&records)?;

    let drift = if snapshot.failed().is_empty() {
        let applied: Vec<MigrationFile> = local
            .migrations()
            .iter()
            .filter(|m| snapshot.status(&m.id) == Some(MigrationStatus::Applied))
            .cloned()
            .collect();

        let report = connector
            .detect_drift(&applied, opt_in_to_shadow_database)
            .await?;

        if opt_in_to_shadow_database {
            report
        } else {
            report.without_rollback()
        }
    } else {
        DriftReport::NoDrift
    };

    Ok(classify_snapshot(local, &snapshot, drift))
}
