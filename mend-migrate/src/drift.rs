//! Drift reporting and the live-database collaborator.
//!
//! Drift is a discrepancy between the live schema and the schema implied by
//! fully-applied history. Computing it (and the rollback script that would
//! undo it) is the connector's job; it may spin up a throwaway shadow
//! database to do so, but only when the caller opted in.

use serde::{Deserialize, Serialize};

use crate::error::MigrateResult;
use crate::file::MigrationFile;

/// Result of comparing the live schema against history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DriftReport {
    /// Live schema matches history.
    #[default]
    NoDrift,
    /// Live schema differs from history.
    DriftDetected {
        /// Script that would revert the drift; only computed with a shadow database.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rollback: Option<String>,
    },
}

impl DriftReport {
    /// Drift without a rollback script.
    pub fn detected() -> Self {
        Self::DriftDetected { rollback: None }
    }

    /// Drift with a rollback script.
    pub fn with_rollback(script: impl Into<String>) -> Self {
        Self::DriftDetected {
            rollback: Some(script.into()),
        }
    }

    /// Check if there's any drift.
    pub fn has_drift(&self) -> bool {
        matches!(self, Self::DriftDetected { .. })
    }

    /// The rollback script, if one was computed.
    pub fn rollback(&self) -> Option<&str> {
        match self {
            Self::DriftDetected { rollback } => rollback.as_deref(),
            Self::NoDrift => None,
        }
    }

    /// Drop the rollback script, keeping the drift verdict.
    pub fn without_rollback(self) -> Self {
        match self {
            Self::DriftDetected { .. } => Self::detected(),
            Self::NoDrift => Self::NoDrift,
        }
    }
}

/// Outcome of running one migration script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// The database confirmed the script succeeded.
    Succeeded,
    /// The database rejected the script.
    Failed {
        /// Error output from the database.
        logs: String,
    },
}

/// Live-database operations the engine consumes.
///
/// An `Err` from any method means the collaborator could not give a definite
/// answer (typically [`MigrationError::Connectivity`](crate::MigrationError::Connectivity)).
#[async_trait::async_trait]
pub trait SchemaConnector: Send + Sync {
    /// Compare the live schema with the schema `applied` produces.
    async fn detect_drift(
        &self,
        applied: &[MigrationFile],
        opt_in_to_shadow_database: bool,
    ) -> MigrateResult<DriftReport>;

    /// Run one migration script against the live database.
    async fn apply_script(&self, migration: &MigrationFile) -> MigrateResult<ScriptOutcome>;

    /// Check whether the database holds no user schema at all.
    async fn is_empty_database(&self) -> MigrateResult<bool>;
}
