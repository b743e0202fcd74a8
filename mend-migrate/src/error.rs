//! Error types for the reconciliation engine.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur while diagnosing, advising, or applying migrations.
///
/// Divergent history (failed migrations, drift) is *not* an error: it is a
/// diagnosis branch. The variants below are the cases where the engine cannot
/// or must not continue.
#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(mend::io))]
    Io(#[from] std::io::Error),

    /// The database collaborator could not be reached.
    #[error("Database unreachable: {0}")]
    #[diagnostic(
        code(mend::connectivity),
        help("check the database URL and network access, then re-run the command")
    )]
    Connectivity(String),

    /// Persisted history is malformed.
    #[error("Corrupt migration history: {0}")]
    #[diagnostic(
        code(mend::corrupt_history),
        help("inspect the migrations table by hand; this cannot be repaired automatically")
    )]
    CorruptHistory(String),

    /// A diagnosis did not match any known state.
    #[error("Unknown migration state: {detail}")]
    #[diagnostic(code(mend::unknown_state), help("{help}"))]
    UnknownState {
        /// What was observed.
        detail: String,
        /// Recommended remediation.
        help: String,
    },

    /// An operation was invoked on a diagnosis that does not permit it.
    #[error("Cannot apply migrations while the database is in state '{state}'")]
    #[diagnostic(code(mend::precondition), help("{help}"))]
    PreconditionViolation {
        /// Short name of the blocking state.
        state: String,
        /// Recommended remediation.
        help: String,
    },

    /// Invalid migration directory or content.
    #[error("Invalid migration: {0}")]
    #[diagnostic(code(mend::invalid_migration))]
    InvalidMigration(String),

    /// A migration identifier does not sort after its predecessor.
    #[error("Migration '{current}' does not sort after '{previous}'")]
    #[diagnostic(
        code(mend::out_of_order),
        help("rename the migration directory so its timestamp prefix is later than '{previous}'")
    )]
    OutOfOrder {
        /// The preceding identifier.
        previous: String,
        /// The offending identifier.
        current: String,
    },

    /// Two migrations share an identifier.
    #[error("Duplicate migration identifier '{0}'")]
    #[diagnostic(code(mend::duplicate_migration))]
    DuplicateMigration(String),

    /// Migration not found.
    #[error("Migration '{0}' not found")]
    #[diagnostic(code(mend::not_found))]
    NotFound(String),

    /// A manual resolution request is not valid for the current history.
    #[error("Cannot resolve migration '{migration_name}': {reason}")]
    #[diagnostic(code(mend::invalid_resolution))]
    InvalidResolution {
        /// Migration the resolution targeted.
        migration_name: String,
        /// Why it was refused.
        reason: String,
    },

    /// The caller cancelled an in-flight migration.
    #[error("Applying migration '{migration_name}' was cancelled before its outcome was confirmed")]
    #[diagnostic(
        code(mend::cancelled),
        help(
            "verify the database by hand, then run `mend migrate resolve --applied {migration_name}` or `mend migrate resolve --rolled-back {migration_name}`"
        )
    )]
    Cancelled {
        /// The migration that was in flight.
        migration_name: String,
    },

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    #[diagnostic(code(mend::config))]
    Config(String),
}

impl MigrationError {
    /// Create a connectivity error.
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity(msg.into())
    }

    /// Create a corrupt history error.
    pub fn corrupt_history(msg: impl Into<String>) -> Self {
        Self::CorruptHistory(msg.into())
    }

    /// Create an unknown state error.
    pub fn unknown_state(detail: impl Into<String>, help: impl Into<String>) -> Self {
        Self::UnknownState {
            detail: detail.into(),
            help: help.into(),
        }
    }

    /// Create a precondition violation.
    pub fn precondition(state: impl Into<String>, help: impl Into<String>) -> Self {
        Self::PreconditionViolation {
            state: state.into(),
            help: help.into(),
        }
    }

    /// Create an invalid migration error.
    pub fn invalid_migration(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create an invalid resolution error.
    pub fn invalid_resolution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResolution {
            migration_name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if the caller may retry the whole diagnose/apply cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Check if this error requires manual intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CorruptHistory(_) | Self::UnknownState { .. } | Self::PreconditionViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::NotFound("20231215120000_init".to_string());
        assert!(err.to_string().contains("20231215120000_init"));
    }

    #[test]
    fn test_out_of_order_display() {
        let err = MigrationError::OutOfOrder {
            previous: "20240102000000_b".to_string(),
            current: "20240101000000_a".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("20240102000000_b"));
        assert!(msg.contains("20240101000000_a"));
    }

    #[test]
    fn test_precondition_help_names_command() {
        let err = MigrationError::precondition(
            "failed migrations",
            "run `mend migrate resolve --rolled-back 20240101000000_a`",
        );
        let help = err.help().map(|h| h.to_string()).unwrap_or_default();
        assert!(help.contains("mend migrate resolve"));
    }

    #[test]
    fn test_classification() {
        assert!(MigrationError::connectivity("timeout").is_retryable());
        assert!(!MigrationError::corrupt_history("no checksum").is_retryable());
        assert!(MigrationError::corrupt_history("no checksum").is_fatal());
        assert!(MigrationError::precondition("drift", "fix it").is_fatal());
        assert!(!MigrationError::NotFound("x".to_string()).is_fatal());
    }
}
