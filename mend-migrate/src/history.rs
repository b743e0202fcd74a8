//! Migration history tracking.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// A record of one apply attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// Migration identifier.
    pub migration_name: String,
    /// Checksum of the migration content at apply time.
    pub checksum: String,
    /// When the attempt was made.
    pub applied_at: DateTime<Utc>,
    /// Duration of the attempt in milliseconds.
    pub duration_ms: i64,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// When the attempt was marked as rolled back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Error output captured on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl AppliedRecord {
    /// A successful apply.
    pub fn applied(
        migration_name: impl Into<String>,
        checksum: impl Into<String>,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            migration_name: migration_name.into(),
            checksum: checksum.into(),
            applied_at,
            duration_ms: 0,
            success: true,
            rolled_back_at: None,
            logs: None,
        }
    }

    /// A failed apply.
    pub fn failed(
        migration_name: impl Into<String>,
        checksum: impl Into<String>,
        applied_at: DateTime<Utc>,
        logs: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            logs: Some(logs.into()),
            ..Self::applied(migration_name, checksum, applied_at)
        }
    }

    /// Set the rollback timestamp.
    pub fn rolled_back(mut self, at: DateTime<Utc>) -> Self {
        self.rolled_back_at = Some(at);
        self
    }

    /// Status this record implies on its own.
    pub fn status(&self) -> MigrationStatus {
        if self.rolled_back_at.is_some() {
            MigrationStatus::RolledBack
        } else if self.success {
            MigrationStatus::Applied
        } else {
            MigrationStatus::Failed
        }
    }
}

/// Current status of a migration identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Applied successfully.
    Applied,
    /// Attempted and failed, not yet resolved.
    Failed,
    /// Rolled back; counts as not applied.
    RolledBack,
}

/// A migration whose latest attempt failed.
///
/// Ordered by attempt time, then identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMigration {
    /// Migration identifier.
    pub migration_name: String,
    /// When the failing attempt was made.
    pub applied_at: DateTime<Utc>,
    /// Error output captured on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl From<&AppliedRecord> for FailedMigration {
    fn from(record: &AppliedRecord) -> Self {
        Self {
            migration_name: record.migration_name.clone(),
            applied_at: record.applied_at,
            logs: record.logs.clone(),
        }
    }
}

impl Ord for FailedMigration {
    fn cmp(&self, other: &Self) -> Ordering {
        self.applied_at
            .cmp(&other.applied_at)
            .then_with(|| self.migration_name.cmp(&other.migration_name))
            .then_with(|| self.logs.cmp(&other.logs))
    }
}

impl PartialOrd for FailedMigration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// History reduced to the latest record per identifier.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    latest: BTreeMap<String, AppliedRecord>,
}

impl HistorySnapshot {
    /// Reduce raw records, validating them.
    ///
    /// For identifiers with several records the most recent `applied_at`
    /// wins; ties go to the record that appears later.
    pub fn from_records(records: &[AppliedRecord]) -> MigrateResult<Self> {
        let mut latest: BTreeMap<String, AppliedRecord> = BTreeMap::new();

        for record in records {
            if record.migration_name.is_empty() {
                return Err(MigrationError::corrupt_history(
                    "history contains a record without a migration name",
                ));
            }
            if record.checksum.is_empty() {
                return Err(MigrationError::corrupt_history(format!(
                    "history record for '{}' has no checksum",
                    record.migration_name
                )));
            }

            match latest.get(&record.migration_name) {
                Some(existing) if existing.applied_at > record.applied_at => {}
                _ => {
                    latest.insert(record.migration_name.clone(), record.clone());
                }
            }
        }

        Ok(Self { latest })
    }

    /// Latest record for an identifier.
    pub fn get(&self, id: &str) -> Option<&AppliedRecord> {
        self.latest.get(id)
    }

    /// Current status of an identifier, if it has any history.
    pub fn status(&self, id: &str) -> Option<MigrationStatus> {
        self.latest.get(id).map(AppliedRecord::status)
    }

    /// Records whose identifier still counts as present in history
    /// (applied or failed), in ascending identifier order.
    pub fn present(&self) -> impl Iterator<Item = &AppliedRecord> {
        self.latest
            .values()
            .filter(|r| r.status() != MigrationStatus::RolledBack)
    }

    /// Failed migrations ordered by attempt time.
    pub fn failed(&self) -> Vec<FailedMigration> {
        let mut failed: Vec<FailedMigration> = self
            .latest
            .values()
            .filter(|r| r.status() == MigrationStatus::Failed)
            .map(FailedMigration::from)
            .collect();
        failed.sort();
        failed
    }

    /// Check if an identifier is present (applied or failed).
    pub fn is_present(&self, id: &str) -> bool {
        matches!(
            self.status(id),
            Some(MigrationStatus::Applied | MigrationStatus::Failed)
        )
    }
}

/// Persistent history storage, owned by the database collaborator.
#[async_trait::async_trait]
pub trait MigrationHistoryRepository: Send + Sync {
    /// Check whether the history table exists.
    async fn has_migrations_table(&self) -> MigrateResult<bool>;

    /// Create the history table.
    async fn initialize(&self) -> MigrateResult<()>;

    /// Get every apply attempt, in insertion order.
    async fn get_records(&self) -> MigrateResult<Vec<AppliedRecord>>;

    /// Record a successful apply.
    async fn record_applied(&self, id: &str, checksum: &str, duration_ms: i64)
    -> MigrateResult<()>;

    /// Record a failed apply.
    async fn record_failed(&self, id: &str, checksum: &str, logs: &str) -> MigrateResult<()>;

    /// Mark the latest attempt of a migration as rolled back.
    async fn mark_rolled_back(&self, id: &str) -> MigrateResult<()>;

    /// Acquire an exclusive lock for migrations.
    async fn acquire_lock(&self) -> MigrateResult<MigrationLock>;
}

/// Migration lock to prevent concurrent deploys.
pub struct MigrationLock {
    lock_id: i64,
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl MigrationLock {
    /// Create a new migration lock.
    pub fn new(lock_id: i64, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            lock_id,
            release_fn: Some(Box::new(release)),
        }
    }

    /// Get the lock ID.
    pub fn id(&self) -> i64 {
        self.lock_id
    }
}

impl std::fmt::Debug for MigrationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationLock")
            .field("lock_id", &self.lock_id)
            .finish_non_exhaustive()
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            release();
        }
    }
}

/// DDL for the history table (PostgreSQL), one row per apply attempt.
pub fn postgres_init_sql(table_name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    id BIGSERIAL PRIMARY KEY,
    migration_name VARCHAR(255) NOT NULL,
    checksum VARCHAR(64) NOT NULL,
    applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    duration_ms BIGINT NOT NULL DEFAULT 0,
    success BOOLEAN NOT NULL,
    rolled_back_at TIMESTAMP WITH TIME ZONE,
    logs TEXT
);

CREATE INDEX IF NOT EXISTS "{table}_name_applied_at_idx"
    ON "{table}" (migration_name, applied_at DESC);
"#,
        table = table_name.replace('"', "\"\"")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_record_status() {
        assert_eq!(AppliedRecord::applied("a", "c", at(0)).status(), MigrationStatus::Applied);
        assert_eq!(
            AppliedRecord::failed("a", "c", at(0), "boom").status(),
            MigrationStatus::Failed
        );
        assert_eq!(
            AppliedRecord::failed("a", "c", at(0), "boom")
                .rolled_back(at(1))
                .status(),
            MigrationStatus::RolledBack
        );
    }

    #[test]
    fn test_latest_record_wins() {
        let records = vec![
            AppliedRecord::failed("m1", "abc", at(0), "syntax error"),
            AppliedRecord::applied("m1", "abc", at(10)),
        ];
        let snapshot = HistorySnapshot::from_records(&records).unwrap();

        assert_eq!(snapshot.status("m1"), Some(MigrationStatus::Applied));
        assert!(snapshot.failed().is_empty());
    }

    #[test]
    fn test_latest_record_wins_regardless_of_row_order() {
        let records = vec![
            AppliedRecord::applied("m1", "abc", at(10)),
            AppliedRecord::failed("m1", "abc", at(0), "syntax error"),
        ];
        let snapshot = HistorySnapshot::from_records(&records).unwrap();

        assert_eq!(snapshot.status("m1"), Some(MigrationStatus::Applied));
    }

    #[test]
    fn test_failed_sorted_by_time() {
        let records = vec![
            AppliedRecord::failed("m2", "b", at(5), "late"),
            AppliedRecord::failed("m3", "c", at(1), "early"),
        ];
        let snapshot = HistorySnapshot::from_records(&records).unwrap();

        let names: Vec<_> = snapshot
            .failed()
            .into_iter()
            .map(|f| f.migration_name)
            .collect();
        assert_eq!(names, vec!["m3", "m2"]);
    }

    #[test]
    fn test_failed_migration_ordering() {
        let early = FailedMigration::from(&AppliedRecord::failed("m9", "a", at(1), "x"));
        let late = FailedMigration::from(&AppliedRecord::failed("m1", "b", at(2), "y"));
        let tie = FailedMigration::from(&AppliedRecord::failed("m2", "c", at(1), "z"));

        let mut failed = vec![late.clone(), early.clone(), tie.clone()];
        failed.sort();
        assert_eq!(failed, vec![tie, early, late]);
    }

    #[test]
    fn test_rolled_back_not_present() {
        let records = vec![AppliedRecord::failed("m1", "a", at(0), "x").rolled_back(at(1))];
        let snapshot = HistorySnapshot::from_records(&records).unwrap();

        assert!(!snapshot.is_present("m1"));
        assert_eq!(snapshot.present().count(), 0);
    }

    #[test]
    fn test_missing_checksum_is_corrupt() {
        let records = vec![AppliedRecord::applied("m1", "", at(0))];
        let err = HistorySnapshot::from_records(&records).unwrap_err();
        assert!(matches!(err, MigrationError::CorruptHistory(_)));
    }

    #[test]
    fn test_missing_name_is_corrupt() {
        let records = vec![AppliedRecord::applied("", "abc", at(0))];
        assert!(HistorySnapshot::from_records(&records).is_err());
    }

    #[test]
    fn test_lock_releases_on_drop() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let lock = MigrationLock::new(7, move || flag.store(true, Ordering::SeqCst));

        assert_eq!(lock.id(), 7);
        drop(lock);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_init_sql_has_columns() {
        let sql = postgres_init_sql("_mend_migrations");
        assert!(sql.contains("\"_mend_migrations\""));
        for column in ["migration_name", "checksum", "applied_at", "rolled_back_at", "success"] {
            assert!(sql.contains(column), "missing column {column}");
        }
    }
}
