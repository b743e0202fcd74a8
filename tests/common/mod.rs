//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use mend::migrate::{
    AppliedRecord, DriftReport, MigrateResult, MigrationError, MigrationFile,
    MigrationHistoryRepository, MigrationLock, MigrationSource, SchemaConnector, ScriptOutcome,
};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mend_migrate=debug")
        .with_test_writer()
        .try_init();
}

/// Deterministic timestamp, `secs` after a fixed epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Build a migration unit with a script derived from its identifier.
pub fn migration(id: &str) -> MigrationFile {
    MigrationFile::new(id, format!("CREATE TABLE \"{}\" ();", id))
}

/// A fixed list of local migrations.
pub struct StaticSource {
    migrations: Mutex<Vec<MigrationFile>>,
}

impl StaticSource {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            migrations: Mutex::new(ids.iter().map(|id| migration(id)).collect()),
        }
    }

    pub fn with_migrations(migrations: Vec<MigrationFile>) -> Self {
        Self {
            migrations: Mutex::new(migrations),
        }
    }

    /// Replace the script of a migration, as an edit on disk would.
    pub fn edit(&self, id: &str, script: &str) {
        let mut migrations = self.migrations.lock().unwrap();
        if let Some(pos) = migrations.iter().position(|m| m.id == id) {
            migrations[pos] = MigrationFile::new(id, script);
        }
    }
}

#[async_trait::async_trait]
impl MigrationSource for StaticSource {
    async fn list_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        Ok(self.migrations.lock().unwrap().clone())
    }
}

/// History table kept in memory, with a logical clock.
pub struct InMemoryHistory {
    table: Mutex<bool>,
    records: Mutex<Vec<AppliedRecord>>,
    clock: Mutex<i64>,
    unreachable: Mutex<bool>,
}

impl InMemoryHistory {
    /// A database that has never been migrated.
    pub fn without_table() -> Self {
        Self {
            table: Mutex::new(false),
            records: Mutex::new(Vec::new()),
            clock: Mutex::new(0),
            unreachable: Mutex::new(false),
        }
    }

    /// A database with the given history.
    pub fn with_records(records: Vec<AppliedRecord>) -> Self {
        let clock = records
            .iter()
            .map(|r| r.applied_at.timestamp() - 1_700_000_000)
            .max()
            .unwrap_or(0);
        Self {
            table: Mutex::new(true),
            records: Mutex::new(records),
            clock: Mutex::new(clock),
            unreachable: Mutex::new(false),
        }
    }

    /// Mark the given migrations as applied, one second apart.
    pub fn applied(migrations: &[MigrationFile]) -> Self {
        Self::with_records(
            migrations
                .iter()
                .enumerate()
                .map(|(i, m)| AppliedRecord::applied(&m.id, &m.checksum, at(i as i64 + 1)))
                .collect(),
        )
    }

    pub fn records(&self) -> Vec<AppliedRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        *clock += 1;
        at(*clock)
    }

    fn check_reachable(&self) -> MigrateResult<()> {
        if *self.unreachable.lock().unwrap() {
            return Err(MigrationError::connectivity("connection refused"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MigrationHistoryRepository for InMemoryHistory {
    async fn has_migrations_table(&self) -> MigrateResult<bool> {
        self.check_reachable()?;
        Ok(*self.table.lock().unwrap())
    }

    async fn initialize(&self) -> MigrateResult<()> {
        self.check_reachable()?;
        *self.table.lock().unwrap() = true;
        Ok(())
    }

    async fn get_records(&self) -> MigrateResult<Vec<AppliedRecord>> {
        self.check_reachable()?;
        Ok(self.records())
    }

    async fn record_applied(
        &self,
        id: &str,
        checksum: &str,
        duration_ms: i64,
    ) -> MigrateResult<()> {
        self.check_reachable()?;
        let mut record = AppliedRecord::applied(id, checksum, self.tick());
        record.duration_ms = duration_ms;
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn record_failed(&self, id: &str, checksum: &str, logs: &str) -> MigrateResult<()> {
        self.check_reachable()?;
        let record = AppliedRecord::failed(id, checksum, self.tick(), logs);
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn mark_rolled_back(&self, id: &str) -> MigrateResult<()> {
        self.check_reachable()?;
        let now = self.tick();
        let mut records = self.records.lock().unwrap();
        let latest = records
            .iter_mut()
            .filter(|r| r.migration_name == id)
            .max_by_key(|r| r.applied_at)
            .ok_or_else(|| MigrationError::NotFound(id.to_string()))?;
        latest.rolled_back_at = Some(now);
        Ok(())
    }

    async fn acquire_lock(&self) -> MigrateResult<MigrationLock> {
        self.check_reachable()?;
        Ok(MigrationLock::new(1, || {}))
    }
}

/// Live database stand-in with scripted behaviour.
#[derive(Default)]
pub struct ScriptedConnector {
    drift: Mutex<DriftReport>,
    failing: Mutex<HashSet<String>>,
    unreachable_on: Mutex<HashSet<String>>,
    hang_on: Mutex<HashSet<String>>,
    empty: Mutex<bool>,
    attempted: Mutex<Vec<String>>,
    drift_probes: Mutex<Vec<(usize, bool)>>,
    schema: Mutex<HashMap<String, String>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drift(self, drift: DriftReport) -> Self {
        *self.drift.lock().unwrap() = drift;
        self
    }

    pub fn failing_on(self, id: &str) -> Self {
        self.failing.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn unreachable_on(self, id: &str) -> Self {
        self.unreachable_on.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn hanging_on(self, id: &str) -> Self {
        self.hang_on.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn empty_database(self, empty: bool) -> Self {
        *self.empty.lock().unwrap() = empty;
        self
    }

    /// Migrations the engine tried to run, in order.
    pub fn attempted(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }

    /// `(applied count, shadow opt-in)` for every drift probe.
    pub fn drift_probes(&self) -> Vec<(usize, bool)> {
        self.drift_probes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SchemaConnector for ScriptedConnector {
    async fn detect_drift(
        &self,
        applied: &[MigrationFile],
        opt_in_to_shadow_database: bool,
    ) -> MigrateResult<DriftReport> {
        self.drift_probes
            .lock()
            .unwrap()
            .push((applied.len(), opt_in_to_shadow_database));
        Ok(self.drift.lock().unwrap().clone())
    }

    async fn apply_script(&self, migration: &MigrationFile) -> MigrateResult<ScriptOutcome> {
        self.attempted.lock().unwrap().push(migration.id.clone());

        let hang = self.hang_on.lock().unwrap().contains(&migration.id);
        if hang {
            std::future::pending::<()>().await;
        }
        if self.unreachable_on.lock().unwrap().contains(&migration.id) {
            return Err(MigrationError::connectivity("connection reset by peer"));
        }
        if self.failing.lock().unwrap().contains(&migration.id) {
            return Ok(ScriptOutcome::Failed {
                logs: format!("syntax error in {}", migration.id),
            });
        }

        self.schema
            .lock()
            .unwrap()
            .insert(migration.id.clone(), migration.script.clone());
        Ok(ScriptOutcome::Succeeded)
    }

    async fn is_empty_database(&self) -> MigrateResult<bool> {
        Ok(*self.empty.lock().unwrap())
    }
}
