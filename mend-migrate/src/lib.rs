//! # mend-migrate
//!
//! Migration history reconciliation for Mend.
//!
//! Given a local migration directory, the history table in a live database,
//! and a drift report for that database's schema, this crate works out how
//! the three diverged and what is safe to do next:
//!
//! - **Diagnosis**: compare recorded history against the local directory and
//!   the live schema, and fold the result into exactly one state
//! - **Advice**: for each state, the recovery plan and the exact `resolve`
//!   commands a human should run
//! - **Application**: apply pending migrations strictly in order, halting at
//!   the first failure
//!
//! The crate never talks to a database itself. Connections, SQL execution,
//! and schema introspection are collaborators behind the
//! [`MigrationHistoryRepository`] and [`SchemaConnector`] traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Migrations   │   │ History Tbl  │   │ Live Schema  │
//! │ Directory    │   │              │   │ (drift)      │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────────────┼──────────────────┘
//!                           ▼
//!                   ┌────────────────┐
//!                   │   Diagnoser    │──▶ DiagnoseResult ──▶ Verdict
//!                   └────────────────┘
//!                           │
//!              ┌────────────┴────────────┐
//!              ▼                         ▼
//!      ┌────────────────┐        ┌────────────────┐
//!      │    Advisor     │        │    Applier     │
//!      │ (RecoveryPlan) │        │ (in order)     │
//!      └────────────────┘        └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use mend_migrate::{DeployOutcome, MigrationConfig, MigrationEngine};
//!
//! async fn deploy() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::load("mend.toml").await?;
//!
//!     // Your history table and database connector implementations
//!     let history = /* impl MigrationHistoryRepository */;
//!     let connector = /* impl SchemaConnector */;
//!     let engine = MigrationEngine::from_config(config, history, connector);
//!
//!     match engine.deploy().await? {
//!         DeployOutcome::Applied(result) => println!("{}", result.summary()),
//!         DeployOutcome::Blocked(plan) => eprintln!("{plan}"),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! Each migration is a directory holding an `up.sql` script:
//!
//! ```text
//! migrations/
//! ├── 20231215120000_create_users/
//! │   └── up.sql
//! └── 20231216090000_add_posts/
//!     └── up.sql
//! ```

pub mod apply;
pub mod config;
pub mod diagnose;
pub mod drift;
pub mod engine;
pub mod error;
pub mod file;
pub mod history;
pub mod resolution;

// Re-exports
pub use apply::{ApplyResult, FailedApply, apply, apply_with_cancel};
pub use config::MigrationConfig;
pub use diagnose::{DiagnoseResult, DivergenceReason, HistoryDiagnostic, Verdict, classify, diagnose};
pub use drift::{DriftReport, SchemaConnector, ScriptOutcome};
pub use engine::{DeployOutcome, MigrationEngine, StatusReport};
pub use error::{MigrateResult, MigrationError};
pub use file::{MigrationDirectory, MigrationFile, MigrationFileManager, MigrationSource};
pub use history::{
    AppliedRecord, FailedMigration, HistorySnapshot, MigrationHistoryRepository, MigrationLock,
    MigrationStatus,
};
pub use resolution::{RecoveryPlan, ResolveCommand, ResolveOutcome, advise};
