//! # Mend
//!
//! Migration history reconciliation.
//!
//! Mend compares the migrations on disk, the history recorded in the
//! database, and the live database schema, then tells you how they diverged
//! and what is safe to do about it:
//!
//! - Diagnose the history into exactly one state (baseline, failed, drifted,
//!   behind, in sync)
//! - Advise the exact `resolve` command for states that need a human
//! - Apply pending migrations in order, stopping at the first failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mend::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mend::Error> {
//!     let config = MigrationConfig::load("mend.toml").await?;
//!     let engine = MigrationEngine::from_config(config, history, connector);
//!
//!     let status = engine.status().await?;
//!     println!("{}", status.summary());
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Diagnosis, advice, and application of migrations.
pub mod migrate {
    pub use mend_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        DeployOutcome, DiagnoseResult, MigrationConfig, MigrationEngine, MigrationFileManager,
        RecoveryPlan, ResolveOutcome, StatusReport, Verdict,
    };
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError as Error};
