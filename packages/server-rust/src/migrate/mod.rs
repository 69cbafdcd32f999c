//! Schema migration: engines and the startup runner.
//!
//! A [`MigrationEngine`] is bound to one script source and one target
//! database and applies or reverts versioned scripts. [`MigrationRunner`] is
//! the startup step: it brings the schema to the latest version and treats
//! "nothing to apply" as success. Rollback is never performed on the startup
//! path; it is only reachable through [`MigrationRunner::rollback`], which the
//! operator invokes explicitly.

pub mod memory;
pub mod source;
#[cfg(feature = "postgres")]
pub mod sqlx_engine;

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::store::Database;

pub use memory::MemoryEngine;
pub use source::{MigrationScript, MigrationSource};
#[cfg(feature = "postgres")]
pub use sqlx_engine::SqlxEngine;

/// Errors reported by a migration engine.
///
/// [`EngineError::NoChange`] is not a failure: it signals that the target is
/// already at the requested version. [`MigrationRunner`] turns it into a
/// successful [`MigrationOutcome::NoChange`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no change")]
    NoChange,
    #[error("unsupported migration source {url:?}")]
    UnsupportedSource { url: String },
    #[error("cannot read migration source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed migration {version}: {reason}")]
    Malformed { version: i64, reason: String },
    #[error("migration {version} has no down script")]
    Irreversible { version: i64 },
    #[error("database is at version {database} which is newer than the source's latest {source_latest}")]
    UnknownVersion { database: i64, source_latest: i64 },
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Sqlx(#[from] sqlx::migrate::MigrateError),
}

/// Versions touched by a successful engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied (ascending) or reverted (descending), in execution order.
    pub versions: Vec<i64>,
    /// Schema version after the run; `None` once everything is reverted.
    pub current: Option<i64>,
}

/// A migration engine bound to a script source and a target database.
///
/// Each script runs as its own all-or-nothing unit: a failure leaves every
/// earlier script applied and nothing of the failing one.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    /// Applies every script newer than the recorded version, ascending.
    ///
    /// Returns [`EngineError::NoChange`] when nothing is pending.
    async fn up(&self) -> Result<MigrationReport, EngineError>;

    /// Reverts every applied script newer than `target`, descending.
    ///
    /// Returns [`EngineError::NoChange`] when nothing is newer than `target`.
    async fn down(&self, target: i64) -> Result<MigrationReport, EngineError>;

    /// Highest applied version, or `None` for an empty schema.
    async fn version(&self) -> Result<Option<i64>, EngineError>;
}

/// Opens an engine for `migration_url` against `database`.
///
/// # Errors
///
/// Returns [`MigrationError::Open`] if the source cannot be read.
pub async fn open(
    migration_url: &str,
    database: &Database,
) -> Result<Box<dyn MigrationEngine>, MigrationError> {
    match database {
        Database::Memory(db) => {
            let source = MigrationSource::load(migration_url)
                .await
                .map_err(MigrationError::Open)?;
            Ok(Box::new(MemoryEngine::new(source, std::sync::Arc::clone(db))))
        }
        #[cfg(feature = "postgres")]
        Database::Postgres(pool) => {
            let engine = SqlxEngine::new(migration_url, pool.clone())
                .await
                .map_err(MigrationError::Open)?;
            Ok(Box::new(engine))
        }
    }
}

/// Errors that abort startup (or an explicit rollback).
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("cannot create migration engine: {0}")]
    Open(#[source] EngineError),
    #[error("failed to run migrate up: {0}")]
    Up(#[source] EngineError),
    #[error("failed to run migrate down: {0}")]
    Down(#[source] EngineError),
}

/// Result of a successful migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Scripts were applied or reverted.
    Changed(MigrationReport),
    /// The schema was already at the requested version.
    NoChange,
}

impl MigrationOutcome {
    /// Number of scripts applied or reverted.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        match self {
            Self::Changed(report) => report.versions.len(),
            Self::NoChange => 0,
        }
    }
}

/// Drives an engine for the startup and operator paths.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Brings the schema to the latest version.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Up`] for every engine failure except
    /// [`EngineError::NoChange`].
    pub async fn run(engine: &dyn MigrationEngine) -> Result<MigrationOutcome, MigrationError> {
        match engine.up().await {
            Ok(report) => {
                info!(
                    applied = report.versions.len(),
                    version = ?report.current,
                    "db migrated successfully"
                );
                Ok(MigrationOutcome::Changed(report))
            }
            Err(EngineError::NoChange) => {
                info!("db schema already up to date");
                Ok(MigrationOutcome::NoChange)
            }
            Err(err) => Err(MigrationError::Up(err)),
        }
    }

    /// Reverts the schema down to `target`. Never called during startup.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Down`] for every engine failure except
    /// [`EngineError::NoChange`].
    pub async fn rollback(
        engine: &dyn MigrationEngine,
        target: i64,
    ) -> Result<MigrationOutcome, MigrationError> {
        match engine.down(target).await {
            Ok(report) => {
                info!(
                    reverted = report.versions.len(),
                    version = ?report.current,
                    "db rolled back"
                );
                Ok(MigrationOutcome::Changed(report))
            }
            Err(EngineError::NoChange) => Ok(MigrationOutcome::NoChange),
            Err(err) => Err(MigrationError::Down(err)),
        }
    }
}
