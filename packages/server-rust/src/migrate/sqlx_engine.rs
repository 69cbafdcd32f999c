//! `PostgreSQL` migration engine built on [`sqlx::migrate::Migrator`].
//!
//! `sqlx` keeps applied versions in its `_sqlx_migrations` table and runs each
//! script in its own transaction. Scripts are applied one by one through
//! [`Migrate::apply`] rather than [`Migrator::run`], which would also apply
//! versions missing below the recorded one.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::migrate::{AppliedMigration, Migrate, MigrateError, Migration, Migrator};
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use super::source::source_dir;
use super::{EngineError, MigrationEngine, MigrationReport};

/// Engine bound to one script directory and one connection pool.
#[derive(Debug)]
pub struct SqlxEngine {
    migrator: Migrator,
    pool: PgPool,
}

impl SqlxEngine {
    /// Reads the scripts named by `migration_url`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnsupportedSource`] for non-file URLs and
    /// [`EngineError::Sqlx`] if the directory cannot be resolved.
    pub async fn new(migration_url: &str, pool: PgPool) -> Result<Self, EngineError> {
        let dir = source_dir(migration_url)?;
        let migrator = Migrator::new(dir).await?;
        Ok(Self { migrator, pool })
    }

    fn up_migrations(&self) -> impl Iterator<Item = &Migration> {
        self.migrator
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
    }

    /// Versions of every up script at the source, ascending.
    fn source_versions(&self) -> BTreeSet<i64> {
        self.up_migrations().map(|m| m.version).collect()
    }

    /// Up scripts strictly newer than the highest applied version, ascending.
    ///
    /// Every applied version must still exist at the source with the same
    /// checksum.
    fn pending(&self, applied: &[AppliedMigration]) -> Result<Vec<&Migration>, MigrateError> {
        for done in applied {
            match self.up_migrations().find(|m| m.version == done.version) {
                None => return Err(MigrateError::VersionMissing(done.version)),
                Some(m) if m.checksum != done.checksum => {
                    return Err(MigrateError::VersionMismatch(done.version))
                }
                Some(_) => {}
            }
        }
        let current = applied.iter().map(|m| m.version).max();
        let mut pending: Vec<&Migration> = self
            .up_migrations()
            .filter(|m| Some(m.version) > current)
            .collect();
        pending.sort_by_key(|m| m.version);
        Ok(pending)
    }

    async fn apply_pending(&self, conn: &mut PgConnection) -> Result<Vec<i64>, EngineError> {
        conn.ensure_migrations_table().await?;
        if let Some(version) = conn.dirty_version().await? {
            return Err(MigrateError::Dirty(version).into());
        }
        let applied = conn.list_applied_migrations().await?;

        let mut versions = Vec::new();
        for migration in self.pending(&applied)? {
            conn.apply(migration).await?;
            debug!(version = migration.version, description = %migration.description, "applied migration");
            versions.push(migration.version);
        }
        Ok(versions)
    }

    async fn applied_versions(&self) -> Result<BTreeSet<i64>, EngineError> {
        let mut conn = self.pool.acquire().await.map_err(MigrateError::Execute)?;
        conn.ensure_migrations_table().await?;
        let applied = conn.list_applied_migrations().await?;
        Ok(applied.into_iter().map(|m| m.version).collect())
    }
}

#[async_trait]
impl MigrationEngine for SqlxEngine {
    async fn up(&self) -> Result<MigrationReport, EngineError> {
        let mut conn = self.pool.acquire().await.map_err(MigrateError::Execute)?;
        conn.lock().await?;
        let applied = self.apply_pending(&mut conn).await;
        conn.unlock().await?;

        let versions = applied?;
        if versions.is_empty() {
            return Err(EngineError::NoChange);
        }
        Ok(MigrationReport {
            versions,
            current: self.version().await?,
        })
    }

    async fn down(&self, target: i64) -> Result<MigrationReport, EngineError> {
        let applied = self.applied_versions().await?;
        let reverted: Vec<i64> = applied.iter().rev().copied().filter(|v| *v > target).collect();
        if reverted.is_empty() {
            return Err(EngineError::NoChange);
        }

        self.migrator.undo(&self.pool, target).await?;
        Ok(MigrationReport {
            versions: reverted,
            current: self.version().await?,
        })
    }

    async fn version(&self) -> Result<Option<i64>, EngineError> {
        Ok(self.applied_versions().await?.last().copied())
    }
}
