//! Migration engine for the in-process database.
//!
//! The memory driver has no SQL interpreter: applying a script records its
//! version as the schema marker and makes the tables queryable. Scripts are
//! still read and validated so a broken migration directory fails startup the
//! same way it would against `PostgreSQL`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{EngineError, MigrationEngine, MigrationReport, MigrationSource};
use crate::store::MemoryDatabase;

/// Applies a [`MigrationSource`] to a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryEngine {
    source: MigrationSource,
    db: Arc<MemoryDatabase>,
}

impl MemoryEngine {
    #[must_use]
    pub fn new(source: MigrationSource, db: Arc<MemoryDatabase>) -> Self {
        Self { source, db }
    }

    fn check_known_version(&self) -> Result<(), EngineError> {
        let current = self.db.schema_version();
        match (current, self.source.latest_version()) {
            (Some(database), Some(source_latest)) if database > source_latest => {
                Err(EngineError::UnknownVersion {
                    database,
                    source_latest,
                })
            }
            (Some(database), None) => Err(EngineError::UnknownVersion {
                database,
                source_latest: 0,
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MigrationEngine for MemoryEngine {
    async fn up(&self) -> Result<MigrationReport, EngineError> {
        self.check_known_version()?;
        let current = self.db.schema_version();
        let mut versions = Vec::new();

        // Strictly above the recorded version; gaps below it are never filled.
        for script in self.source.scripts() {
            if Some(script.version) <= current {
                continue;
            }
            if script.up_sql.trim().is_empty() {
                return Err(EngineError::Malformed {
                    version: script.version,
                    reason: "up script is empty".to_string(),
                });
            }
            self.db.apply_migration(script.version, &script.description);
            debug!(version = script.version, description = %script.description, "applied migration");
            versions.push(script.version);
        }

        if versions.is_empty() {
            return Err(EngineError::NoChange);
        }
        Ok(MigrationReport {
            versions,
            current: self.db.schema_version(),
        })
    }

    async fn down(&self, target: i64) -> Result<MigrationReport, EngineError> {
        self.check_known_version()?;
        let mut versions = Vec::new();

        for script in self.source.scripts().iter().rev() {
            if script.version <= target
                || self.db.applied_versions().binary_search(&script.version).is_err()
            {
                continue;
            }
            if script.down_sql.is_none() {
                return Err(EngineError::Irreversible {
                    version: script.version,
                });
            }
            self.db.revert_migration(script.version);
            debug!(version = script.version, "reverted migration");
            versions.push(script.version);
        }

        if versions.is_empty() {
            return Err(EngineError::NoChange);
        }
        Ok(MigrationReport {
            versions,
            current: self.db.schema_version(),
        })
    }

    async fn version(&self) -> Result<Option<i64>, EngineError> {
        Ok(self.db.schema_version())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).expect("write script");
    }

    async fn engine_for(dir: &Path, db: &Arc<MemoryDatabase>) -> MemoryEngine {
        let source = MigrationSource::load(&dir.display().to_string())
            .await
            .expect("load source");
        MemoryEngine::new(source, Arc::clone(db))
    }

    fn two_scripts(dir: &Path) {
        write(dir, "000001_init_schema.up.sql", "CREATE TABLE users ();");
        write(dir, "000001_init_schema.down.sql", "DROP TABLE users;");
        write(dir, "000002_add_sessions.up.sql", "CREATE TABLE sessions ();");
        write(dir, "000002_add_sessions.down.sql", "DROP TABLE sessions;");
    }

    #[tokio::test]
    async fn up_applies_in_order_then_reports_no_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        two_scripts(dir.path());
        let db = Arc::new(MemoryDatabase::new("up"));
        let engine = engine_for(dir.path(), &db).await;

        let report = engine.up().await.expect("first up");
        assert_eq!(report.versions, vec![1, 2]);
        assert_eq!(report.current, Some(2));

        assert!(matches!(engine.up().await, Err(EngineError::NoChange)));
        assert_eq!(db.applied_versions(), vec![1, 2]);
    }

    #[tokio::test]
    async fn only_pending_scripts_are_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        two_scripts(dir.path());
        let db = Arc::new(MemoryDatabase::new("pending"));
        db.apply_migration(1, "init_schema");
        let engine = engine_for(dir.path(), &db).await;

        let report = engine.up().await.expect("up");
        assert_eq!(report.versions, vec![2]);
    }

    #[tokio::test]
    async fn versions_below_the_current_one_are_never_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "1_init.up.sql", "CREATE TABLE users ();");
        write(dir.path(), "2_late.up.sql", "CREATE TABLE late ();");
        write(dir.path(), "3_sessions.up.sql", "CREATE TABLE sessions ();");
        let db = Arc::new(MemoryDatabase::new("gap"));
        db.apply_migration(1, "init");
        db.apply_migration(3, "sessions");
        let engine = engine_for(dir.path(), &db).await;

        assert!(matches!(engine.up().await, Err(EngineError::NoChange)));
        assert_eq!(db.applied_versions(), vec![1, 3]);
    }

    #[tokio::test]
    async fn failing_script_keeps_earlier_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "1_init.up.sql", "CREATE TABLE users ();");
        write(dir.path(), "2_broken.up.sql", "   \n");
        let db = Arc::new(MemoryDatabase::new("partial"));
        let engine = engine_for(dir.path(), &db).await;

        let err = engine.up().await.unwrap_err();
        assert!(matches!(err, EngineError::Malformed { version: 2, .. }));
        assert_eq!(db.applied_versions(), vec![1]);
    }

    #[tokio::test]
    async fn database_ahead_of_source_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "1_init.up.sql", "CREATE TABLE users ();");
        let db = Arc::new(MemoryDatabase::new("ahead"));
        db.apply_migration(5, "future");
        let engine = engine_for(dir.path(), &db).await;

        assert!(matches!(
            engine.up().await,
            Err(EngineError::UnknownVersion {
                database: 5,
                source_latest: 1
            })
        ));
    }

    #[tokio::test]
    async fn down_reverts_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        two_scripts(dir.path());
        let db = Arc::new(MemoryDatabase::new("down"));
        let engine = engine_for(dir.path(), &db).await;
        engine.up().await.expect("up");

        let report = engine.down(0).await.expect("down");
        assert_eq!(report.versions, vec![2, 1]);
        assert_eq!(report.current, None);
        assert_eq!(engine.version().await.expect("version"), None);
        assert!(matches!(engine.down(0).await, Err(EngineError::NoChange)));
    }

    #[tokio::test]
    async fn down_without_script_is_irreversible() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "1_init.up.sql", "CREATE TABLE users ();");
        let db = Arc::new(MemoryDatabase::new("irreversible"));
        let engine = engine_for(dir.path(), &db).await;
        engine.up().await.expect("up");

        assert!(matches!(
            engine.down(0).await,
            Err(EngineError::Irreversible { version: 1 })
        ));
        assert_eq!(db.schema_version(), Some(1));
    }
}
