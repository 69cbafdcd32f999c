//! Migration script discovery.
//!
//! Scripts live in one directory, named `<version>_<description>.up.sql` and
//! `<version>_<description>.down.sql`. Files that do not follow the pattern
//! are ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::EngineError;

static SCRIPT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)_([A-Za-z0-9_\-]+)\.(up|down)\.sql$").expect("valid script name pattern")
});

/// One versioned schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub version: i64,
    pub description: String,
    pub up_sql: String,
    pub down_sql: Option<String>,
}

/// The ordered set of scripts found at a migration source.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
    scripts: Vec<MigrationScript>,
}

/// Resolves a migration URL to a local directory.
///
/// Accepts `file://<path>` and bare paths. Any other scheme is rejected.
///
/// # Errors
///
/// Returns [`EngineError::UnsupportedSource`] for non-file schemes.
pub fn source_dir(url: &str) -> Result<PathBuf, EngineError> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if url.contains("://") {
        return Err(EngineError::UnsupportedSource {
            url: url.to_string(),
        });
    }
    Ok(PathBuf::from(url))
}

impl MigrationSource {
    /// Reads every script under the directory named by `url`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the directory cannot be read, a version is
    /// duplicated or zero, or a down script has no matching up script.
    pub async fn load(url: &str) -> Result<Self, EngineError> {
        let dir = source_dir(url)?;
        let io_err = |source: std::io::Error| EngineError::Io {
            path: dir.clone(),
            source,
        };

        let mut ups: BTreeMap<i64, (String, String)> = BTreeMap::new();
        let mut downs: BTreeMap<i64, String> = BTreeMap::new();

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(caps) = SCRIPT_NAME.captures(name) else {
                continue;
            };
            let version: i64 = caps[1].parse().map_err(|_| EngineError::Malformed {
                version: 0,
                reason: format!("version of {name} is out of range"),
            })?;
            if version == 0 {
                return Err(EngineError::Malformed {
                    version,
                    reason: format!("{name}: versions start at 1"),
                });
            }
            let sql = tokio::fs::read_to_string(entry.path()).await.map_err(io_err)?;
            let duplicate = if &caps[3] == "up" {
                ups.insert(version, (caps[2].to_string(), sql)).is_some()
            } else {
                downs.insert(version, sql).is_some()
            };
            if duplicate {
                return Err(EngineError::Malformed {
                    version,
                    reason: format!("duplicate {} script", &caps[3]),
                });
            }
        }

        if let Some(orphan) = downs.keys().find(|v| !ups.contains_key(v)) {
            return Err(EngineError::Malformed {
                version: *orphan,
                reason: "down script without up script".to_string(),
            });
        }

        let scripts = ups
            .into_iter()
            .map(|(version, (description, up_sql))| MigrationScript {
                version,
                description,
                up_sql,
                down_sql: downs.remove(&version),
            })
            .collect();

        Ok(Self { dir, scripts })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scripts in ascending version order.
    #[must_use]
    pub fn scripts(&self) -> &[MigrationScript] {
        &self.scripts
    }

    /// Highest version available at the source.
    #[must_use]
    pub fn latest_version(&self) -> Option<i64> {
        self.scripts.last().map(|s| s.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).expect("write script");
    }

    #[test]
    fn source_dir_accepts_file_scheme_and_bare_paths() {
        assert_eq!(source_dir("file://db/migration").unwrap(), PathBuf::from("db/migration"));
        assert_eq!(source_dir("/abs/migration").unwrap(), PathBuf::from("/abs/migration"));
        assert!(matches!(
            source_dir("github://owner/repo/migration"),
            Err(EngineError::UnsupportedSource { .. })
        ));
    }

    #[tokio::test]
    async fn scripts_are_ordered_numerically() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "10_add_index.up.sql", "CREATE INDEX ...;");
        write(dir.path(), "2_add_sessions.up.sql", "CREATE TABLE sessions ();");
        write(dir.path(), "2_add_sessions.down.sql", "DROP TABLE sessions;");
        write(dir.path(), "000001_init_schema.up.sql", "CREATE TABLE users ();");
        write(dir.path(), "README.md", "not a migration");

        let url = format!("file://{}", dir.path().display());
        let source = MigrationSource::load(&url).await.expect("load");
        let versions: Vec<i64> = source.scripts().iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![1, 2, 10]);
        assert_eq!(source.latest_version(), Some(10));
        assert_eq!(source.scripts()[0].description, "init_schema");
        assert!(source.scripts()[0].down_sql.is_none());
        assert_eq!(source.scripts()[1].down_sql.as_deref(), Some("DROP TABLE sessions;"));
    }

    #[tokio::test]
    async fn orphan_down_script_is_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "3_drop.down.sql", "DROP TABLE x;");

        let err = MigrationSource::load(&dir.path().display().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Malformed { version: 3, .. }));
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let err = MigrationSource::load("file:///nonexistent/simplebank/migrations")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }
}
