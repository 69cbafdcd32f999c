//! Process supervisor: the ordered startup sequence and the serving phase.
//!
//! ```text
//! ConfigLoading -> Connecting -> Migrating -> CoreReady -> { RpcServing, GatewayServing }
//! ```
//!
//! Everything up to `CoreReady` runs sequentially on the caller's task, so no
//! listener exists until the schema is current. The RPC listener is bound
//! before the gateway; if it cannot bind, the gateway is never bound. Once
//! both are bound each serves on its own task, and the first one to fail ends
//! the supervisor (the sibling task is aborted).

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::info;

use crate::api::{ConstructionError, ServiceCore};
use crate::config::{Config, ConfigError};
use crate::migrate::{self, MigrationError, MigrationOutcome, MigrationRunner};
use crate::network::{
    BindError, GatewayListener, GatewayOptions, ListenerKind, RpcListener, RpcOptions, ServeError,
};
use crate::store::{ConnectionError, Database};

/// Startup phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    ConfigLoading,
    Connecting,
    Migrating,
    CoreReady,
    RpcServing,
    GatewayServing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConfigLoading => "config-loading",
            Self::Connecting => "connecting",
            Self::Migrating => "migrating",
            Self::CoreReady => "core-ready",
            Self::RpcServing => "rpc-serving",
            Self::GatewayServing => "gateway-serving",
        })
    }
}

impl From<ListenerKind> for Stage {
    fn from(kind: ListenerKind) -> Self {
        match kind {
            ListenerKind::Rpc => Self::RpcServing,
            ListenerKind::Gateway => Self::GatewayServing,
        }
    }
}

/// Any fatal startup or serving failure.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("cannot load config: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot connect to db: {0}")]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("cannot create the server: {0}")]
    Construction(#[from] ConstructionError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Serve(#[from] ServeError),
}

impl StartupError {
    /// The stage that was being entered when the error occurred.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::ConfigLoading,
            Self::Connection(_) => Stage::Connecting,
            Self::Migration(_) => Stage::Migrating,
            Self::Construction(_) => Stage::CoreReady,
            Self::Bind(err) => err.kind.into(),
            Self::Serve(err) => err.kind.into(),
        }
    }
}

/// State after `CoreReady`: migrated schema and the shared core.
pub struct Ready {
    pub config: Arc<Config>,
    pub database: Database,
    pub core: Arc<ServiceCore>,
    pub migration: MigrationOutcome,
}

/// Runs the migration, then builds the single [`ServiceCore`].
///
/// # Errors
///
/// Returns [`StartupError::Migration`] or [`StartupError::Construction`].
pub async fn prepare(config: Config, database: Database) -> Result<Ready, StartupError> {
    info!(stage = %Stage::Migrating, url = %config.migration_url, "running db migration");
    let engine = migrate::open(&config.migration_url, &database).await?;
    let migration = MigrationRunner::run(engine.as_ref()).await?;

    let config = Arc::new(config);
    let core = Arc::new(ServiceCore::new(Arc::clone(&config), database.store())?);
    info!(stage = %Stage::CoreReady, "service core ready");

    Ok(Ready {
        config,
        database,
        core,
        migration,
    })
}

/// Both listeners, bound and not yet serving.
#[derive(Debug)]
pub struct Listeners {
    rpc: RpcListener,
    gateway: GatewayListener,
}

/// Binds the RPC listener, then the gateway.
///
/// # Errors
///
/// Returns [`StartupError::Bind`] for the first address that cannot be bound.
pub async fn bind_listeners(config: &Config) -> Result<Listeners, StartupError> {
    let rpc = RpcListener::bind(&config.rpc_server_address, RpcOptions::from_config(config)).await?;
    let gateway =
        GatewayListener::bind(&config.http_server_address, GatewayOptions::from_config(config))
            .await?;
    Ok(Listeners { rpc, gateway })
}

/// Resolves once `stop` flips to `true` or its sender is gone.
async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

impl Listeners {
    #[must_use]
    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    #[must_use]
    pub fn gateway_addr(&self) -> SocketAddr {
        self.gateway.local_addr()
    }

    /// Serves both listeners against `core` until `shutdown` resolves or one
    /// of them fails.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Serve`] carrying the first listener failure.
    pub async fn serve(
        self,
        core: Arc<ServiceCore>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), StartupError> {
        let Self { rpc, gateway } = self;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let rpc_core = Arc::clone(&core);
        let rpc_stop = stopped(stop_rx.clone());
        let rpc_id = tasks
            .spawn(async move { rpc.serve(rpc_core, rpc_stop).await })
            .id();
        let gateway_stop = stopped(stop_rx);
        tasks.spawn(async move { gateway.serve(core, gateway_stop).await });

        tokio::pin!(shutdown);
        let mut stopping = false;
        loop {
            tokio::select! {
                () = &mut shutdown, if !stopping => {
                    info!("shutdown requested");
                    stopping = true;
                    stop_tx.send_replace(true);
                }
                joined = tasks.join_next() => match joined {
                    None => return Ok(()),
                    Some(Ok(Ok(()))) => {
                        stopping = true;
                        stop_tx.send_replace(true);
                    }
                    Some(Ok(Err(err))) => return Err(err.into()),
                    Some(Err(join_err)) => {
                        let kind = if join_err.id() == rpc_id {
                            ListenerKind::Rpc
                        } else {
                            ListenerKind::Gateway
                        };
                        return Err(ServeError {
                            kind,
                            source: std::io::Error::other(join_err),
                        }
                        .into());
                    }
                },
            }
        }
    }
}

/// Full startup from a config directory. `main` passes a shutdown future
/// that never resolves.
///
/// # Errors
///
/// Returns the first [`StartupError`]; [`StartupError::stage`] names where.
pub async fn run(
    config_dir: &Path,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), StartupError> {
    info!(stage = %Stage::ConfigLoading, dir = %config_dir.display(), "loading config");
    let config = Config::load(config_dir)?;

    info!(stage = %Stage::Connecting, driver = %config.db_driver, "connecting to db");
    let database = Database::connect(&config.db_driver, &config.db_source).await?;

    run_with_database(config, database, shutdown).await
}

/// Startup from `Migrating` onward, against an already open database.
///
/// # Errors
///
/// Returns the first [`StartupError`].
pub async fn run_with_database(
    config: Config,
    database: Database,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), StartupError> {
    let ready = prepare(config, database).await?;
    let listeners = bind_listeners(&ready.config).await?;
    listeners.serve(ready.core, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{test_config, TEST_KEY};

    fn migration_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("000001_init_schema.up.sql"), "CREATE TABLE users ();")
            .expect("write");
        dir
    }

    fn config_for(dir: &Path) -> Config {
        let mut config = test_config(TEST_KEY);
        config.migration_url = format!("file://{}", dir.display());
        config
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::ConfigLoading < Stage::Connecting);
        assert!(Stage::Migrating < Stage::CoreReady);
        assert_eq!(Stage::from(ListenerKind::Rpc), Stage::RpcServing);
        assert_eq!(Stage::Migrating.to_string(), "migrating");
    }

    #[tokio::test]
    async fn prepare_migrates_once() {
        let dir = migration_dir();
        let database = Database::connect("memory", "memory://prepare").await.expect("db");

        let first = prepare(config_for(dir.path()), database.clone()).await.expect("first");
        assert_eq!(first.migration.changed_count(), 1);
        let second = prepare(config_for(dir.path()), database).await.expect("second");
        assert_eq!(second.migration, MigrationOutcome::NoChange);
    }

    #[tokio::test]
    async fn bad_key_fails_after_migration() {
        let dir = migration_dir();
        let database = Database::connect("memory", "memory://badkey").await.expect("db");
        let mut config = config_for(dir.path());
        config.token_symmetric_key = crate::config::SymmetricKey::new("short");

        let err = prepare(config, database.clone()).await.err().expect("must fail");
        assert_eq!(err.stage(), Stage::CoreReady);
        let Database::Memory(memory) = &database else {
            panic!("expected memory database");
        };
        assert_eq!(memory.schema_version(), Some(1));
    }

    #[tokio::test]
    async fn missing_migrations_fail_the_migrating_stage() {
        let database = Database::connect("memory", "memory://missing").await.expect("db");
        let mut config = test_config(TEST_KEY);
        config.migration_url = "file:///nonexistent/simplebank".to_string();
        let err = prepare(config, database).await.err().expect("must fail");
        assert_eq!(err.stage(), Stage::Migrating);
    }

    #[tokio::test]
    async fn serve_returns_after_shutdown() {
        let dir = migration_dir();
        let database = Database::connect("memory", "memory://serve").await.expect("db");
        let ready = prepare(config_for(dir.path()), database).await.expect("prepare");
        let listeners = bind_listeners(&ready.config).await.expect("bind");
        assert_ne!(listeners.rpc_addr().port(), 0);
        assert_ne!(listeners.gateway_addr().port(), 0);

        listeners
            .serve(ready.core, std::future::ready(()))
            .await
            .expect("clean shutdown");
    }

    #[tokio::test]
    async fn config_errors_report_their_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run(dir.path(), std::future::pending()).await.unwrap_err();
        assert_eq!(err.stage(), Stage::ConfigLoading);
    }
}
