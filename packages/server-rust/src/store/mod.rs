//! Data-access layer: the [`Store`] capability and the [`Database`] handle.
//!
//! The orchestrator opens exactly one [`Database`] per process. It is cheap to
//! clone (every variant is reference counted) and yields the shared
//! `Arc<dyn Store>` the service core runs against, as well as the target the
//! migration engine operates on.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simplebank_core::messages::{Account, User};
use uuid::Uuid;

pub use memory::{MemoryDatabase, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

// ---------------------------------------------------------------------------
// Records and parameters
// ---------------------------------------------------------------------------

/// A stored user, including the password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            username: record.username,
            full_name: record.full_name,
            email: record.email,
            password_changed_at: record.password_changed_at,
            created_at: record.created_at,
        }
    }
}

/// A login session backing one refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct ListAccountsParams {
    pub owner: String,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub id: Uuid,
    pub username: String,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Constraint name of the `users` primary key.
pub const USERS_PKEY: &str = "users_pkey";
/// Constraint name of the unique e-mail index.
pub const USERS_EMAIL_KEY: &str = "users_email_key";
/// Constraint name of the one-account-per-currency rule.
pub const OWNER_CURRENCY_KEY: &str = "owner_currency_key";
/// Constraint name of the account owner foreign key.
pub const ACCOUNTS_OWNER_FKEY: &str = "accounts_owner_fkey";
/// Constraint name of the session user foreign key.
pub const SESSIONS_USERNAME_FKEY: &str = "sessions_username_fkey";

/// Errors returned by [`Store`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint {constraint} violated")]
    UniqueViolation { constraint: String },
    #[error("foreign key constraint {constraint} violated")]
    ForeignKeyViolation { constraint: String },
    #[error("schema is not migrated")]
    SchemaNotReady,
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors raised while opening the storage connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("unsupported database driver {driver:?}")]
    UnsupportedDriver { driver: String },
    #[error("invalid database source {source_url:?}: {reason}")]
    InvalidSource { source_url: String, reason: String },
    #[cfg(feature = "postgres")]
    #[error("cannot connect to postgres: {0}")]
    Postgres(#[source] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence capability consumed by the service core.
///
/// Implementations must be safe for concurrent use: both listeners call into
/// the same instance from independent tasks.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, StoreError>;

    async fn get_user(&self, username: &str) -> Result<UserRecord, StoreError>;

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError>;

    async fn get_account(&self, id: i64) -> Result<Account, StoreError>;

    /// Accounts of `params.owner`, ordered by id.
    async fn list_accounts(&self, params: ListAccountsParams) -> Result<Vec<Account>, StoreError>;

    async fn create_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<SessionRecord, StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<SessionRecord, StoreError>;
}

// ---------------------------------------------------------------------------
// Database handle
// ---------------------------------------------------------------------------

/// Driver identifier of the in-process database.
pub const MEMORY_DRIVER: &str = "memory";
/// Driver identifier of `PostgreSQL`.
pub const POSTGRES_DRIVER: &str = "postgres";

/// An open storage connection, shared by the migration engine and the store.
#[derive(Clone)]
pub enum Database {
    Memory(Arc<MemoryDatabase>),
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),
}

impl Database {
    /// Opens a connection for `driver` using the driver-specific `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] for an unknown driver, a malformed source,
    /// or an unreachable server.
    pub async fn connect(driver: &str, source: &str) -> Result<Self, ConnectionError> {
        match driver {
            MEMORY_DRIVER => {
                let name = source.strip_prefix("memory://").ok_or_else(|| {
                    ConnectionError::InvalidSource {
                        source_url: source.to_string(),
                        reason: "expected memory://<name>".to_string(),
                    }
                })?;
                Ok(Self::Memory(Arc::new(MemoryDatabase::new(name))))
            }
            #[cfg(feature = "postgres")]
            POSTGRES_DRIVER => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(source)
                    .await
                    .map_err(ConnectionError::Postgres)?;
                Ok(Self::Postgres(pool))
            }
            other => Err(ConnectionError::UnsupportedDriver {
                driver: other.to_string(),
            }),
        }
    }

    /// Driver identifier of this connection.
    #[must_use]
    pub fn driver(&self) -> &'static str {
        match self {
            Self::Memory(_) => MEMORY_DRIVER,
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => POSTGRES_DRIVER,
        }
    }

    /// Returns the data-access capability backed by this connection.
    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        match self {
            Self::Memory(db) => Arc::new(MemoryStore::new(Arc::clone(db))),
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => Arc::new(PgStore::new(pool.clone())),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(db) => f.debug_tuple("Memory").field(&db.name()).finish(),
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => f.debug_tuple("Postgres").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_memory_database() {
        let db = Database::connect("memory", "memory://bank").await.expect("connect");
        assert_eq!(db.driver(), MEMORY_DRIVER);
        assert_eq!(format!("{db:?}"), "Memory(\"bank\")");
    }

    #[tokio::test]
    async fn memory_source_must_use_scheme() {
        let err = Database::connect("memory", "bank").await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidSource { .. }));
    }

    #[tokio::test]
    async fn unknown_driver_is_rejected() {
        let err = Database::connect("mysql", "mysql://localhost").await.unwrap_err();
        match err {
            ConnectionError::UnsupportedDriver { driver } => assert_eq!(driver, "mysql"),
            other => panic!("expected UnsupportedDriver, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stores_from_one_database_share_state() {
        let db = Database::connect("memory", "memory://shared").await.expect("connect");
        let Database::Memory(memory) = &db else {
            panic!("expected memory database");
        };
        memory.apply_migration(1, "init_schema");

        let first = db.store();
        let second = db.store();
        first
            .create_user(CreateUserParams {
                username: "alice".to_string(),
                hashed_password: "hash".to_string(),
                full_name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
            })
            .await
            .expect("create");

        let fetched = second.get_user("alice").await.expect("visible through second handle");
        assert_eq!(fetched.email, "alice@example.com");
    }
}
