//! `PostgreSQL` [`Store`] backed by a `sqlx` connection pool.
//!
//! Queries are checked at runtime rather than with the `query!` macros, so
//! building the crate never needs a live database.

use async_trait::async_trait;
use simplebank_core::messages::Account;
use sqlx::error::ErrorKind;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    CreateAccountParams, CreateSessionParams, CreateUserParams, ListAccountsParams, SessionRecord,
    Store, StoreError, UserRecord,
};

const USER_COLUMNS: &str =
    "username, hashed_password, full_name, email, password_changed_at, created_at";
const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const SESSION_COLUMNS: &str =
    "id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at";

/// Store over a shared [`PgPool`]. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps driver errors onto the store's error vocabulary.
fn map_err(err: sqlx::Error) -> StoreError {
    if matches!(err, sqlx::Error::RowNotFound) {
        return StoreError::NotFound;
    }
    let violation = err
        .as_database_error()
        .map(|db| (db.kind(), db.constraint().unwrap_or_default().to_string()));
    match violation {
        Some((ErrorKind::UniqueViolation, constraint)) => {
            StoreError::UniqueViolation { constraint }
        }
        Some((ErrorKind::ForeignKeyViolation, constraint)) => {
            StoreError::ForeignKeyViolation { constraint }
        }
        _ => StoreError::Database(err),
    }
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        username: row.try_get("username")?,
        hashed_password: row.try_get("hashed_password")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        password_changed_at: row.try_get("password_changed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        balance: row.try_get("balance")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord, sqlx::Error> {
    Ok(SessionRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        refresh_token: row.try_get("refresh_token")?,
        user_agent: row.try_get("user_agent")?,
        client_ip: row.try_get("client_ip")?,
        is_blocked: row.try_get("is_blocked")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, StoreError> {
        let sql = format!(
            "INSERT INTO users (username, hashed_password, full_name, email) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&params.username)
            .bind(&params.hashed_password)
            .bind(&params.full_name)
            .bind(&params.email)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        user_from_row(&row).map_err(map_err)
    }

    async fn get_user(&self, username: &str) -> Result<UserRecord, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        user_from_row(&row).map_err(map_err)
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) \
             VALUES ($1, $2, $3) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&params.owner)
            .bind(params.balance)
            .bind(&params.currency)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        account_from_row(&row).map_err(map_err)
    }

    async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        account_from_row(&row).map_err(map_err)
    }

    async fn list_accounts(&self, params: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner = $1 \
             ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(&params.owner)
            .bind(params.limit)
            .bind(params.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(map_err)?;
        rows.iter()
            .map(account_from_row)
            .collect::<Result<_, _>>()
            .map_err(map_err)
    }

    async fn create_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<SessionRecord, StoreError> {
        let sql = format!(
            "INSERT INTO sessions \
             (id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(params.id)
            .bind(&params.username)
            .bind(&params.refresh_token)
            .bind(&params.user_agent)
            .bind(&params.client_ip)
            .bind(params.is_blocked)
            .bind(params.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        session_from_row(&row).map_err(map_err)
    }

    async fn get_session(&self, id: Uuid) -> Result<SessionRecord, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        session_from_row(&row).map_err(map_err)
    }
}
