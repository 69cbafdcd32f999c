//! In-process database used for local runs and tests.
//!
//! [`MemoryDatabase`] keeps every table behind one `parking_lot::RwLock` and
//! records applied migration versions alongside the data, the same way a
//! relational engine keeps its migration marker in a table of its own.
//! Queries fail with [`StoreError::SchemaNotReady`] until at least one
//! migration has been applied.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use simplebank_core::messages::Account;
use uuid::Uuid;

use super::{
    CreateAccountParams, CreateSessionParams, CreateUserParams, ListAccountsParams, SessionRecord,
    Store, StoreError, UserRecord, ACCOUNTS_OWNER_FKEY, OWNER_CURRENCY_KEY,
    SESSIONS_USERNAME_FKEY, USERS_EMAIL_KEY, USERS_PKEY,
};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<String, UserRecord>,
    accounts: BTreeMap<i64, Account>,
    next_account_id: i64,
    sessions: HashMap<Uuid, SessionRecord>,
}

#[derive(Debug, Default)]
struct State {
    /// Applied migration versions and their descriptions.
    migrations: BTreeMap<i64, String>,
    tables: Tables,
}

/// A named, shareable in-memory database.
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    state: RwLock<State>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(State::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest applied migration version, or `None` for a fresh database.
    #[must_use]
    pub fn schema_version(&self) -> Option<i64> {
        self.state.read().migrations.keys().next_back().copied()
    }

    /// All applied versions in ascending order.
    #[must_use]
    pub fn applied_versions(&self) -> Vec<i64> {
        self.state.read().migrations.keys().copied().collect()
    }

    /// Records `version` as applied.
    pub fn apply_migration(&self, version: i64, description: &str) {
        self.state
            .write()
            .migrations
            .insert(version, description.to_string());
    }

    /// Removes `version` from the applied set. Reverting the last migration
    /// drops every table.
    pub fn revert_migration(&self, version: i64) {
        let mut state = self.state.write();
        state.migrations.remove(&version);
        if state.migrations.is_empty() {
            state.tables = Tables::default();
        }
    }
}

/// [`Store`] implementation over a [`MemoryDatabase`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db: Arc<MemoryDatabase>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let state = self.db.state.read();
        if state.migrations.is_empty() {
            return Err(StoreError::SchemaNotReady);
        }
        f(&state.tables)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.db.state.write();
        if state.migrations.is_empty() {
            return Err(StoreError::SchemaNotReady);
        }
        f(&mut state.tables)
    }
}

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn foreign_key(constraint: &str) -> StoreError {
    StoreError::ForeignKeyViolation {
        constraint: constraint.to_string(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, StoreError> {
        self.write(|tables| {
            if tables.users.contains_key(&params.username) {
                return Err(unique(USERS_PKEY));
            }
            if tables.users.values().any(|u| u.email == params.email) {
                return Err(unique(USERS_EMAIL_KEY));
            }
            let now = Utc::now();
            let record = UserRecord {
                username: params.username,
                hashed_password: params.hashed_password,
                full_name: params.full_name,
                email: params.email,
                password_changed_at: now,
                created_at: now,
            };
            tables.users.insert(record.username.clone(), record.clone());
            Ok(record)
        })
    }

    async fn get_user(&self, username: &str) -> Result<UserRecord, StoreError> {
        self.read(|tables| tables.users.get(username).cloned().ok_or(StoreError::NotFound))
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, StoreError> {
        self.write(|tables| {
            if !tables.users.contains_key(&params.owner) {
                return Err(foreign_key(ACCOUNTS_OWNER_FKEY));
            }
            if tables
                .accounts
                .values()
                .any(|a| a.owner == params.owner && a.currency == params.currency)
            {
                return Err(unique(OWNER_CURRENCY_KEY));
            }
            tables.next_account_id += 1;
            let account = Account {
                id: tables.next_account_id,
                owner: params.owner,
                balance: params.balance,
                currency: params.currency,
                created_at: Utc::now(),
            };
            tables.accounts.insert(account.id, account.clone());
            Ok(account)
        })
    }

    async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        self.read(|tables| tables.accounts.get(&id).cloned().ok_or(StoreError::NotFound))
    }

    async fn list_accounts(&self, params: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        let offset = usize::try_from(params.offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(params.limit.max(0)).unwrap_or(usize::MAX);
        self.read(|tables| {
            Ok(tables
                .accounts
                .values()
                .filter(|a| a.owner == params.owner)
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    async fn create_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<SessionRecord, StoreError> {
        self.write(|tables| {
            if !tables.users.contains_key(&params.username) {
                return Err(foreign_key(SESSIONS_USERNAME_FKEY));
            }
            let record = SessionRecord {
                id: params.id,
                username: params.username,
                refresh_token: params.refresh_token,
                user_agent: params.user_agent,
                client_ip: params.client_ip,
                is_blocked: params.is_blocked,
                expires_at: params.expires_at,
                created_at: Utc::now(),
            };
            tables.sessions.insert(record.id, record.clone());
            Ok(record)
        })
    }

    async fn get_session(&self, id: Uuid) -> Result<SessionRecord, StoreError> {
        self.read(|tables| tables.sessions.get(&id).cloned().ok_or(StoreError::NotFound))
    }
}
