//! The service core: one instance of the bank's RPC contract.
//!
//! [`ServiceCore`] holds the configuration, the data-access capability and the
//! token maker. It is built once per process and shared by `Arc` between the
//! RPC listener and the gateway, which both enter it through [`dispatch`].

mod auth;
mod dispatch;
mod handlers;
pub mod password;
pub mod validate;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use simplebank_core::frame::{AUTHORIZATION_KEY, USER_AGENT_KEY};

use crate::config::Config;
use crate::store::Store;
use crate::token::{JwtMaker, TokenError, TokenMaker};

pub use auth::AUTHORIZATION_BEARER;
pub use dispatch::{dispatch, dispatch_by_name};

/// Errors raised while building the [`ServiceCore`].
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("cannot create token maker: {0}")]
    TokenMaker(#[source] TokenError),
}

/// Per-call transport context shared by both listeners.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Lower-cased metadata keys (HTTP headers on the gateway path).
    pub metadata: BTreeMap<String, String>,
    pub client_ip: Option<IpAddr>,
}

impl CallContext {
    #[must_use]
    pub fn new(metadata: BTreeMap<String, String>, client_ip: Option<IpAddr>) -> Self {
        Self {
            metadata,
            client_ip,
        }
    }

    #[must_use]
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.metadata
            .insert(AUTHORIZATION_KEY.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.metadata_value(USER_AGENT_KEY).unwrap_or_default()
    }

    #[must_use]
    pub fn client_ip_string(&self) -> String {
        self.client_ip.map(|ip| ip.to_string()).unwrap_or_default()
    }
}

/// Shared implementation of every contract method.
pub struct ServiceCore {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    tokens: Arc<dyn TokenMaker>,
}

impl ServiceCore {
    /// Builds the core with an HS256 token maker keyed by
    /// `config.token_symmetric_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::TokenMaker`] unless the key is exactly 32
    /// bytes.
    pub fn new(config: Arc<Config>, store: Arc<dyn Store>) -> Result<Self, ConstructionError> {
        let maker = JwtMaker::new(config.token_symmetric_key.as_bytes())
            .map_err(ConstructionError::TokenMaker)?;
        Ok(Self::with_token_maker(config, store, Arc::new(maker)))
    }

    #[must_use]
    pub fn with_token_maker(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        tokens: Arc<dyn TokenMaker>,
    ) -> Self {
        Self {
            config,
            store,
            tokens,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn token_maker(&self) -> &Arc<dyn TokenMaker> {
        &self.tokens
    }
}

impl std::fmt::Debug for ServiceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
