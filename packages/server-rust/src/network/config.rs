//! Listener options derived from the service configuration.

use std::path::PathBuf;
use std::time::Duration;

use simplebank_core::frame::MAX_FRAME_LENGTH;

use crate::config::Config;

/// Options for the binary RPC listener.
#[derive(Debug, Clone)]
pub struct RpcOptions {
    /// Serve the reflection method alongside the contract.
    pub reflection: bool,
    /// Largest accepted frame, in bytes.
    pub max_frame_length: usize,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            reflection: true,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

impl RpcOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            reflection: config.rpc_reflection,
            ..Self::default()
        }
    }
}

/// Options for the HTTP gateway.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Directory served under `/swagger/`.
    pub swagger_dir: PathBuf,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Largest accepted request body, in bytes.
    pub max_body_length: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            swagger_dir: PathBuf::from("./doc/swagger"),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_length: MAX_FRAME_LENGTH,
        }
    }
}

impl GatewayOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            swagger_dir: config.swagger_dir.clone(),
            cors_origins: config.cors_origins.clone(),
            ..Self::default()
        }
    }
}
