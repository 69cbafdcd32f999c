//! Network front ends: the binary RPC listener and the HTTP gateway.
//!
//! Both follow the same two-step lifecycle. `bind()` claims the address and
//! reports bind failures before anything is served; `serve()` consumes the
//! bound listener and runs until a transport error or the shutdown future
//! resolves.

pub mod client;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod rpc;

use std::fmt;

pub use client::{ClientError, RpcClient};
pub use config::{GatewayOptions, RpcOptions};
pub use gateway::GatewayListener;
pub use rpc::RpcListener;

/// Which front end a listener error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Rpc,
    Gateway,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc => f.write_str("RPC server"),
            Self::Gateway => f.write_str("HTTP gateway"),
        }
    }
}

/// The listen address could not be claimed.
#[derive(Debug, thiserror::Error)]
#[error("cannot create {kind} listener at {addr}: {source}")]
pub struct BindError {
    pub kind: ListenerKind,
    pub addr: String,
    #[source]
    pub source: std::io::Error,
}

/// A bound listener stopped with a transport error.
#[derive(Debug, thiserror::Error)]
#[error("cannot start {kind}: {source}")]
pub struct ServeError {
    pub kind: ListenerKind,
    #[source]
    pub source: std::io::Error,
}
