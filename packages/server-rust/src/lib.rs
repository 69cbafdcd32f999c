//! `SimpleBank` server: configuration, schema migration, the service core, and
//! its two front ends (a binary RPC listener and a JSON/HTTP gateway).

pub mod api;
pub mod config;
pub mod migrate;
pub mod network;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod token;

pub use api::{CallContext, ConstructionError, ServiceCore};
pub use config::{Config, ConfigError};
pub use store::{Database, Store};
pub use supervisor::{Stage, StartupError};
