//! Gateway route handlers and their shared state.

pub mod health;
pub mod transcode;

pub use health::liveness_handler;
pub use transcode::{error_response, http_status, transcode};

use std::sync::Arc;

use crate::api::ServiceCore;

/// State passed to every gateway handler. Cloning shares the core.
#[derive(Clone)]
pub struct GatewayState {
    pub core: Arc<ServiceCore>,
    /// Largest request body the transcoder buffers.
    pub max_body_length: usize,
}
