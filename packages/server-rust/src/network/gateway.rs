//! HTTP gateway: JSON transcoding onto the RPC contract.
//!
//! Routes:
//! - `POST /v1/<wire_name>` for every contract method
//! - `GET /health/live` liveness probe
//! - `/swagger/*` static API documentation

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::routing::{get, post};
use axum::Router;
use simplebank_core::Method;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

use super::config::GatewayOptions;
use super::handlers::{liveness_handler, transcode, GatewayState};
use super::middleware::build_http_layers;
use super::{BindError, ListenerKind, ServeError};
use crate::api::ServiceCore;

/// Assembles the gateway router over `core`.
pub fn build_router(core: Arc<ServiceCore>, options: &GatewayOptions) -> Router {
    let state = GatewayState {
        core,
        max_body_length: options.max_body_length,
    };

    let api = Method::ALL.into_iter().fold(Router::new(), |router, method| {
        router.route(
            &method.http_path(),
            post(move |state: State<GatewayState>, request: Request| {
                transcode(state, method, request)
            }),
        )
    });

    api.route("/health/live", get(liveness_handler))
        .nest_service("/swagger", ServeDir::new(&options.swagger_dir))
        .layer(build_http_layers(options))
        .with_state(state)
}

/// A bound, not yet serving, HTTP gateway.
#[derive(Debug)]
pub struct GatewayListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: GatewayOptions,
}

impl GatewayListener {
    /// Claims `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] if the address is malformed or already in use.
    pub async fn bind(addr: &str, options: GatewayOptions) -> Result<Self, BindError> {
        let bind_err = |source: std::io::Error| BindError {
            kind: ListenerKind::Gateway,
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!(addr = %local_addr, "HTTP gateway listener bound");
        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] if the server stops with an I/O error.
    pub async fn serve(
        self,
        core: Arc<ServiceCore>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServeError> {
        let router = build_router(core, &self.options);
        info!(addr = %self.local_addr, "start HTTP gateway");

        axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| ServeError {
            kind: ListenerKind::Gateway,
            source,
        })?;

        info!(addr = %self.local_addr, "HTTP gateway stopped");
        Ok(())
    }
}
