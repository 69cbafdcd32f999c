//! Binary RPC listener.
//!
//! Each TCP connection carries length-delimited frames (4-byte big-endian
//! length prefix). A frame is a named-field `MsgPack` [`RequestFrame`]; the
//! listener answers each one with a [`ResponseFrame`] carrying the same id, in
//! request order.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use simplebank_core::contract::REFLECTION_LIST_METHODS;
use simplebank_core::{
    Code, ListMethodsResponse, RequestFrame, ResponseFrame, RpcStatus, WireFormat,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use super::config::RpcOptions;
use super::{BindError, ListenerKind, ServeError};
use crate::api::{dispatch_by_name, CallContext, ServiceCore};

/// A bound, not yet serving, RPC endpoint.
#[derive(Debug)]
pub struct RpcListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: RpcOptions,
}

impl RpcListener {
    /// Claims `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] if the address is malformed or already in use.
    pub async fn bind(addr: &str, options: RpcOptions) -> Result<Self, BindError> {
        let bind_err = |source: io::Error| BindError {
            kind: ListenerKind::Rpc,
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!(addr = %local_addr, reflection = options.reflection, "RPC listener bound");
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

    /// Accepts connections until `shutdown` resolves or accepting fails.
    ///
    /// Transient accept errors (a peer resetting before the handshake
    /// completes) are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError`] on any other accept failure.
    pub async fn serve(
        self,
        core: Arc<ServiceCore>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServeError> {
        info!(addr = %self.local_addr, "start RPC server");
        let max_frame_length = self.options.max_frame_length;
        let reflection = self.options.reflection;
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    info!(addr = %self.local_addr, "RPC server stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let core = Arc::clone(&core);
                    tokio::spawn(async move {
                        serve_connection(stream, peer, core, max_frame_length, reflection).await;
                    });
                }
                Err(err) if is_transient(&err) => {
                    warn!(error = %err, "failed to accept RPC connection");
                }
                Err(source) => {
                    return Err(ServeError {
                        kind: ListenerKind::Rpc,
                        source,
                    })
                }
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Builds the length-delimited codec shared by the listener and the client.
pub(crate) fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    core: Arc<ServiceCore>,
    max_frame_length: usize,
    reflection: bool,
) {
    debug!(peer = %peer, "RPC connection opened");
    let mut framed = Framed::new(stream, frame_codec(max_frame_length));

    while let Some(frame) = framed.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(peer = %peer, error = %err, "RPC connection read failed");
                break;
            }
        };

        let response = handle_frame(&core, peer, &bytes, reflection).await;
        let encoded = match rmp_serde::to_vec_named(&response) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(peer = %peer, error = %err, "cannot encode RPC response");
                break;
            }
        };
        if let Err(err) = framed.send(Bytes::from(encoded)).await {
            debug!(peer = %peer, error = %err, "RPC connection write failed");
            break;
        }
    }

    debug!(peer = %peer, "RPC connection closed");
}

async fn handle_frame(
    core: &ServiceCore,
    peer: SocketAddr,
    bytes: &[u8],
    reflection: bool,
) -> ResponseFrame {
    let request: RequestFrame = match rmp_serde::from_slice(bytes) {
        Ok(request) => request,
        Err(err) => {
            warn!(peer = %peer, error = %err, "malformed RPC frame");
            return ResponseFrame::error(
                0,
                RpcStatus::new(Code::InvalidArgument, format!("malformed frame: {err}")),
            );
        }
    };

    let result = if request.method == REFLECTION_LIST_METHODS {
        if reflection {
            WireFormat::MsgPack
                .encode(&ListMethodsResponse::for_contract())
                .map_err(|err| RpcStatus::internal(err.to_string()))
        } else {
            Err(RpcStatus::unimplemented("reflection is disabled"))
        }
    } else {
        let metadata = request
            .metadata
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();
        let ctx = CallContext::new(metadata, Some(peer.ip()));
        dispatch_by_name(core, &request.method, &ctx, &request.payload, WireFormat::MsgPack).await
    };

    match result {
        Ok(payload) => ResponseFrame::ok(request.id, payload),
        Err(status) => {
            warn!(
                peer = %peer,
                method = %request.method,
                code = %status.code,
                message = %status.message,
                "RPC call failed"
            );
            ResponseFrame::error(request.id, status)
        }
    }
}
