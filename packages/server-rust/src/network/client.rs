//! Minimal client for the binary RPC listener.
//!
//! Used by the integration tests and handy for scripting against a running
//! server. Calls are sequential over one connection.

use std::collections::BTreeMap;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use simplebank_core::contract::REFLECTION_LIST_METHODS;
use simplebank_core::frame::{AUTHORIZATION_KEY, MAX_FRAME_LENGTH};
use simplebank_core::{
    CodecError, ListMethodsResponse, Method, RequestFrame, ResponseFrame, RpcStatus, WireFormat,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::rpc::frame_codec;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame codec error: {0}")]
    Frame(#[from] rmp_serde::decode::Error),
    #[error("frame encode error: {0}")]
    FrameEncode(#[from] rmp_serde::encode::Error),
    #[error("payload codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("call failed: {0}")]
    Status(RpcStatus),
    #[error("connection closed by server")]
    Closed,
    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: u64, actual: u64 },
}

impl ClientError {
    /// The call's status, if the server answered with an error.
    #[must_use]
    pub fn status(&self) -> Option<&RpcStatus> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }
}

pub struct RpcClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    next_id: u64,
    bearer: Option<String>,
}

impl RpcClient {
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec(MAX_FRAME_LENGTH)),
            next_id: 0,
            bearer: None,
        })
    }

    /// Sends `authorization: bearer <token>` with every subsequent call.
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.bearer = Some(token.into());
    }

    /// Sends one frame and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or frame errors. A call that
    /// failed server-side is still `Ok`; inspect the frame's status.
    pub async fn call_raw(
        &mut self,
        method: &str,
        payload: Vec<u8>,
    ) -> Result<ResponseFrame, ClientError> {
        self.next_id += 1;
        let mut metadata = BTreeMap::new();
        if let Some(token) = &self.bearer {
            metadata.insert(AUTHORIZATION_KEY.to_string(), format!("bearer {token}"));
        }
        let request = RequestFrame {
            id: self.next_id,
            method: method.to_string(),
            metadata,
            payload,
        };
        self.send_frame(&rmp_serde::to_vec_named(&request)?).await?;

        let response: ResponseFrame = self.read_frame().await?;
        if response.id != request.id {
            return Err(ClientError::IdMismatch {
                expected: request.id,
                actual: response.id,
            });
        }
        Ok(response)
    }

    /// Sends raw bytes as one frame. Used to exercise malformed input.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the write fails.
    pub async fn send_frame(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.framed.send(Bytes::copy_from_slice(bytes)).await?;
        Ok(())
    }

    /// Reads and decodes the next response frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the server hung up.
    pub async fn read_frame(&mut self) -> Result<ResponseFrame, ClientError> {
        let bytes = self.framed.next().await.ok_or(ClientError::Closed)??;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    /// Calls a contract method with a typed request.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Status`] when the server reports a failure.
    pub async fn call<Req, Resp>(&mut self, method: Method, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = WireFormat::MsgPack.encode(request)?;
        let response = self.call_raw(&method.full_name(), payload).await?;
        if !response.status.is_ok() {
            return Err(ClientError::Status(response.status));
        }
        Ok(WireFormat::MsgPack.decode(&response.payload)?)
    }

    /// Lists the served contract through the reflection method.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Status`] with `Unimplemented` if reflection is off.
    pub async fn list_methods(&mut self) -> Result<ListMethodsResponse, ClientError> {
        let response = self.call_raw(REFLECTION_LIST_METHODS, Vec::new()).await?;
        if !response.status.is_ok() {
            return Err(ClientError::Status(response.status));
        }
        Ok(WireFormat::MsgPack.decode(&response.payload)?)
    }
}
