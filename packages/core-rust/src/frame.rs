//! Wire framing for the binary RPC transport and the shared payload codecs.
//!
//! A connection carries a sequence of length-delimited frames. Each frame is
//! a `MsgPack` map produced by `rmp_serde::to_vec_named()`: a [`RequestFrame`]
//! from client to server, a [`ResponseFrame`] back. The inner `payload` holds
//! the method's request or response message, encoded the same way.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::status::RpcStatus;

/// Upper bound on a single frame, shared by client and server codecs.
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

/// Metadata key carrying the bearer access token.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Metadata key carrying the caller's user agent.
pub const USER_AGENT_KEY: &str = "user-agent";

/// A single call from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Caller-chosen correlation id, echoed in the response.
    pub id: u64,
    /// Fully qualified method name.
    pub method: String,
    /// Lower-case metadata keys (`authorization`, `user-agent`, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// The server's answer to one [`RequestFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub status: RpcStatus,
    /// Encoded response message; empty unless `status` is OK.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl ResponseFrame {
    #[must_use]
    pub fn ok(id: u64, payload: Vec<u8>) -> Self {
        Self {
            id,
            status: RpcStatus::ok(),
            payload,
        }
    }

    #[must_use]
    pub fn error(id: u64, status: RpcStatus) -> Self {
        Self {
            id,
            status,
            payload: Vec::new(),
        }
    }
}

/// Errors from encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Payload encoding used by a transport.
///
/// The RPC listener speaks `MsgPack`; the HTTP gateway speaks JSON. Both
/// decode into the same message types, so a dispatcher parameterized by the
/// format serves either transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    MsgPack,
    Json,
}

impl WireFormat {
    /// Encodes a message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the value cannot be serialized.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
            Self::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decodes a message. An empty buffer decodes as an empty object, so
    /// calls whose request has no set fields may omit the body entirely.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the bytes are not a valid encoding of `T`.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::MsgPack if bytes.is_empty() => Ok(rmp_serde::from_slice(&[0x80])?),
            Self::MsgPack => Ok(rmp_serde::from_slice(bytes)?),
            Self::Json if bytes.is_empty() => Ok(serde_json::from_slice(b"{}")?),
            Self::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
