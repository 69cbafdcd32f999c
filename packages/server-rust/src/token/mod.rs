//! Access and refresh token issuance.
//!
//! The service core depends only on [`TokenMaker`]; [`JwtMaker`] is the
//! HS256 implementation wired in at startup.

mod jwt;

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

pub use jwt::{JwtMaker, MIN_SECRET_KEY_SIZE};

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub id: Uuid,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl Payload {
    /// Builds a fresh payload valid for `duration` from now.
    ///
    /// Timestamps are truncated to whole seconds, the resolution tokens encode.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::DurationOutOfRange`] if `duration` does not fit a
    /// calendar timestamp.
    pub fn new(username: &str, duration: Duration) -> Result<Self, TokenError> {
        let issued_at = Utc::now().trunc_subsecs(0);
        let expired_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| issued_at.checked_add_signed(d))
            .ok_or(TokenError::DurationOutOfRange)?;
        Ok(Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            issued_at,
            expired_at,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid key size: must be exactly {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },
    #[error("token has expired")]
    Expired,
    #[error("token is invalid")]
    Invalid,
    #[error("token duration out of range")]
    DurationOutOfRange,
    #[error("cannot sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

/// Creates and verifies signed tokens.
pub trait TokenMaker: Send + Sync {
    /// Issues a token for `username` valid for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the payload cannot be built or signed.
    fn create_token(&self, username: &str, duration: Duration)
        -> Result<(String, Payload), TokenError>;

    /// Checks the signature and expiry of `token` and returns its payload.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Expired`] or [`TokenError::Invalid`].
    fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
}
