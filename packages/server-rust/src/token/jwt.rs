use std::time::Duration;

use chrono::DateTime;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Payload, TokenError, TokenMaker};

/// Required length of the symmetric signing key, in bytes.
pub const MIN_SECRET_KEY_SIZE: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    jti: Uuid,
    sub: String,
    iat: i64,
    exp: i64,
}

impl From<&Payload> for Claims {
    fn from(payload: &Payload) -> Self {
        Self {
            jti: payload.id,
            sub: payload.username.clone(),
            iat: payload.issued_at.timestamp(),
            exp: payload.expired_at.timestamp(),
        }
    }
}

/// HS256 token maker.
#[derive(Clone)]
pub struct JwtMaker {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtMaker {
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidKeySize`] unless `secret` is exactly
    /// [`MIN_SECRET_KEY_SIZE`] bytes long.
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.len() != MIN_SECRET_KEY_SIZE {
            return Err(TokenError::InvalidKeySize {
                expected: MIN_SECRET_KEY_SIZE,
                actual: secret.len(),
            });
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    fn sign(&self, payload: &Payload) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), &Claims::from(payload), &self.encoding_key)
            .map_err(TokenError::Sign)
    }
}

impl std::fmt::Debug for JwtMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtMaker").finish_non_exhaustive()
    }
}

impl TokenMaker for JwtMaker {
    fn create_token(
        &self,
        username: &str,
        duration: Duration,
    ) -> Result<(String, Payload), TokenError> {
        let payload = Payload::new(username, duration)?;
        let token = self.sign(&payload)?;
        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?
            .claims;
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::Invalid)?;
        let expired_at = DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::Invalid)?;
        Ok(Payload {
            id: claims.jti,
            username: claims.sub,
            issued_at,
            expired_at,
        })
    }
}
