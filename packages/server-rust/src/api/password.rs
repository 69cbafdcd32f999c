//! scrypt password hashing.
//!
//! Stored form: `scrypt$<log_n>$<r>$<p>$<salt hex>$<key hex>`. The cost
//! parameters travel with each hash, so raising [`LOG_N`] never invalidates
//! existing users.

use scrypt::Params;
use subtle::ConstantTimeEq;

const SCHEME: &str = "scrypt";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// CPU/memory cost for new hashes (2^15 rounds, 32 MiB at r = 8).
#[cfg(not(test))]
pub const LOG_N: u8 = 15;
#[cfg(test)]
pub const LOG_N: u8 = 10;
const R: u32 = 8;
const P: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid scrypt parameters: {0}")]
    Params(#[from] scrypt::errors::InvalidParams),
    #[error("invalid scrypt output length: {0}")]
    OutputLen(#[from] scrypt::errors::InvalidOutputLen),
}

fn derive(password: &str, salt: &[u8], params: &Params, len: usize) -> Result<Vec<u8>, PasswordError> {
    let mut key = vec![0u8; len];
    scrypt::scrypt(password.as_bytes(), salt, params, &mut key)?;
    Ok(key)
}

/// Hashes `password` with a fresh random salt.
///
/// CPU bound; call from a blocking task.
///
/// # Errors
///
/// Returns [`PasswordError`] only if the compiled-in cost parameters are
/// rejected by `scrypt`.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt: [u8; SALT_LEN] = rand::random();
    let params = Params::new(LOG_N, R, P, KEY_LEN)?;
    let key = derive(password, &salt, &params, KEY_LEN)?;
    Ok(format!(
        "{SCHEME}${LOG_N}${R}${P}${}${}",
        hex::encode(salt),
        hex::encode(key)
    ))
}

/// Returns `true` if `password` matches `hashed`. Malformed hashes never match.
///
/// CPU bound; call from a blocking task.
#[must_use]
pub fn check_password(password: &str, hashed: &str) -> bool {
    let mut parts = hashed.split('$');
    let (Some(SCHEME), Some(log_n), Some(r), Some(p), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let (Ok(log_n), Ok(r), Ok(p)) = (log_n.parse::<u8>(), r.parse::<u32>(), p.parse::<u32>()) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    let Ok(params) = Params::new(log_n, r, p, expected.len()) else {
        return false;
    };
    let Ok(actual) = derive(password, &salt, &params, expected.len()) else {
        return false;
    };
    actual.as_slice().ct_eq(expected.as_slice()).into()
}
