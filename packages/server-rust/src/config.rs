//! Process configuration: an `app.env` file overlaid by environment variables.
//!
//! The loaded [`Config`] is an immutable value. It is built once at startup,
//! wrapped in an `Arc`, and handed to every component; nothing reads the
//! environment after [`Config::load`] returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the config directory.
pub const CONFIG_FILE_NAME: &str = "app.env";

const DB_DRIVER: &str = "DB_DRIVER";
const DB_SOURCE: &str = "DB_SOURCE";
const HTTP_SERVER_ADDRESS: &str = "HTTP_SERVER_ADDRESS";
const GRPC_SERVER_ADDRESS: &str = "GRPC_SERVER_ADDRESS";
const RPC_SERVER_ADDRESS: &str = "RPC_SERVER_ADDRESS";
const TOKEN_SYMMETRIC_KEY: &str = "TOKEN_SYMMETRIC_KEY";
const ACCESS_TOKEN_DURATION: &str = "ACCESS_TOKEN_DURATION";
const REFRESH_TOKEN_DURATION: &str = "REFRESH_TOKEN_DURATION";
const MIGRATION_URL: &str = "MIGRATION_URL";
const SWAGGER_DIR: &str = "SWAGGER_DIR";
const RPC_REFLECTION: &str = "RPC_REFLECTION";
const CORS_ALLOWED_ORIGINS: &str = "CORS_ALLOWED_ORIGINS";

/// Every key the loader recognizes. Environment variables outside this list
/// are never consulted.
pub const KNOWN_KEYS: [&str; 12] = [
    DB_DRIVER,
    DB_SOURCE,
    HTTP_SERVER_ADDRESS,
    GRPC_SERVER_ADDRESS,
    RPC_SERVER_ADDRESS,
    TOKEN_SYMMETRIC_KEY,
    ACCESS_TOKEN_DURATION,
    REFRESH_TOKEN_DURATION,
    MIGRATION_URL,
    SWAGGER_DIR,
    RPC_REFLECTION,
    CORS_ALLOWED_ORIGINS,
];

/// Errors raised while resolving configuration. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("missing required config key {key}")]
    Missing { key: &'static str },
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Symmetric token-signing secret. `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(String);

impl SymmetricKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Resolved service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Storage driver identifier (`postgres` or `memory`).
    pub db_driver: String,
    /// Driver-specific connection string.
    pub db_source: String,
    /// Bind address of the HTTP gateway, e.g. `0.0.0.0:8080`.
    pub http_server_address: String,
    /// Bind address of the binary RPC listener, e.g. `0.0.0.0:9090`. Read
    /// from `GRPC_SERVER_ADDRESS`; `RPC_SERVER_ADDRESS` wins when both are set.
    pub rpc_server_address: String,
    pub token_symmetric_key: SymmetricKey,
    pub access_token_duration: Duration,
    pub refresh_token_duration: Duration,
    /// Location of the migration scripts (`file://db/migration`).
    pub migration_url: String,
    /// Directory served by the gateway under `/swagger/`.
    pub swagger_dir: PathBuf,
    /// Whether the RPC listener answers reflection calls.
    pub rpc_reflection: bool,
    /// Origins the gateway allows cross-origin calls from; `*` allows any.
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Loads `app.env` from `dir` and overlays the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, a required key is
    /// absent, or a value cannot be coerced to its type.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(dir, std::env::vars())
    }

    /// Same as [`Config::load`] with an explicit environment. Entries in
    /// `env` take precedence over the file for every recognized key.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with_env<I>(dir: impl AsRef<Path>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        let mut values = read_env_file(&path)?;

        for (key, value) in env {
            if KNOWN_KEYS.contains(&key.as_str()) {
                values.insert(key, value);
            }
        }

        Self::from_values(&values)
    }

    fn from_values(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            values
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or(ConfigError::Missing { key })
        };
        let duration = |key: &'static str| -> Result<Duration, ConfigError> {
            let raw = required(key)?;
            parse_duration(&raw).map_err(|reason| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason,
            })
        };

        let rpc_reflection = match values.get(RPC_REFLECTION) {
            None => true,
            Some(raw) => parse_bool(raw).ok_or_else(|| ConfigError::Invalid {
                key: RPC_REFLECTION,
                value: raw.clone(),
                reason: "expected true or false".to_string(),
            })?,
        };

        let rpc_server_address =
            required(RPC_SERVER_ADDRESS).or_else(|_| required(GRPC_SERVER_ADDRESS))?;

        let cors_origins = values.get(CORS_ALLOWED_ORIGINS).map_or_else(
            || vec!["*".to_string()],
            |raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            },
        );

        Ok(Self {
            db_driver: required(DB_DRIVER)?,
            db_source: required(DB_SOURCE)?,
            http_server_address: required(HTTP_SERVER_ADDRESS)?,
            rpc_server_address,
            token_symmetric_key: SymmetricKey::new(required(TOKEN_SYMMETRIC_KEY)?),
            access_token_duration: duration(ACCESS_TOKEN_DURATION)?,
            refresh_token_duration: duration(REFRESH_TOKEN_DURATION)?,
            migration_url: required(MIGRATION_URL)?,
            swagger_dir: values
                .get(SWAGGER_DIR)
                .map_or_else(|| PathBuf::from("./doc/swagger"), PathBuf::from),
            rpc_reflection,
            cors_origins,
        })
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let read_err = |source: dotenvy::Error| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut values = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(read_err)? {
        let (key, value) = item.map_err(read_err)?;
        values.insert(key, value);
    }
    Ok(values)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parses a duration written as a sequence of `<number><unit>` pairs, such as
/// `15m`, `24h`, `1h30m`, or `1.5s`. Units: `ns`, `us`/`µs`, `ms`, `s`, `m`,
/// `h`. A bare `0` is accepted. Negative values are rejected.
///
/// # Errors
///
/// Returns a description of the first malformed component.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let input = raw.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_nanos: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("expected a number at {rest:?}"));
        }
        let number = &rest[..number_len];
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            "" => return Err(format!("missing unit in {input:?}")),
            other => return Err(format!("unknown unit {other:?}")),
        };
        rest = &rest[unit_len..];

        total_nanos = total_nanos
            .checked_add(component_nanos(number, unit_nanos)?)
            .ok_or_else(|| "duration overflows".to_string())?;
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000)
        .map_err(|_| "duration overflows".to_string())?;
    // Remainder of a division by 1e9 always fits in u32.
    #[allow(clippy::cast_possible_truncation)]
    let nanos = (total_nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, nanos))
}

/// Converts one `<number>` (integer or decimal) scaled by `unit_nanos` into
/// whole nanoseconds, truncating any sub-nanosecond remainder.
fn component_nanos(number: &str, unit_nanos: u128) -> Result<u128, String> {
    let invalid = || format!("invalid number {number:?}");
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && frac.is_empty()) || frac.contains('.') {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let mut nanos = whole.checked_mul(unit_nanos).ok_or_else(invalid)?;

    if !frac.is_empty() {
        // Digits past the unit's nanosecond precision cannot change the result.
        let precision = unit_nanos.ilog10() + 1;
        let digits = u32::try_from(frac.len()).map_or(precision, |len| len.min(precision));
        let frac_value: u128 = frac[..digits as usize].parse().map_err(|_| invalid())?;
        let frac_nanos = frac_value
            .checked_mul(unit_nanos)
            .ok_or_else(invalid)?
            / 10u128.pow(digits);
        nanos = nanos.checked_add(frac_nanos).ok_or_else(invalid)?;
    }
    Ok(nanos)
}
