//! Request field validation.
//!
//! Each check returns a human-readable reason; [`Violations`] collects them
//! per field so a request reports every bad field at once.

use std::sync::LazyLock;

use regex::Regex;
use simplebank_core::{FieldViolation, RpcStatus};

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").expect("valid username pattern"));
static FULL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z\s]+$").expect("valid full name pattern"));

/// Currencies an account may be opened in.
pub const SUPPORTED_CURRENCIES: [&str; 3] = ["USD", "EUR", "CAD"];

fn string_len(value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(format!("must contain from {min}-{max} characters"));
    }
    Ok(())
}

pub fn username(value: &str) -> Result<(), String> {
    string_len(value, 3, 100)?;
    if !USERNAME.is_match(value) {
        return Err("must contain only lowercase letters, digits, or underscore".to_string());
    }
    Ok(())
}

pub fn password(value: &str) -> Result<(), String> {
    string_len(value, 6, 100)
}

pub fn full_name(value: &str) -> Result<(), String> {
    string_len(value, 3, 100)?;
    if !FULL_NAME.is_match(value) {
        return Err("must contain only letters or spaces".to_string());
    }
    Ok(())
}

pub fn email(value: &str) -> Result<(), String> {
    string_len(value, 3, 200)?;
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err("is not a valid email address".to_string()),
    }
}

pub fn currency(value: &str) -> Result<(), String> {
    if SUPPORTED_CURRENCIES.contains(&value) {
        Ok(())
    } else {
        Err(format!("must be one of {}", SUPPORTED_CURRENCIES.join(", ")))
    }
}

pub fn positive_id(value: i64) -> Result<(), String> {
    if value < 1 {
        return Err("must be a positive integer".to_string());
    }
    Ok(())
}

pub fn in_range(value: i32, min: i32, max: i32) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(())
}

/// Accumulates field violations for one request.
#[derive(Debug, Default)]
pub struct Violations(Vec<FieldViolation>);

impl Violations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `result` against `field` if it is an error.
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(description) = result {
            self.0.push(FieldViolation {
                field: field.to_string(),
                description,
            });
        }
        self
    }

    /// `Ok` when nothing was recorded, otherwise an `InvalidArgument` status.
    ///
    /// # Errors
    ///
    /// Returns the collected violations as [`RpcStatus::invalid_argument`].
    pub fn finish(&mut self) -> Result<(), RpcStatus> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(RpcStatus::invalid_argument(std::mem::take(&mut self.0)))
        }
    }
}
