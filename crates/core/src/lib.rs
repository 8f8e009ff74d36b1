//! Shared primitives for all Rust crates in Warden.

#![forbid(unsafe_code)]

/// Caller context primitives shared across services.
pub mod caller;

use thiserror::Error;

use serde::{Deserialize, Serialize};

pub use caller::CallerContext;

/// Result type used across Warden crates.
pub type AppResult<T> = Result<T, AppError>;

/// Maximum accepted length for identifiers such as role, group or subject names.
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Validates an identifier used as a policy key.
///
/// Identifiers must be non-blank, carry no surrounding whitespace or control
/// characters and stay within [`MAX_IDENTIFIER_LENGTH`] bytes. `kind` names the
/// identifier in the error message.
pub fn validate_identifier(kind: &str, value: &str) -> AppResult<String> {
    let value = NonEmptyString::new(value)
        .map_err(|_| AppError::Validation(format!("{kind} must not be empty")))?;

    if value.as_str().trim() != value.as_str() {
        return Err(AppError::Validation(format!(
            "{kind} '{}' must not have leading or trailing whitespace",
            value.as_str()
        )));
    }

    if value.as_str().len() > MAX_IDENTIFIER_LENGTH {
        return Err(AppError::Validation(format!(
            "{kind} must be at most {MAX_IDENTIFIER_LENGTH} bytes"
        )));
    }

    if value.as_str().chars().any(char::is_control) {
        return Err(AppError::Validation(format!(
            "{kind} must not contain control characters"
        )));
    }

    Ok(value.into())
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Mutation attempted on a built-in, readonly role.
    #[error("default role: {0}")]
    DefaultRole(String),

    /// Subject is blocked by authorization policy.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}
