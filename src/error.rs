//! Agent Immune System error types.
//!
//! Library code returns [`AisError`]. The decision pipeline never lets one of
//! these escape to a caller: it converts them into a [`Decision`] with a
//! stable `code` (`proxy_error` or `internal_error`) at its boundary.
//!
//! [`Decision`]: crate::pipeline::Decision

use thiserror::Error;

/// Agent Immune System errors.
#[derive(Error, Debug)]
pub enum AisError {
    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A pattern failed to compile.
    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern {
        /// Rule type the pattern belongs to.
        name: String,
        /// Compiler message.
        reason: String,
    },

    /// The persistence collaborator failed or was unreachable.
    #[error("Store error: {0}")]
    Store(String),

    /// A record the caller asked for does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input rejected before processing.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Outbound network call failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Outbound network call exceeded its deadline.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for AIS operations
pub type Result<T> = std::result::Result<T, AisError>;

impl From<reqwest::Error> for AisError {
    fn from(err: reqwest::Error) -> Self {
        AisError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for AisError {
    fn from(err: toml::de::Error) -> Self {
        AisError::Config(err.to_string())
    }
}

impl From<regex::Error> for AisError {
    fn from(err: regex::Error) -> Self {
        AisError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_error_converts_to_config() {
        let err: AisError = toml::from_str::<toml::Value>("[broken").unwrap_err().into();
        assert!(matches!(err, AisError::Config(_)));
        assert!(err.to_string().starts_with("Config error"));
    }

    #[test]
    fn test_invalid_pattern_display() {
        let err = AisError::InvalidPattern {
            name: "custom_key".to_string(),
            reason: "unclosed group".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid pattern 'custom_key': unclosed group");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AisError>();
    }
}
