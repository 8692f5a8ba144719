//! SafeDLP error types

use thiserror::Error;

/// SafeDLP error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pattern compilation or registry error
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Audit record failed validation before chain construction
    #[error("Validation error: record {index} is missing required field '{field}'")]
    Validation {
        /// Zero-based position of the offending record
        index: usize,
        /// Name of the missing field
        field: &'static str,
    },

    /// Audit chain error
    #[error("Audit error: {0}")]
    Audit(String),

    /// Audit store error
    #[error("Store error: {0}")]
    Store(String),

    /// Cryptographic error
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Skill execution error
    #[error("Skill error: {0}")]
    Skill(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for SafeDLP operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err = Error::Validation {
            index: 2,
            field: "tenant_id",
        };
        let msg = err.to_string();
        assert!(msg.contains("tenant_id"));
        assert!(msg.contains("record 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
