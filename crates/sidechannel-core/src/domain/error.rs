//! Domain-level error taxonomy for sidechannel.
//!
//! Normal operating conditions (dedup rejection, expiry, eviction, unknown ids)
//! are never errors. Only malformed input and misconfiguration surface here.

/// Errors produced by boundary validation of message candidates.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("confidence must be a finite value in [0, 1], got {value}")]
    ConfidenceOutOfRange { value: f64 },

    #[error("unknown message category: {name}")]
    UnknownCategory { name: String },

    #[error("field must not be empty: {field}")]
    EmptyField { field: &'static str },
}

/// sidechannel errors.
#[derive(Debug, thiserror::Error)]
pub enum SidechannelError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("handler already registered: {0}")]
    HandlerAlreadyRegistered(String),

    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    #[error("invalid filter pattern: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no tokio runtime available for background dispatch")]
    NoRuntime,
}

/// Result type for sidechannel operations.
pub type Result<T> = std::result::Result<T, SidechannelError>;
