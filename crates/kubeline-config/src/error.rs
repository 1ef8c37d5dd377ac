//! Errors raised while reading engine configuration and pipeline files.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Two stages, or two fixtures of one kind, share a name or id.
    #[error("{kind} {key} is declared more than once")]
    Duplicate { kind: &'static str, key: String },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("stage dependencies form a cycle: {0}")]
    CycleDetected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
