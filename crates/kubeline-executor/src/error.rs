//! Executor errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Parameters could not be turned into an executor. Reported before any step runs.
    #[error("invalid executor parameters: {0}")]
    Construction(String),

    #[error("unknown plugin kind: {0}")]
    UnknownKind(String),

    #[error("{step}: {message}")]
    Step { step: String, message: String },

    #[error("`{program}` exited with {status}")]
    CommandFailed { program: String, status: String },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("container {image} exited with code {code}")]
    ContainerFailed { image: String, code: i64 },

    /// The blocking call in progress observed cancellation.
    #[error("canceled")]
    Canceled,

    #[error("executor has already run")]
    AlreadyExecuted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl ExecutorError {
    pub fn step(step: impl ToString, message: impl Into<String>) -> Self {
        ExecutorError::Step {
            step: step.to_string(),
            message: message.into(),
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            ExecutorError::Construction(_) | ExecutorError::UnknownKind(_)
        )
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(e: serde_json::Error) -> Self {
        ExecutorError::Construction(e.to_string())
    }
}

pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;
