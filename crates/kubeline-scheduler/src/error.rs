//! Why a stage did not succeed.

use kubeline_executor::ExecutorError;
use kubeline_plugin::{CatalogError, ResolutionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("plugin lookup failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("parameter resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("failed to prepare stage directory: {0}")]
    Io(#[from] std::io::Error),
}
