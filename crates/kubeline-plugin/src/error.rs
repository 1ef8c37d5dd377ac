//! Catalog and resolution errors.

use kubeline_core::plugin::ParamSource;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin store error: {0}")]
    Store(#[from] kubeline_core::Error),
}

/// A parameter could not be resolved. The stage must not run.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("resolve {param} from {from}: {error}")]
    Lookup {
        param: String,
        from: ParamSource,
        #[source]
        error: kubeline_core::Error,
    },

    #[error("invalid reference for {param}: {value}")]
    InvalidReference { param: String, value: String },
}

impl ResolutionError {
    pub fn param(&self) -> &str {
        match self {
            ResolutionError::Lookup { param, .. } => param,
            ResolutionError::InvalidReference { param, .. } => param,
        }
    }
}
