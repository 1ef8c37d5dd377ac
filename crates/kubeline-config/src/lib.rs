//! KDL configuration parsing for Kubeline.
//!
//! This crate handles parsing of:
//! - Pipeline files (stages, job parameters, local fixtures)
//! - Engine configuration (kubeline.kdl)

pub mod error;
mod kdl_util;
pub mod pipeline;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::{Fixtures, PipelineFile, load_pipeline, parse_pipeline};
pub use system::{EngineConfig, LogFormat, ToolPaths, load_engine_config, parse_engine_config};
