//! Core domain types and traits for the Kubeline pipeline engine.
//!
//! This crate contains:
//! - Resource identifiers and the tagged parameter value type
//! - Plugin definitions and the plugin store contract
//! - The per-stage execution context and stage-to-stage environment
//! - Stored entity types (pipeline resources, secrets, registries, code-scan servers)
//! - In-memory store implementations
//! - Cancellation token and stage logger shared by every executor

pub mod cancel;
pub mod context;
pub mod error;
pub mod id;
pub mod log;
pub mod memory;
pub mod pipeline;
pub mod plugin;
pub mod resource;
pub mod secret;
pub mod settings;
pub mod stage;
pub mod value;

pub use cancel::CancelToken;
pub use context::{Environment, ExecutionContext, JobConfig, Sources};
pub use error::{Error, Result};
pub use id::ResourceId;
pub use log::{LogLine, LogSink, LogStream, StageLogger};
pub use stage::{Outcome, ResolvedParams, StageResult};
pub use value::ParamValue;
