//! Pipeline orchestration for Kubeline.
//!
//! Runs the stages of one pipeline in dependency order. Each stage goes
//! through the catalog, the parameter resolver, an executor and the result
//! propagator; the environment a stage produces is layered into the snapshot
//! the next stage resolves against.

pub mod error;
pub mod orchestrator;

pub use error::StageError;
pub use orchestrator::{
    BuiltinExecutors, ExecutorFactory, PipelineEvent, PipelineOrchestrator, PipelineResult,
    RunHandle,
};
