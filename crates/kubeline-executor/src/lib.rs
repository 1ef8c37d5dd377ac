//! Stage executors for the Kubeline pipeline engine.
//!
//! Provides:
//! - The [`StageExecutor`] contract and the step driver every executor runs on
//! - The closed set of [`PluginKind`]s and the [`new_executor`] factory
//! - Subprocess, git and container helpers that honor cancellation
//! - The builtin executors (code build, shell, code scan)

pub mod docker;
pub mod error;
pub mod executor;
pub mod git;
pub mod kind;
pub mod plugins;
pub mod process;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{ExecutorParams, StageExecutor, StepSequence, Tools};
pub use kind::{PluginKind, new_executor};
