//! The executor contract and the step driver shared by every plugin kind.
//!
//! An executor is built once per stage run, runs exactly once and ends in one
//! of three states: succeeded with a result, failed with an error, or
//! canceled. Plugin kinds only describe their ordered steps through
//! [`StepSequence`]; [`Staged`] owns the state machine, the cancellation
//! checks and the progress log lines.

use async_trait::async_trait;
use kubeline_core::{CancelToken, Outcome, ResolvedParams, ResourceId, StageLogger, StageResult};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::kind::PluginKind;

/// A constructed, ready-to-run executor.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn kind(&self) -> PluginKind;

    /// Run every step in order. Cancellation yields `Ok(Outcome::Canceled)`.
    async fn execute(&self) -> ExecutorResult<Outcome>;

    /// Request cancellation. The step in progress observes it inside its
    /// blocking call.
    fn cancel(&self) -> ExecutorResult<()>;
}

/// The ordered, plugin-specific procedure behind an executor.
#[async_trait]
pub trait StepSequence: Send + 'static {
    type Step: Copy + fmt::Display + Send + Sync;

    fn steps(&self) -> Vec<Self::Step>;

    async fn run_step(&mut self, step: Self::Step) -> ExecutorResult<()>;

    /// The result once every step has succeeded.
    fn finish(self) -> ExecutorResult<StageResult>
    where
        Self: Sized;
}

/// External programs the builtin executors shell out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub git: String,
    pub docker: String,
    pub ssh: String,
    pub sshpass: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            docker: "docker".to_string(),
            ssh: "ssh".to_string(),
            sshpass: "sshpass".to_string(),
        }
    }
}

/// Everything an executor is constructed from.
#[derive(Debug, Clone)]
pub struct ExecutorParams {
    pub job_id: ResourceId,
    pub params: ResolvedParams,
    pub logger: StageLogger,
    /// Exclusively owned by this executor for the duration of the run.
    pub work_dir: PathBuf,
    pub cancel: CancelToken,
    pub tools: Tools,
}

impl ExecutorParams {
    pub fn new(params: ResolvedParams, logger: StageLogger, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: ResourceId::new(),
            params,
            logger,
            work_dir: work_dir.into(),
            cancel: CancelToken::new(),
            tools: Tools::default(),
        }
    }

    pub fn with_job_id(mut self, job_id: ResourceId) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tools(mut self, tools: Tools) -> Self {
        self.tools = tools;
        self
    }
}

/// Drives a [`StepSequence`] and implements [`StageExecutor`] for it.
pub struct Staged<S> {
    kind: PluginKind,
    job_id: ResourceId,
    logger: StageLogger,
    cancel: CancelToken,
    sequence: Mutex<Option<S>>,
}

impl<S: StepSequence> Staged<S> {
    pub fn new(kind: PluginKind, sequence: S, params: &ExecutorParams) -> Self {
        Self {
            kind,
            job_id: params.job_id,
            logger: params.logger.clone(),
            cancel: params.cancel.clone(),
            sequence: Mutex::new(Some(sequence)),
        }
    }

    fn take(&self) -> Option<S> {
        self.sequence
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn drive(&self, mut sequence: S) -> ExecutorResult<Outcome> {
        let steps = sequence.steps();
        let total = steps.len();

        for (index, step) in steps.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(self.canceled(step));
            }

            info!(job_id = %self.job_id, plugin = %self.kind, step = %step, "Running step");
            self.logger
                .log(format!("==> Step {}/{}: {}", index + 1, total, step));

            let result = sequence.run_step(step).await;

            // Cancellation wins over whatever the interrupted step returned.
            if self.cancel.is_cancelled() {
                return Ok(self.canceled(step));
            }

            if let Err(e) = result {
                warn!(job_id = %self.job_id, plugin = %self.kind, step = %step, error = %e, "Step failed");
                let line = match &e {
                    ExecutorError::Step { step, message } => {
                        format!("Step {step} failed: {message}")
                    }
                    _ => format!("Step {step} failed: {e}"),
                };
                self.logger.log(line);
                return Err(e);
            }
        }

        let result = sequence.finish()?;
        info!(job_id = %self.job_id, plugin = %self.kind, "Executor succeeded");
        Ok(Outcome::Succeeded(result))
    }

    fn canceled(&self, step: S::Step) -> Outcome {
        info!(job_id = %self.job_id, plugin = %self.kind, step = %step, "Executor canceled");
        self.logger.log(format!("Canceled during step {step}"));
        Outcome::Canceled
    }
}

#[async_trait]
impl<S: StepSequence> StageExecutor for Staged<S> {
    fn kind(&self) -> PluginKind {
        self.kind
    }

    async fn execute(&self) -> ExecutorResult<Outcome> {
        let Some(sequence) = self.take() else {
            return Err(ExecutorError::AlreadyExecuted);
        };
        self.drive(sequence).await
    }

    fn cancel(&self) -> ExecutorResult<()> {
        self.cancel.cancel();
        Ok(())
    }
}
