//! Pipeline orchestrator - executes pipeline stages in dependency order.

use kubeline_core::pipeline::{PipelineSpec, StageSpec, StageStatus};
use kubeline_core::{
    CancelToken, Environment, ExecutionContext, LogLine, LogSink, Outcome, ResourceId, Sources,
    StageLogger,
};
use kubeline_executor::{ExecutorParams, ExecutorResult, PluginKind, StageExecutor, Tools};
use kubeline_plugin::Catalog;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::StageError;

/// Event emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted { stage: String },
    StageLog { stage: String, line: LogLine },
    StageCompleted { stage: String, status: StageStatus },
    PipelineCompleted { success: bool, canceled: bool },
}

/// Result of a pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: ResourceId,
    pub success: bool,
    pub canceled: bool,
    pub stage_states: BTreeMap<String, StageStatus>,
    /// The environment after the last successful stage.
    pub env: Environment,
}

/// Builds the executor for a catalog plugin key.
pub trait ExecutorFactory: Send + Sync {
    fn build(&self, plugin_key: &str, params: ExecutorParams)
    -> ExecutorResult<Box<dyn StageExecutor>>;
}

/// The executors compiled into the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinExecutors;

impl ExecutorFactory for BuiltinExecutors {
    fn build(
        &self,
        plugin_key: &str,
        params: ExecutorParams,
    ) -> ExecutorResult<Box<dyn StageExecutor>> {
        let kind: PluginKind = plugin_key.parse()?;
        kubeline_executor::new_executor(kind, params)
    }
}

/// A pipeline run in progress.
pub struct RunHandle {
    run_id: ResourceId,
    cancel: CancelToken,
    task: JoinHandle<PipelineResult>,
}

impl RunHandle {
    pub fn run_id(&self) -> ResourceId {
        self.run_id
    }

    /// Cancel the run. The active stage observes it inside its blocking call;
    /// stages that have not started are skipped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this run, for signal handlers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<PipelineResult, tokio::task::JoinError> {
        self.task.await
    }
}

/// Forwards a stage's log lines as [`PipelineEvent::StageLog`].
struct EventSink {
    stage: String,
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl LogSink for EventSink {
    fn append(&self, line: LogLine) {
        let _ = self.tx.send(PipelineEvent::StageLog {
            stage: self.stage.clone(),
            line,
        });
    }
}

/// Orchestrates the execution of a pipeline.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    catalog: Catalog,
    sources: Sources,
    executors: Arc<dyn ExecutorFactory>,
    /// Each run gets `<work_root>/<run id>/<stage>` per stage.
    work_root: PathBuf,
    tools: Tools,
}

impl PipelineOrchestrator {
    pub fn new(catalog: Catalog, sources: Sources, work_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            sources,
            executors: Arc::new(BuiltinExecutors),
            work_root: work_root.into(),
            tools: Tools::default(),
        }
    }

    pub fn with_executors(mut self, executors: Arc<dyn ExecutorFactory>) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_tools(mut self, tools: Tools) -> Self {
        self.tools = tools;
        self
    }

    /// Execute a pipeline, returning a channel of events and a handle to the run.
    ///
    /// `env` is layered under the pipeline's own variables to seed the first
    /// stage's environment.
    pub fn execute(
        &self,
        pipeline: &PipelineSpec,
        env: Environment,
    ) -> (mpsc::UnboundedReceiver<PipelineEvent>, RunHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let run_id = ResourceId::new();
        let cancel = CancelToken::new();

        let orchestrator = self.clone();
        let pipeline = pipeline.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            orchestrator
                .execute_inner(run_id, pipeline, env, token, tx)
                .await
        });

        (
            rx,
            RunHandle {
                run_id,
                cancel,
                task,
            },
        )
    }

    async fn execute_inner(
        &self,
        run_id: ResourceId,
        pipeline: PipelineSpec,
        env: Environment,
        cancel: CancelToken,
        tx: mpsc::UnboundedSender<PipelineEvent>,
    ) -> PipelineResult {
        info!(run_id = %run_id, pipeline = %pipeline.name, "Starting pipeline run");

        let mut stage_states: BTreeMap<String, StageStatus> = pipeline
            .stages
            .iter()
            .map(|s| (s.name.clone(), StageStatus::Pending))
            .collect();
        let mut env = env.layered(pipeline.env.clone());
        let mut canceled = false;

        for stage_name in Self::topological_sort(&pipeline.stages) {
            let Some(stage) = pipeline.stage(&stage_name) else {
                continue;
            };

            if canceled || cancel.is_cancelled() {
                canceled = true;
                Self::finish_stage(
                    &tx,
                    &mut stage_states,
                    stage,
                    StageStatus::Skipped {
                        reason: "run canceled".to_string(),
                    },
                );
                continue;
            }

            // Check if dependencies are satisfied
            let failed_deps: Vec<&str> = stage
                .needs
                .iter()
                .filter(|dep| {
                    !stage_states
                        .get(dep.as_str())
                        .map(|s| s.is_success())
                        .unwrap_or(false)
                })
                .map(String::as_str)
                .collect();
            if !failed_deps.is_empty() {
                info!(stage = %stage.name, ?failed_deps, "Skipping stage due to failed dependencies");
                let reason = format!("dependencies did not succeed: {}", failed_deps.join(", "));
                Self::finish_stage(&tx, &mut stage_states, stage, StageStatus::Skipped { reason });
                continue;
            }

            let _ = tx.send(PipelineEvent::StageStarted {
                stage: stage.name.clone(),
            });
            stage_states.insert(stage.name.clone(), StageStatus::Running);

            let status = match self
                .run_stage(run_id, &pipeline, stage, &env, &cancel, &tx)
                .await
            {
                Ok(Some(layer)) => {
                    info!(stage = %stage.name, exported = layer.len(), "Stage completed successfully");
                    env = env.layered(layer);
                    StageStatus::Succeeded
                }
                Ok(None) => {
                    info!(stage = %stage.name, "Stage canceled");
                    canceled = true;
                    StageStatus::Canceled
                }
                Err(e) => {
                    error!(stage = %stage.name, error = %e, "Stage failed");
                    StageStatus::Failed {
                        message: e.to_string(),
                    }
                }
            };
            Self::finish_stage(&tx, &mut stage_states, stage, status);
        }

        let success = !canceled && stage_states.values().all(|s| s.is_success());
        info!(run_id = %run_id, success, canceled, "Pipeline run finished");
        let _ = tx.send(PipelineEvent::PipelineCompleted { success, canceled });

        PipelineResult {
            run_id,
            success,
            canceled,
            stage_states,
            env,
        }
    }

    fn finish_stage(
        tx: &mpsc::UnboundedSender<PipelineEvent>,
        stage_states: &mut BTreeMap<String, StageStatus>,
        stage: &StageSpec,
        status: StageStatus,
    ) {
        stage_states.insert(stage.name.clone(), status.clone());
        let _ = tx.send(PipelineEvent::StageCompleted {
            stage: stage.name.clone(),
            status,
        });
    }

    /// Run one stage. `Ok(None)` means it was canceled; otherwise the
    /// variables it exports.
    async fn run_stage(
        &self,
        run_id: ResourceId,
        pipeline: &PipelineSpec,
        stage: &StageSpec,
        env: &Environment,
        cancel: &CancelToken,
        tx: &mpsc::UnboundedSender<PipelineEvent>,
    ) -> Result<Option<BTreeMap<String, String>>, StageError> {
        let job_id = ResourceId::new();
        let logger = StageLogger::new(Arc::new(EventSink {
            stage: stage.name.clone(),
            tx: tx.clone(),
        }));

        let definition = self.catalog.get(&stage.plugin).await.inspect_err(|e| {
            logger.log(format!("Plugin {} is not available: {e}", stage.plugin));
        })?;

        let ctx = ExecutionContext::new(self.sources.clone())
            .with_job_id(job_id)
            .with_env(env.clone())
            .with_job_config(stage.params.clone())
            .with_code_secret(pipeline.code_secret)
            .with_workspace(pipeline.workspace_id);
        let params = kubeline_plugin::resolve(&definition.params, &ctx)
            .await
            .inspect_err(|e| {
                logger.log(format!("Failed to resolve parameter {}: {e}", e.param()));
            })?;

        let work_dir = self
            .work_root
            .join(run_id.to_string())
            .join(&stage.name);
        tokio::fs::create_dir_all(&work_dir).await?;

        info!(
            job_id = %job_id,
            stage = %stage.name,
            plugin = %definition.key,
            version = %definition.version,
            "Running stage"
        );
        let executor = self
            .executors
            .build(
                &definition.key,
                ExecutorParams::new(params, logger.clone(), work_dir)
                    .with_job_id(job_id)
                    .with_cancel(cancel.clone())
                    .with_tools(self.tools.clone()),
            )
            .inspect_err(|e| {
                logger.log(format!("Failed to prepare executor: {e}"));
            })?;

        match executor.execute().await? {
            Outcome::Succeeded(result) => {
                Ok(Some(kubeline_plugin::propagate(&definition.result_env, &result)))
            }
            Outcome::Canceled => {
                warn!(job_id = %job_id, stage = %stage.name, "Executor reported cancellation");
                Ok(None)
            }
        }
    }

    /// Topological sort of stages based on dependencies.
    fn topological_sort(stages: &[StageSpec]) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashMap::new();
        let stage_map: HashMap<&str, &StageSpec> =
            stages.iter().map(|s| (s.name.as_str(), s)).collect();

        for stage in stages {
            Self::topo_visit(&stage.name, &stage_map, &mut visited, &mut result);
        }

        result
    }

    fn topo_visit(
        name: &str,
        stage_map: &HashMap<&str, &StageSpec>,
        visited: &mut HashMap<String, bool>,
        result: &mut Vec<String>,
    ) {
        if visited.get(name).copied().unwrap_or(false) {
            return;
        }

        visited.insert(name.to_string(), true);

        let Some(stage) = stage_map.get(name) else {
            return;
        };
        for dep in &stage.needs {
            Self::topo_visit(dep, stage_map, visited, result);
        }

        result.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use derive_more::Display;
    use kubeline_core::memory::{MemoryPluginStore, MemorySources};
    use kubeline_core::plugin::{ParamSource, ParamSpec, PluginDefinition, ResultEnvSpec};
    use kubeline_core::{ParamValue, ResolvedParams, StageResult};
    use kubeline_executor::{ExecutorError, StepSequence, executor::Staged};
    use std::sync::Mutex;
    use std::time::Duration;

    fn make_stage(name: &str, plugin: &str, needs: Vec<&str>) -> StageSpec {
        let mut stage = StageSpec::new(name, plugin);
        stage.needs = needs.into_iter().map(String::from).collect();
        stage
    }

    #[test]
    fn test_topological_sort() {
        let stages = vec![
            make_stage("deploy", "p", vec!["build"]),
            make_stage("test", "p", vec![]),
            make_stage("build", "p", vec!["test"]),
        ];

        let order = PipelineOrchestrator::topological_sort(&stages);

        // test should come before build, build should come before deploy
        let test_idx = order.iter().position(|s| s == "test").unwrap();
        let build_idx = order.iter().position(|s| s == "build").unwrap();
        let deploy_idx = order.iter().position(|s| s == "deploy").unwrap();

        assert!(test_idx < build_idx);
        assert!(build_idx < deploy_idx);
    }

    #[test]
    fn test_topological_sort_ignores_unknown_needs() {
        let stages = vec![make_stage("a", "p", vec!["ghost"])];
        assert_eq!(PipelineOrchestrator::topological_sort(&stages), vec!["a"]);
    }

    #[derive(Debug, Clone, Copy, PartialEq, Display)]
    enum MockStep {
        #[display("work")]
        Work,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        /// Returns `{value: <param "input">}`.
        Echo,
        Fail,
        /// Blocks until the run is canceled.
        Block,
    }

    struct MockSequence {
        behavior: Behavior,
        params: ResolvedParams,
        logger: StageLogger,
        cancel: CancelToken,
    }

    #[async_trait]
    impl StepSequence for MockSequence {
        type Step = MockStep;

        fn steps(&self) -> Vec<MockStep> {
            vec![MockStep::Work]
        }

        async fn run_step(&mut self, step: MockStep) -> ExecutorResult<()> {
            self.logger.stdout("working");
            match self.behavior {
                Behavior::Echo => Ok(()),
                Behavior::Fail => Err(ExecutorError::step(step, "mock failure")),
                Behavior::Block => {
                    self.cancel.cancelled().await;
                    Err(ExecutorError::Canceled)
                }
            }
        }

        fn finish(self) -> ExecutorResult<StageResult> {
            let value = self.params.get("input").cloned().unwrap_or_default();
            Ok([("value", value)].into_iter().collect())
        }
    }

    /// Builds mock executors by plugin key and records the params each got.
    #[derive(Default)]
    struct MockExecutors {
        seen: Mutex<Vec<(String, ResolvedParams)>>,
    }

    impl ExecutorFactory for MockExecutors {
        fn build(
            &self,
            plugin_key: &str,
            params: ExecutorParams,
        ) -> ExecutorResult<Box<dyn StageExecutor>> {
            let behavior = match plugin_key {
                "echo" => Behavior::Echo,
                "fail" => Behavior::Fail,
                "block" => Behavior::Block,
                other => return Err(ExecutorError::UnknownKind(other.to_string())),
            };
            self.seen
                .lock()
                .unwrap()
                .push((plugin_key.to_string(), params.params.clone()));
            let sequence = MockSequence {
                behavior,
                params: params.params.clone(),
                logger: params.logger.clone(),
                cancel: params.cancel.clone(),
            };
            Ok(Box::new(Staged::new(
                PluginKind::ExecuteShell,
                sequence,
                &params,
            )))
        }
    }

    fn plugin(key: &str) -> PluginDefinition {
        PluginDefinition {
            key: key.to_string(),
            name: key.to_string(),
            version: "1.0".to_string(),
            url: "builtin".to_string(),
            params: vec![ParamSpec::new(
                "input",
                ParamSource::Env,
                "UPSTREAM_VALUE",
                "seed",
            )],
            result_env: vec![ResultEnvSpec::new("value", "UPSTREAM_VALUE")],
        }
    }

    async fn orchestrator(work_root: &std::path::Path) -> (PipelineOrchestrator, Arc<MockExecutors>) {
        let catalog = Catalog::new(Arc::new(MemoryPluginStore::new()));
        let report = catalog
            .reconcile(&[plugin("echo"), plugin("fail"), plugin("block")])
            .await;
        assert_eq!(report.inserted.len(), 3);

        let executors = Arc::new(MockExecutors::default());
        let orchestrator =
            PipelineOrchestrator::new(catalog, MemorySources::new().into_sources(), work_root)
                .with_executors(executors.clone());
        (orchestrator, executors)
    }

    fn pipeline(stages: Vec<StageSpec>) -> PipelineSpec {
        PipelineSpec {
            name: "svc".to_string(),
            stages,
            ..Default::default()
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_results_flow_to_the_next_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, executors) = orchestrator(tmp.path()).await;
        let pipeline = pipeline(vec![
            make_stage("second", "echo", vec!["first"]),
            make_stage("first", "echo", vec![]),
        ]);

        let env: Environment = [("UPSTREAM_VALUE", "from-caller")].into_iter().collect();
        let (rx, handle) = orchestrator.execute(&pipeline, env);
        let result = handle.wait().await.unwrap();
        let events = drain(rx).await;

        assert!(result.success);
        let seen = executors.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0].1.get("input").and_then(|v| v.as_str()),
            Some("from-caller")
        );
        assert_eq!(
            seen[1].1.get("input").and_then(|v| v.as_str()),
            Some("from-caller")
        );
        assert_eq!(result.env.get("UPSTREAM_VALUE"), Some("from-caller"));

        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::StageLog { stage, line } if stage == "first" && line.content == "working"
        )));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::PipelineCompleted {
                success: true,
                canceled: false
            })
        ));
        assert!(tmp.path().join(result.run_id.to_string()).join("first").is_dir());
    }

    #[tokio::test]
    async fn test_default_is_used_and_exported() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, executors) = orchestrator(tmp.path()).await;
        let pipeline = pipeline(vec![
            make_stage("first", "echo", vec![]),
            make_stage("second", "echo", vec!["first"]),
        ]);

        let (_rx, handle) = orchestrator.execute(&pipeline, Environment::new());
        let result = handle.wait().await.unwrap();

        assert!(result.success);
        let seen = executors.seen.lock().unwrap();
        // The second stage sees what the first one exported.
        assert_eq!(seen[1].1.get("input").and_then(|v| v.as_str()), Some("seed"));
        assert_eq!(result.env.get("UPSTREAM_VALUE"), Some("seed"));
    }

    #[tokio::test]
    async fn test_failed_stage_skips_dependents_only() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, _executors) = orchestrator(tmp.path()).await;
        let pipeline = pipeline(vec![
            make_stage("broken", "fail", vec![]),
            make_stage("after", "echo", vec!["broken"]),
            make_stage("independent", "echo", vec![]),
        ]);

        let (rx, handle) = orchestrator.execute(&pipeline, Environment::new());
        let result = handle.wait().await.unwrap();
        let events = drain(rx).await;

        assert!(!result.success);
        assert!(!result.canceled);
        assert!(matches!(
            &result.stage_states["broken"],
            StageStatus::Failed { message } if message.contains("mock failure")
        ));
        assert!(matches!(
            result.stage_states["after"],
            StageStatus::Skipped { .. }
        ));
        assert_eq!(result.stage_states["independent"], StageStatus::Succeeded);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::StageLog { stage, line } if stage == "broken" && line.content.starts_with("Step work failed")
        )));
    }

    #[tokio::test]
    async fn test_unknown_plugin_fails_the_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, executors) = orchestrator(tmp.path()).await;
        let pipeline = pipeline(vec![make_stage("deploy", "deploy_k8s", vec![])]);

        let (_rx, handle) = orchestrator.execute(&pipeline, Environment::new());
        let result = handle.wait().await.unwrap();

        assert!(matches!(
            &result.stage_states["deploy"],
            StageStatus::Failed { message } if message.contains("deploy_k8s")
        ));
        assert!(executors.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_never_builds_an_executor() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(Arc::new(MemoryPluginStore::new()));
        let mut echo = plugin("echo");
        echo.params.push(ParamSpec::new(
            "target",
            ParamSource::PipelineResource,
            "",
            ParamValue::Absent,
        ));
        catalog.reconcile(&[echo]).await;
        let executors = Arc::new(MockExecutors::default());
        let orchestrator =
            PipelineOrchestrator::new(catalog, MemorySources::new().into_sources(), tmp.path())
                .with_executors(executors.clone());

        let mut stage = make_stage("deploy", "echo", vec![]);
        stage
            .params
            .insert("resource".to_string(), ParamValue::from(ResourceId::from_number(9).to_string()));
        let (_rx, handle) = orchestrator.execute(&pipeline(vec![stage]), Environment::new());
        let result = handle.wait().await.unwrap();

        assert!(matches!(
            &result.stage_states["deploy"],
            StageStatus::Failed { message } if message.contains("resolution")
        ));
        assert!(executors.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let (orchestrator, executors) = orchestrator(tmp.path()).await;
        let pipeline = pipeline(vec![
            make_stage("first", "echo", vec![]),
            make_stage("wait", "block", vec!["first"]),
            make_stage("last", "echo", vec!["wait"]),
            make_stage("other", "echo", vec![]),
        ]);

        let (mut rx, handle) = orchestrator.execute(&pipeline, Environment::new());
        while let Some(event) = rx.recv().await {
            if matches!(&event, PipelineEvent::StageStarted { stage } if stage == "wait") {
                break;
            }
        }
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("run should stop after cancel")
            .unwrap();

        assert!(result.canceled);
        assert!(!result.success);
        assert_eq!(result.stage_states["first"], StageStatus::Succeeded);
        assert_eq!(result.stage_states["wait"], StageStatus::Canceled);
        assert!(matches!(
            result.stage_states["last"],
            StageStatus::Skipped { .. }
        ));
        assert!(matches!(
            result.stage_states["other"],
            StageStatus::Skipped { .. }
        ));
        assert_eq!(executors.seen.lock().unwrap().len(), 2);
    }
}
