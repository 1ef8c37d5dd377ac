//! Run a script on a pipeline resource: inside an image, or on a host over SSH.

use async_trait::async_trait;
use derive_more::Display;
use kubeline_core::resource::{PipelineResource, ResourceKind};
use kubeline_core::secret::{Secret, SecretKind};
use kubeline_core::{CancelToken, ResourceId, StageLogger, StageResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::lenient_string;
use crate::docker::{ContainerRunner, ContainerSpec};
use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{ExecutorParams, StepSequence, Tools};
use crate::git::write_key_file;
use crate::process::{CommandSpec, run_command};

/// Where the working directory is mounted in image runs.
const CONTAINER_WORKSPACE: &str = "/workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ShellStep {
    #[display("validate")]
    Validate,
    #[display("run")]
    Run,
}

fn default_port() -> String {
    "22".to_string()
}

fn default_shell() -> String {
    "bash".to_string()
}

#[derive(Debug, Deserialize)]
struct ShellParams {
    #[serde(default)]
    resource: Option<PipelineResource>,
    #[serde(default = "default_port", deserialize_with = "lenient_string")]
    port: String,
    #[serde(default)]
    script: String,
    #[serde(default = "default_shell")]
    shell: String,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

pub struct ExecuteShell {
    job_id: ResourceId,
    params: ShellParams,
    work_dir: PathBuf,
    tools: Tools,
    logger: StageLogger,
    cancel: CancelToken,
    /// Set by validation when there is nothing to run.
    skip: bool,
}

impl ExecuteShell {
    pub fn new(params: &ExecutorParams) -> ExecutorResult<Self> {
        let mut shell: ShellParams = params.params.decode()?;
        if shell.shell.is_empty() {
            shell.shell = default_shell();
        }
        if shell.port.is_empty() {
            shell.port = default_port();
        }

        let masks = shell
            .resource
            .as_ref()
            .and_then(|r| r.secret.as_ref())
            .map(Secret::sensitive_values)
            .unwrap_or_default();

        Ok(Self {
            job_id: params.job_id,
            work_dir: params.work_dir.clone(),
            tools: params.tools.clone(),
            logger: params.logger.with_masks(masks),
            cancel: params.cancel.clone(),
            params: shell,
            skip: false,
        })
    }

    fn validate(&mut self) -> ExecutorResult<()> {
        let step = ShellStep::Validate;
        let Some(resource) = &self.params.resource else {
            self.logger
                .log("No resource selected, check the pipeline configuration");
            return Err(ExecutorError::step(step, "resource is empty"));
        };
        if resource.value.is_empty() {
            return Err(ExecutorError::step(
                step,
                format!("resource {} has no value", resource.name),
            ));
        }
        if resource.kind == ResourceKind::Host && self.params.port.parse::<u16>().is_err() {
            return Err(ExecutorError::step(
                step,
                format!("invalid port {:?}", self.params.port),
            ));
        }
        if self.params.script.trim().is_empty() {
            self.logger.log("The script is empty, nothing to run");
            self.skip = true;
        }
        Ok(())
    }

    async fn run(&self) -> ExecutorResult<()> {
        if self.skip {
            return Ok(());
        }
        let Some(resource) = &self.params.resource else {
            return Err(ExecutorError::step(ShellStep::Run, "resource is empty"));
        };
        match resource.kind {
            ResourceKind::Image => self.run_in_image(resource).await,
            ResourceKind::Host => self.run_on_host(resource).await,
        }
    }

    async fn run_in_image(&self, resource: &PipelineResource) -> ExecutorResult<()> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let mut spec = ContainerSpec::new(
            ContainerRunner::container_name(&self.job_id, "shell"),
            resource.value.clone(),
        )
        .bind(&self.work_dir.display().to_string(), CONTAINER_WORKSPACE)
        .working_dir(CONTAINER_WORKSPACE)
        .cmd([
            self.params.shell.as_str(),
            "-c",
            self.params.script.as_str(),
        ]);
        for (key, value) in &self.params.env {
            spec = spec.env(key, value);
        }

        info!(job_id = %self.job_id, image = %resource.value, "Running script in container");
        let runner = ContainerRunner::connect()?;
        runner.run(&spec, &self.logger, &self.cancel).await
    }

    async fn run_on_host(&self, resource: &PipelineResource) -> ExecutorResult<()> {
        let key_file = match &resource.secret {
            Some(secret) if secret.kind == SecretKind::Key => {
                Some(write_key_file(&self.work_dir, secret, "id_shell").await?)
            }
            _ => None,
        };
        let command = self.ssh_command(resource, key_file.as_deref())?;

        info!(job_id = %self.job_id, host = %resource.value, "Running script over ssh");
        run_command(&command, &self.logger, &self.cancel).await
    }

    /// `ssh` invocation that pipes the exported env and the script to the
    /// remote shell.
    fn ssh_command(
        &self,
        resource: &PipelineResource,
        key_file: Option<&Path>,
    ) -> ExecutorResult<CommandSpec> {
        let secret = resource.secret.as_ref();
        let mut command = match secret {
            Some(s) if s.kind == SecretKind::Password => CommandSpec::new(&self.tools.sshpass)
                .args(["-e", self.tools.ssh.as_str()])
                .env("SSHPASS", &s.password),
            Some(s) if s.kind == SecretKind::Token => {
                return Err(ExecutorError::step(
                    ShellStep::Run,
                    format!("secret {} is a token and cannot be used for ssh", s.name),
                ));
            }
            _ => CommandSpec::new(&self.tools.ssh),
        };

        command = command.args([
            "-p",
            self.params.port.as_str(),
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
        ]);
        if let Some(key) = key_file {
            command = command.arg("-i").arg(key.display().to_string());
        }

        let target = match secret {
            Some(s) if !s.user.is_empty() && !resource.value.contains('@') => {
                format!("{}@{}", s.user, resource.value)
            }
            _ => resource.value.clone(),
        };

        Ok(command
            .arg(target)
            .args([self.params.shell.as_str(), "-s"])
            .stdin(self.remote_input()))
    }

    fn remote_input(&self) -> String {
        let mut input = String::new();
        for (key, value) in &self.params.env {
            if !is_shell_name(key) {
                warn!(job_id = %self.job_id, key = %key, "Skipping env var with invalid name");
                continue;
            }
            input.push_str(&format!("export {key}={}\n", single_quote(value)));
        }
        input.push_str(&self.params.script);
        if !input.ends_with('\n') {
            input.push('\n');
        }
        input
    }
}

fn is_shell_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl StepSequence for ExecuteShell {
    type Step = ShellStep;

    fn steps(&self) -> Vec<ShellStep> {
        vec![ShellStep::Validate, ShellStep::Run]
    }

    async fn run_step(&mut self, step: ShellStep) -> ExecutorResult<()> {
        match step {
            ShellStep::Validate => self.validate(),
            ShellStep::Run => self.run().await,
        }
    }

    fn finish(self) -> ExecutorResult<StageResult> {
        Ok(StageResult::empty())
    }
}
