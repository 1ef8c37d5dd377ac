//! One-shot containers on the local Docker daemon.

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use kubeline_core::{CancelToken, LogStream, ResourceId, StageLogger};
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};

/// A container to run to completion.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Overrides the image's default command when set.
    pub cmd: Option<Vec<String>>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    /// `host_path:container_path` bind mounts.
    pub binds: Vec<String>,
    pub working_dir: Option<String>,
    pub host_network: bool,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    pub fn bind(mut self, host_path: &str, container_path: &str) -> Self {
        self.binds.push(format!("{host_path}:{container_path}"));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn host_network(mut self) -> Self {
        self.host_network = true;
        self
    }

    /// Equivalent `docker run` command line, for the stage log.
    pub fn display(&self) -> String {
        let mut parts = vec!["docker run --rm".to_string()];
        if self.host_network {
            parts.push("--net=host".to_string());
        }
        parts.extend(self.binds.iter().map(|b| format!("-v {b}")));
        parts.extend(self.env.iter().map(|e| format!("-e {e}")));
        if let Some(dir) = &self.working_dir {
            parts.push(format!("-w {dir}"));
        }
        parts.push(self.image.clone());
        if let Some(cmd) = &self.cmd {
            parts.extend(cmd.iter().cloned());
        }
        parts.join(" ")
    }
}

/// Runs [`ContainerSpec`]s through the Docker API.
pub struct ContainerRunner {
    docker: Docker,
}

impl ContainerRunner {
    /// Client for the local Docker daemon. Does not contact the daemon yet.
    pub fn connect() -> ExecutorResult<Self> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn container_name(job_id: &ResourceId, purpose: &str) -> String {
        format!("kubeline-{purpose}-{job_id}")
    }

    /// Run `spec` to exit, following its output into `logger`.
    ///
    /// The container is force-removed afterwards, and immediately when
    /// `cancel` fires. A non-zero exit is [`ExecutorError::ContainerFailed`].
    pub async fn run(
        &self,
        spec: &ContainerSpec,
        logger: &StageLogger,
        cancel: &CancelToken,
    ) -> ExecutorResult<()> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Canceled);
        }
        logger.log(spec.display());

        let result = tokio::select! {
            result = self.run_to_exit(spec, logger) => result,
            _ = cancel.cancelled() => {
                warn!(container = %spec.name, "Removing container after cancellation");
                Err(ExecutorError::Canceled)
            }
        };
        self.remove(&spec.name).await;
        result
    }

    async fn run_to_exit(&self, spec: &ContainerSpec, logger: &StageLogger) -> ExecutorResult<()> {
        self.pull(&spec.image).await;

        let host_config = HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: spec.host_network.then(|| "host".to_string()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            env: Some(spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        info!(container = %spec.name, image = %spec.image, "Creating container");
        self.docker
            .create_container(Some(create_options), config)
            .await?;

        info!(container = %spec.name, "Starting container");
        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await?;

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut logs = self.docker.logs(&spec.name, Some(options));
        let mut stdout = LineBuffer::default();
        let mut stderr = LineBuffer::default();
        while let Some(item) = logs.next().await {
            match item {
                Ok(LogOutput::StdErr { message }) => {
                    for line in stderr.push(&message) {
                        logger.write(LogStream::Stderr, &line);
                    }
                }
                Ok(
                    LogOutput::StdOut { message }
                    | LogOutput::Console { message }
                    | LogOutput::StdIn { message },
                ) => {
                    for line in stdout.push(&message) {
                        logger.write(LogStream::Stdout, &line);
                    }
                }
                Err(e) => {
                    warn!(container = %spec.name, error = %e, "Log stream error");
                    break;
                }
            }
        }
        if let Some(rest) = stdout.finish() {
            logger.write(LogStream::Stdout, &rest);
        }
        if let Some(rest) = stderr.finish() {
            logger.write(LogStream::Stderr, &rest);
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(&spec.name, Some(options));
        let code = match wait.next().await {
            Some(Ok(response)) => response.status_code,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(e.into()),
            None => 0,
        };

        debug!(container = %spec.name, code, "Container exited");
        if code == 0 {
            Ok(())
        } else {
            Err(ExecutorError::ContainerFailed {
                image: spec.image.clone(),
                code,
            })
        }
    }

    async fn pull(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                // A locally built image cannot be pulled; creation reports
                // the real problem if the image is missing.
                Err(e) => {
                    warn!(image = %image, error = %e, "Pull warning");
                }
            }
        }
    }

    async fn remove(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(name, Some(options)).await {
            debug!(container = %name, error = %e, "Container removal skipped");
        }
    }
}

/// Reassembles lines from log chunks that may split them anywhere.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and take every line it completes.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let Some(end) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=end).collect();
        String::from_utf8_lossy(&complete[..end])
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    }

    /// The unterminated tail, if any.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"Analy").is_empty());
        assert_eq!(buffer.push(b"sis done\r\n\nnext"), vec!["Analysis done", ""]);
        assert_eq!(buffer.push(b" line\n"), vec!["next line"]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_flushes_unterminated_tail() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"EXECUTION SUCCESS").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("EXECUTION SUCCESS"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_container_name_includes_purpose_and_job() {
        let id = ResourceId::from_number(7);
        let name = ContainerRunner::container_name(&id, "scan");
        assert_eq!(name, format!("kubeline-scan-{id}"));
    }

    #[test]
    fn test_display_matches_docker_run() {
        let spec = ContainerSpec::new("c", "sonarsource/sonar-scanner-cli")
            .host_network()
            .bind("/work/app", "/usr/src")
            .env("SONAR_HOST_URL", "http://sonar:9000");
        assert_eq!(
            spec.display(),
            "docker run --rm --net=host -v /work/app:/usr/src -e SONAR_HOST_URL=http://sonar:9000 sonarsource/sonar-scanner-cli"
        );
    }

    #[test]
    fn test_display_includes_command() {
        let spec = ContainerSpec::new("c", "alpine:3")
            .working_dir("/app")
            .cmd(["sh", "-c", "make"]);
        assert_eq!(spec.display(), "docker run --rm -w /app alpine:3 sh -c make");
    }
}
