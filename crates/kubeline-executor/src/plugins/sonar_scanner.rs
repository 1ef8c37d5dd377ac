//! Code scan: clone, check the scanner configuration, run the scanner image.

use async_trait::async_trait;
use derive_more::Display;
use kubeline_core::resource::PipelineResource;
use kubeline_core::settings::SonarQube;
use kubeline_core::{CancelToken, ResourceId, StageLogger, StageResult};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{error, info};

use crate::docker::{ContainerRunner, ContainerSpec};
use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{ExecutorParams, StepSequence};
use crate::git::{self, CodeSource};

/// Scanner configuration file the scanner image reads from `/usr/src`.
pub const PROJECT_FILE: &str = "sonar-project.properties";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScanStep {
    #[display("clone")]
    Clone,
    #[display("configure")]
    Configure,
    #[display("scan")]
    Scan,
}

/// Where the scanner configuration comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScannerMode {
    /// A file already in the repository.
    File,
    /// A script from the job parameters, written as the project file.
    Script,
    /// Scanning disabled.
    None,
}

impl ScannerMode {
    fn parse(value: &str) -> ExecutorResult<Self> {
        match value {
            "" | "file" => Ok(ScannerMode::File),
            "script" => Ok(ScannerMode::Script),
            "none" => Ok(ScannerMode::None),
            other => Err(ExecutorError::Construction(format!(
                "unknown sonar_scanner_type {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScanParams {
    #[serde(flatten)]
    code: CodeSource,
    #[serde(default)]
    sonar_scanner_image: Option<PipelineResource>,
    #[serde(default)]
    sonar_scanner_type: String,
    #[serde(default)]
    sonar_scanner_file: String,
    #[serde(default)]
    sonar_scanner_script: String,
    #[serde(default)]
    sonar_qube: Option<SonarQube>,
}

pub struct SonarScanner {
    job_id: ResourceId,
    params: ScanParams,
    mode: ScannerMode,
    code_dir: PathBuf,
    git: String,
    logger: StageLogger,
    cancel: CancelToken,
}

impl SonarScanner {
    pub fn new(params: &ExecutorParams) -> ExecutorResult<Self> {
        let scan: ScanParams = params.params.decode()?;
        let mode = ScannerMode::parse(&scan.sonar_scanner_type)?;
        let code_dir = git::checkout_dir(&params.work_dir, &scan.code.code_url).inspect_err(|_| {
            error!(job_id = %params.job_id, "Empty code repository name");
        })?;

        let mut masks = scan.code.sensitive_values();
        if let Some(server) = &scan.sonar_qube {
            masks.push(server.token.clone());
        }

        Ok(Self {
            job_id: params.job_id,
            mode,
            code_dir,
            git: params.tools.git.clone(),
            logger: params.logger.with_masks(masks),
            cancel: params.cancel.clone(),
            params: scan,
        })
    }

    fn fail(&self, step: ScanStep, message: &str, log_line: &str) -> ExecutorError {
        self.logger.log(log_line);
        ExecutorError::step(step, message)
    }

    async fn configure(&self) -> ExecutorResult<()> {
        let step = ScanStep::Configure;
        if self.mode == ScannerMode::None {
            self.logger.log("Code scan disabled, skipping");
            return Ok(());
        }

        let image = self.scanner_image();
        if image.is_empty() {
            return Err(self.fail(
                step,
                "sonar scanner image is empty",
                "The code scan image is empty, check the pipeline configuration",
            ));
        }
        if self.server().is_none() {
            return Err(self.fail(
                step,
                "sonarqube settings are empty",
                "The SonarQube server is not configured, check the platform settings",
            ));
        }

        match self.mode {
            ScannerMode::File => {
                let file = if self.params.sonar_scanner_file.is_empty() {
                    PROJECT_FILE
                } else {
                    self.params.sonar_scanner_file.as_str()
                };
                let path = self.code_dir.join(file);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(self.fail(
                        step,
                        &format!("sonar scanner project file {file} not found"),
                        &format!("The repository has no scanner configuration file {file}"),
                    ));
                }
                Ok(())
            }
            ScannerMode::Script => {
                if self.params.sonar_scanner_script.is_empty() {
                    self.logger.log("The code scan configuration script is empty");
                    return Ok(());
                }
                let path = self.code_dir.join(PROJECT_FILE);
                if let Err(e) = tokio::fs::write(&path, &self.params.sonar_scanner_script).await {
                    error!(job_id = %self.job_id, error = %e, "Failed to write scanner configuration");
                    return Err(self.fail(
                        step,
                        &format!("write scan file error: {e}"),
                        &format!("Failed to write {PROJECT_FILE}: {e}"),
                    ));
                }
                Ok(())
            }
            ScannerMode::None => Ok(()),
        }
    }

    async fn scan(&self) -> ExecutorResult<()> {
        if self.mode == ScannerMode::None {
            return Ok(());
        }
        let Some(server) = self.server() else {
            return Err(ExecutorError::step(ScanStep::Scan, "sonarqube settings are empty"));
        };

        let spec = ContainerSpec::new(
            ContainerRunner::container_name(&self.job_id, "scan"),
            self.scanner_image(),
        )
        .host_network()
        .bind(&self.code_dir.display().to_string(), "/usr/src")
        .env("SONAR_HOST_URL", &server.host_url)
        .env("SONAR_TOKEN", &server.token);

        info!(job_id = %self.job_id, image = %spec.image, "Running sonar scanner");
        let runner = ContainerRunner::connect()?;
        runner
            .run(&spec, &self.logger, &self.cancel)
            .await
            .map_err(|e| match e {
                ExecutorError::Canceled => ExecutorError::Canceled,
                other => {
                    error!(job_id = %self.job_id, error = %other, "Scan failed");
                    self.logger.log(format!("scan error: {other}"));
                    ExecutorError::step(ScanStep::Scan, format!("scan code error: {other}"))
                }
            })
    }

    fn scanner_image(&self) -> &str {
        self.params
            .sonar_scanner_image
            .as_ref()
            .map(|r| r.value.as_str())
            .unwrap_or_default()
    }

    /// The scan server, if it has both an endpoint and a token.
    fn server(&self) -> Option<&SonarQube> {
        self.params
            .sonar_qube
            .as_ref()
            .filter(|s| !s.host_url.is_empty() && !s.token.is_empty())
    }
}

#[async_trait]
impl StepSequence for SonarScanner {
    type Step = ScanStep;

    fn steps(&self) -> Vec<ScanStep> {
        vec![ScanStep::Clone, ScanStep::Configure, ScanStep::Scan]
    }

    async fn run_step(&mut self, step: ScanStep) -> ExecutorResult<()> {
        match step {
            ScanStep::Clone => {
                git::clone_at_commit(
                    &self.git,
                    &self.params.code,
                    &self.code_dir,
                    &self.logger,
                    &self.cancel,
                )
                .await
            }
            ScanStep::Configure => self.configure().await,
            ScanStep::Scan => self.scan().await,
        }
    }

    fn finish(self) -> ExecutorResult<StageResult> {
        Ok(StageResult::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeline_core::log::MemorySink;
    use kubeline_core::resource::ResourceKind;
    use kubeline_core::{ParamValue, ResolvedParams};
    use std::sync::Arc;

    fn scanner(
        work_dir: &std::path::Path,
        extra: &[(&'static str, ParamValue)],
    ) -> (SonarScanner, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let values: ResolvedParams = std::iter::once(("code_url", ParamValue::from("https://h/acme/app.git")))
            .chain(extra.iter().map(|(k, v)| (*k, v.clone())))
            .collect();
        let params = ExecutorParams::new(values, StageLogger::new(sink.clone()), work_dir);
        (SonarScanner::new(&params).unwrap(), sink)
    }

    fn image() -> ParamValue {
        ParamValue::from_serialize(&PipelineResource {
            id: ResourceId::from_number(1),
            name: "scanner".into(),
            kind: ResourceKind::Image,
            value: "sonarsource/sonar-scanner-cli".into(),
            workspace_id: None,
            global: true,
            description: String::new(),
            secret: None,
        })
        .unwrap()
    }

    fn server() -> ParamValue {
        ParamValue::from_serialize(&SonarQube {
            id: ResourceId::from_number(2),
            name: "sonar".into(),
            description: String::new(),
            host_url: "http://sonar:9000".into(),
            token: "squ_secret".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_unknown_mode_fails_construction() {
        let tmp = tempfile::tempdir().unwrap();
        let values: ResolvedParams = [
            ("code_url", ParamValue::from("https://h/acme/app.git")),
            ("sonar_scanner_type", ParamValue::from("bogus")),
        ]
        .into_iter()
        .collect();
        let params = ExecutorParams::new(
            values,
            StageLogger::new(Arc::new(MemorySink::new())),
            tmp.path(),
        );
        assert!(SonarScanner::new(&params).err().unwrap().is_construction());
    }

    #[tokio::test]
    async fn test_mode_none_skips_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let (scanner, sink) = scanner(tmp.path(), &[("sonar_scanner_type", "none".into())]);
        scanner.configure().await.unwrap();
        scanner.scan().await.unwrap();
        assert_eq!(sink.contents(), vec!["Code scan disabled, skipping"]);
    }

    #[tokio::test]
    async fn test_missing_image_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (scanner, _sink) = scanner(tmp.path(), &[("sonar_qube", server())]);
        let err = scanner.configure().await.unwrap_err();
        assert!(err.to_string().contains("image is empty"));
    }

    #[tokio::test]
    async fn test_missing_server_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (scanner, _sink) = scanner(tmp.path(), &[("sonar_scanner_image", image())]);
        let err = scanner.configure().await.unwrap_err();
        assert!(err.to_string().contains("sonarqube settings"));
    }

    #[tokio::test]
    async fn test_file_mode_requires_project_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (scanner, _sink) = scanner(
            tmp.path(),
            &[("sonar_scanner_image", image()), ("sonar_qube", server())],
        );
        tokio::fs::create_dir_all(&scanner.code_dir).await.unwrap();

        let err = scanner.configure().await.unwrap_err();
        assert!(err.to_string().contains(PROJECT_FILE));

        tokio::fs::write(scanner.code_dir.join(PROJECT_FILE), "sonar.projectKey=app\n")
            .await
            .unwrap();
        scanner.configure().await.unwrap();
    }

    #[tokio::test]
    async fn test_script_mode_writes_project_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (scanner, _sink) = scanner(
            tmp.path(),
            &[
                ("sonar_scanner_image", image()),
                ("sonar_qube", server()),
                ("sonar_scanner_type", "script".into()),
                ("sonar_scanner_script", "sonar.projectKey=app\n".into()),
            ],
        );
        tokio::fs::create_dir_all(&scanner.code_dir).await.unwrap();

        scanner.configure().await.unwrap();
        let written = tokio::fs::read_to_string(scanner.code_dir.join(PROJECT_FILE))
            .await
            .unwrap();
        assert_eq!(written, "sonar.projectKey=app\n");
    }

    #[test]
    fn test_server_token_is_masked() {
        let tmp = tempfile::tempdir().unwrap();
        let (scanner, sink) = scanner(tmp.path(), &[("sonar_qube", server())]);
        scanner.logger.log("SONAR_TOKEN=squ_secret");
        assert_eq!(sink.contents(), vec!["SONAR_TOKEN=******"]);
    }
}
