//! Build code and publish images: clone, run the build inside a build image,
//! then `docker build` and `docker push` every requested image.

use async_trait::async_trait;
use chrono::Utc;
use derive_more::Display;
use kubeline_core::resource::PipelineResource;
use kubeline_core::settings::ImageRegistry;
use kubeline_core::{CancelToken, ParamValue, ResourceId, StageLogger, StageResult};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{error, info};

use super::lenient_bool;
use crate::docker::{ContainerRunner, ContainerSpec};
use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{ExecutorParams, StepSequence, Tools};
use crate::git::{self, CodeSource};
use crate::process::{CommandSpec, run_command};

/// Where the checkout is mounted inside the build image.
const CONTAINER_APP: &str = "/app";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BuildStep {
    #[display("clone")]
    Clone,
    #[display("build")]
    Build,
    #[display("images")]
    Images,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    File,
    Script,
}

impl BuildMode {
    fn parse(value: &str) -> ExecutorResult<Self> {
        match value {
            "" | "file" => Ok(BuildMode::File),
            "script" => Ok(BuildMode::Script),
            other => Err(ExecutorError::Construction(format!(
                "unknown code_build_type {other:?}"
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct ImageBuild {
    #[serde(default = "default_dockerfile")]
    dockerfile: String,
    image: String,
}

#[derive(Debug, Deserialize)]
struct BuildParams {
    #[serde(flatten)]
    code: CodeSource,
    #[serde(default = "default_true", deserialize_with = "lenient_bool")]
    code_build: bool,
    #[serde(default)]
    code_build_type: String,
    #[serde(default)]
    code_build_image: Option<PipelineResource>,
    #[serde(default)]
    code_build_file: String,
    #[serde(default)]
    code_build_script: String,
    /// Interpreter for the build file or script.
    #[serde(default)]
    code_build_exec: String,
    #[serde(default)]
    image_build_registry: Option<ImageRegistry>,
    #[serde(default)]
    image_registry_id: ParamValue,
    #[serde(default)]
    image_builds: Vec<ImageBuild>,
}

pub struct CodeBuild {
    job_id: ResourceId,
    params: BuildParams,
    mode: BuildMode,
    code_dir: PathBuf,
    tools: Tools,
    logger: StageLogger,
    cancel: CancelToken,
    /// Tags pushed so far, in `image_builds` order.
    pushed: Vec<String>,
}

impl CodeBuild {
    pub fn new(params: &ExecutorParams) -> ExecutorResult<Self> {
        let mut build: BuildParams = params.params.decode()?;
        let mode = BuildMode::parse(&build.code_build_type)?;
        if build.code_build_file.is_empty() {
            build.code_build_file = "build.sh".to_string();
        }
        if build.code_build_exec.is_empty() {
            build.code_build_exec = "sh".to_string();
        }
        let code_dir = git::checkout_dir(&params.work_dir, &build.code.code_url)?;

        let mut masks = build.code.sensitive_values();
        if let Some(registry) = &build.image_build_registry {
            masks.push(registry.password.clone());
        }

        Ok(Self {
            job_id: params.job_id,
            mode,
            code_dir,
            tools: params.tools.clone(),
            logger: params.logger.with_masks(masks),
            cancel: params.cancel.clone(),
            params: build,
            pushed: Vec::new(),
        })
    }

    async fn build(&self) -> ExecutorResult<()> {
        let step = BuildStep::Build;
        if !self.params.code_build {
            self.logger.log("Code build disabled, skipping");
            return Ok(());
        }

        let image = self
            .params
            .code_build_image
            .as_ref()
            .map(|r| r.value.as_str())
            .unwrap_or_default();
        if image.is_empty() {
            self.logger
                .log("The build image is empty, check the pipeline configuration");
            return Err(ExecutorError::step(step, "code build image is empty"));
        }

        let exec = self.params.code_build_exec.as_str();
        let cmd = match self.mode {
            BuildMode::File => {
                let file = self.params.code_build_file.as_str();
                if !tokio::fs::try_exists(self.code_dir.join(file))
                    .await
                    .unwrap_or(false)
                {
                    self.logger
                        .log(format!("The repository has no build file {file}"));
                    return Err(ExecutorError::step(
                        step,
                        format!("build file {file} not found"),
                    ));
                }
                vec![exec.to_string(), file.to_string()]
            }
            BuildMode::Script => {
                if self.params.code_build_script.trim().is_empty() {
                    return Err(ExecutorError::step(step, "build script is empty"));
                }
                vec![
                    exec.to_string(),
                    "-c".to_string(),
                    self.params.code_build_script.clone(),
                ]
            }
        };

        let spec = ContainerSpec::new(ContainerRunner::container_name(&self.job_id, "build"), image)
            .bind(&self.code_dir.display().to_string(), CONTAINER_APP)
            .working_dir(CONTAINER_APP)
            .cmd(cmd);

        info!(job_id = %self.job_id, image = %image, "Running code build");
        let runner = ContainerRunner::connect()?;
        runner
            .run(&spec, &self.logger, &self.cancel)
            .await
            .map_err(|e| match e {
                ExecutorError::Canceled => ExecutorError::Canceled,
                other => {
                    error!(job_id = %self.job_id, error = %other, "Code build failed");
                    ExecutorError::step(step, format!("code build error: {other}"))
                }
            })
    }

    async fn images(&mut self) -> ExecutorResult<()> {
        let step = BuildStep::Images;
        if self.params.image_builds.is_empty() {
            self.logger.log("No images to build");
            return Ok(());
        }
        let Some(registry) = self
            .params
            .image_build_registry
            .clone()
            .filter(|r| !r.registry.is_empty())
        else {
            self.logger
                .log("The image registry is not configured, check the platform settings");
            return Err(ExecutorError::step(step, "image registry is empty"));
        };

        self.login(&registry).await?;

        let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        for build in self.params.image_builds.clone() {
            if build.image.is_empty() {
                return Err(ExecutorError::step(step, "image name is empty"));
            }
            let tag = image_tag(&registry.registry, &build.image, &stamp);

            let docker_build = CommandSpec::new(&self.tools.docker)
                .args(["build", "-f", build.dockerfile.as_str(), "-t", tag.as_str(), "."])
                .current_dir(&self.code_dir);
            self.docker(&docker_build, "docker build").await?;

            let push = CommandSpec::new(&self.tools.docker).args(["push", tag.as_str()]);
            self.docker(&push, "docker push").await?;

            info!(job_id = %self.job_id, image = %tag, "Image pushed");
            self.pushed.push(tag);
        }
        Ok(())
    }

    async fn login(&self, registry: &ImageRegistry) -> ExecutorResult<()> {
        if registry.user.is_empty() {
            return Ok(());
        }
        let login = CommandSpec::new(&self.tools.docker)
            .args([
                "login",
                "--username",
                registry.user.as_str(),
                "--password-stdin",
                registry.registry.as_str(),
            ])
            .stdin(registry.password.clone());
        self.docker(&login, "docker login").await
    }

    async fn docker(&self, command: &CommandSpec, action: &str) -> ExecutorResult<()> {
        run_command(command, &self.logger, &self.cancel)
            .await
            .map_err(|e| match e {
                ExecutorError::Canceled => ExecutorError::Canceled,
                other => ExecutorError::step(BuildStep::Images, format!("{action} error: {other}")),
            })
    }
}

fn image_tag(registry: &str, image: &str, stamp: &str) -> String {
    format!(
        "{}/{}:{stamp}",
        registry.trim_end_matches('/'),
        image.trim_start_matches('/')
    )
}

#[async_trait]
impl StepSequence for CodeBuild {
    type Step = BuildStep;

    fn steps(&self) -> Vec<BuildStep> {
        vec![BuildStep::Clone, BuildStep::Build, BuildStep::Images]
    }

    async fn run_step(&mut self, step: BuildStep) -> ExecutorResult<()> {
        match step {
            BuildStep::Clone => {
                git::clone_at_commit(
                    &self.tools.git,
                    &self.params.code,
                    &self.code_dir,
                    &self.logger,
                    &self.cancel,
                )
                .await
            }
            BuildStep::Build => self.build().await,
            BuildStep::Images => self.images().await,
        }
    }

    fn finish(self) -> ExecutorResult<StageResult> {
        let registry = self
            .params
            .image_build_registry
            .map(|r| r.registry)
            .unwrap_or_default();
        Ok([
            ("images", ParamValue::from(self.pushed)),
            ("image_registry", ParamValue::from(registry)),
            ("image_registry_id", self.params.image_registry_id),
        ]
        .into_iter()
        .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeline_core::log::MemorySink;
    use kubeline_core::resource::ResourceKind;
    use kubeline_core::ResolvedParams;
    use std::sync::Arc;

    fn registry() -> ParamValue {
        ParamValue::from_serialize(&ImageRegistry {
            id: ResourceId::from_number(3),
            registry: "registry.example.com".into(),
            user: "ci".into(),
            password: "regpass".into(),
        })
        .unwrap()
    }

    fn build_image() -> ParamValue {
        ParamValue::from_serialize(&PipelineResource {
            id: ResourceId::from_number(1),
            name: "node".into(),
            kind: ResourceKind::Image,
            value: "node:20".into(),
            workspace_id: None,
            global: true,
            description: String::new(),
            secret: None,
        })
        .unwrap()
    }

    fn params(work_dir: &std::path::Path, extra: &[(&'static str, ParamValue)]) -> ExecutorParams {
        let values: ResolvedParams =
            std::iter::once(("code_url", ParamValue::from("https://h/acme/app.git")))
                .chain(extra.iter().map(|(k, v)| (*k, v.clone())))
                .collect();
        let logger = StageLogger::new(Arc::new(MemorySink::new()));
        ExecutorParams::new(values, logger, work_dir)
    }

    fn sink_params(
        work_dir: &std::path::Path,
        extra: &[(&'static str, ParamValue)],
    ) -> (ExecutorParams, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let mut params = params(work_dir, extra);
        params.logger = StageLogger::new(sink.clone());
        (params, sink)
    }

    #[test]
    fn test_defaults() {
        let build = CodeBuild::new(&params(std::path::Path::new("/w"), &[])).unwrap();
        assert!(build.params.code_build);
        assert_eq!(build.mode, BuildMode::File);
        assert_eq!(build.params.code_build_file, "build.sh");
        assert_eq!(build.params.code_build_exec, "sh");
        assert_eq!(build.code_dir, PathBuf::from("/w/app"));
    }

    #[test]
    fn test_unknown_build_type_fails_construction() {
        let err = CodeBuild::new(&params(
            std::path::Path::new("/w"),
            &[("code_build_type", "make".into())],
        ))
        .err()
        .unwrap();
        assert!(err.is_construction());
    }

    #[test]
    fn test_image_builds_default_dockerfile() {
        let builds = ParamValue::from_serialize(&serde_json::json!([{"image": "acme/web"}])).unwrap();
        let build = CodeBuild::new(&params(std::path::Path::new("/w"), &[("image_builds", builds)])).unwrap();
        assert_eq!(build.params.image_builds[0].dockerfile, "Dockerfile");
    }

    #[tokio::test]
    async fn test_build_disabled_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let (params, sink) = sink_params(tmp.path(), &[("code_build", "false".into())]);
        let build = CodeBuild::new(&params).unwrap();
        build.build().await.unwrap();
        assert_eq!(sink.contents(), vec!["Code build disabled, skipping"]);
    }

    #[tokio::test]
    async fn test_build_requires_image() {
        let tmp = tempfile::tempdir().unwrap();
        let build = CodeBuild::new(&params(tmp.path(), &[])).unwrap();
        let err = build.build().await.unwrap_err();
        assert!(err.to_string().contains("build image is empty"));
    }

    #[tokio::test]
    async fn test_build_file_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let build = CodeBuild::new(&params(tmp.path(), &[("code_build_image", build_image())])).unwrap();
        let err = build.build().await.unwrap_err();
        assert!(err.to_string().contains("build.sh not found"));
    }

    #[tokio::test]
    async fn test_images_require_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let builds = ParamValue::from_serialize(&serde_json::json!([{"image": "acme/web"}])).unwrap();
        let mut build = CodeBuild::new(&params(tmp.path(), &[("image_builds", builds)])).unwrap();
        let err = build.images().await.unwrap_err();
        assert!(err.to_string().contains("image registry is empty"));
    }

    #[test]
    fn test_image_tag() {
        assert_eq!(
            image_tag("registry.example.com/", "acme/web", "20240102030405"),
            "registry.example.com/acme/web:20240102030405"
        );
    }

    #[test]
    fn test_result_without_images() {
        let build = CodeBuild::new(&params(
            std::path::Path::new("/w"),
            &[("image_build_registry", registry()), ("image_registry_id", 3i64.into())],
        ))
        .unwrap();
        let result = build.finish().unwrap();
        assert_eq!(result.get("images"), Some(&ParamValue::List(vec![])));
        assert_eq!(
            result.get("image_registry").and_then(|v| v.as_str()),
            Some("registry.example.com")
        );
        assert_eq!(result.get("image_registry_id").and_then(|v| v.as_i64()), Some(3));
    }

    /// Drives the images step against a stand-in `docker` that only echoes
    /// its arguments.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_images_are_built_pushed_and_reported() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let fake = tmp.path().join("docker");
        std::fs::write(&fake, "#!/bin/sh\ncat >/dev/null\necho \"fake $1\"\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let builds = ParamValue::from_serialize(&serde_json::json!([
            {"image": "acme/web"},
            {"dockerfile": "api/Dockerfile", "image": "acme/api"}
        ]))
        .unwrap();
        let (params, sink) = sink_params(
            tmp.path(),
            &[("image_builds", builds), ("image_build_registry", registry())],
        );
        let params = params.with_tools(Tools {
            docker: fake.display().to_string(),
            ..Tools::default()
        });
        let mut build = CodeBuild::new(&params).unwrap();
        std::fs::create_dir_all(&build.code_dir).unwrap();

        build.images().await.unwrap();

        let lines = sink.contents();
        assert!(lines.iter().any(|l| l.contains("login --username ci --password-stdin registry.example.com")));
        assert!(lines.iter().any(|l| l.contains("build -f api/Dockerfile -t registry.example.com/acme/api:")));
        assert_eq!(lines.iter().filter(|l| *l == "fake push").count(), 2);
        assert!(!lines.iter().any(|l| l.contains("regpass")));

        let result = build.finish().unwrap();
        let images = result.get("images").and_then(|v| v.as_list()).unwrap();
        assert_eq!(images.len(), 2);
        assert!(images[0].as_str().unwrap().starts_with("registry.example.com/acme/web:"));
    }
}
