//! Pipeline and stage definitions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{Error, JobConfig, ResourceId, Result};

/// A pipeline: an ordered set of plugin stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name (e.g., "my-service").
    pub name: String,
    /// Variables seeded into the environment of the first stage.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Credential used to fetch the pipeline's code.
    #[serde(default)]
    pub code_secret: Option<ResourceId>,
    #[serde(default)]
    pub workspace_id: Option<ResourceId>,
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// A copy restricted to `targets` and every stage they transitively need,
    /// in the original order.
    pub fn with_targets(&self, targets: &[String]) -> Result<PipelineSpec> {
        let mut keep: BTreeSet<&str> = BTreeSet::new();
        let mut pending: Vec<&str> = targets.iter().map(String::as_str).collect();
        while let Some(name) = pending.pop() {
            let Some(stage) = self.stage(name) else {
                return Err(Error::NotFound(format!("stage {name}")));
            };
            if keep.insert(stage.name.as_str()) {
                pending.extend(stage.needs.iter().map(String::as_str));
            }
        }

        Ok(PipelineSpec {
            stages: self
                .stages
                .iter()
                .filter(|s| keep.contains(s.name.as_str()))
                .cloned()
                .collect(),
            ..self.clone()
        })
    }
}

/// A stage in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name.
    pub name: String,
    /// Plugin key the stage runs.
    pub plugin: String,
    /// Dependencies (other stage names).
    #[serde(default)]
    pub needs: Vec<String>,
    /// Job parameters handed to the resolver.
    #[serde(default)]
    pub params: JobConfig,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            needs: Vec::new(),
            params: JobConfig::new(),
        }
    }
}

/// Status of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Waiting for dependencies.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Failed.
    Failed { message: String },
    /// Skipped (dependency failed or run cancelled).
    Skipped { reason: String },
    /// Cancelled while running.
    Canceled,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Pending | StageStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(StageStatus::Canceled.is_terminal());
        assert!(
            StageStatus::Failed {
                message: "x".into()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_stage_lookup() {
        let pipeline = PipelineSpec {
            name: "svc".into(),
            stages: vec![StageSpec::new("scan", "sonar_qube")],
            ..Default::default()
        };
        assert_eq!(pipeline.stage("scan").unwrap().plugin, "sonar_qube");
        assert!(pipeline.stage("build").is_none());
    }

    #[test]
    fn test_with_targets_pulls_in_needs() {
        let mut build = StageSpec::new("build", "build_code_to_image");
        build.needs = vec!["scan".into()];
        let pipeline = PipelineSpec {
            name: "svc".into(),
            stages: vec![
                StageSpec::new("scan", "sonar_qube"),
                build,
                StageSpec::new("notify", "execute_shell"),
            ],
            ..Default::default()
        };

        let subset = pipeline.with_targets(&["build".to_string()]).unwrap();
        let names: Vec<_> = subset.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["scan", "build"]);

        let err = pipeline.with_targets(&["deploy".to_string()]).unwrap_err();
        assert!(err.is_not_found());
    }
}
