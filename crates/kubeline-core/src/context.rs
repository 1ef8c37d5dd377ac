//! Per-stage execution context and the stage-to-stage environment.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::resource::ResourceStore;
use crate::secret::SecretStore;
use crate::settings::{RegistryStore, SonarQubeStore};
use crate::{ParamValue, ResourceId};

/// Stage-authored static parameters.
pub type JobConfig = BTreeMap<String, ParamValue>;

/// An immutable snapshot of the variables produced by earlier stages.
///
/// A stage never mutates the snapshot it receives; it contributes a new layer
/// with [`Environment::layered`] and the merged snapshot is handed forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(Arc<BTreeMap<String, String>>);

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// A new snapshot with `layer` merged over this one. Later layers win.
    pub fn layered(&self, layer: BTreeMap<String, String>) -> Self {
        if layer.is_empty() {
            return self.clone();
        }
        let mut merged = (*self.0).clone();
        merged.extend(layer);
        Self(Arc::new(merged))
    }
}

impl From<BTreeMap<String, String>> for Environment {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(Arc::new(map))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(Arc::new(
            iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

/// Handles to the stores a resolver looks credentials and settings up in.
#[derive(Clone)]
pub struct Sources {
    pub resources: Arc<dyn ResourceStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub registries: Arc<dyn RegistryStore>,
    pub sonar_qubes: Arc<dyn SonarQubeStore>,
}

/// Everything a stage's parameters can be resolved from.
///
/// Built fresh for each stage run and dropped once its results have been
/// propagated.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Correlates operator logs of one stage run.
    pub job_id: ResourceId,
    pub workspace_id: Option<ResourceId>,
    /// Produced by earlier stages of the same run.
    pub upstream_env: Environment,
    pub job_config: JobConfig,
    /// Credential attached to the pipeline's code source.
    pub code_secret: Option<ResourceId>,
    pub sources: Sources,
}

impl ExecutionContext {
    pub fn new(sources: Sources) -> Self {
        Self {
            job_id: ResourceId::new(),
            workspace_id: None,
            upstream_env: Environment::new(),
            job_config: JobConfig::new(),
            code_secret: None,
            sources,
        }
    }

    pub fn with_job_id(mut self, job_id: ResourceId) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.upstream_env = env;
        self
    }

    pub fn with_job_config(mut self, job_config: JobConfig) -> Self {
        self.job_config = job_config;
        self
    }

    pub fn with_code_secret(mut self, secret: Option<ResourceId>) -> Self {
        self.code_secret = secret;
        self
    }

    pub fn with_workspace(mut self, workspace_id: Option<ResourceId>) -> Self {
        self.workspace_id = workspace_id;
        self
    }
}
