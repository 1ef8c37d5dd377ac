//! Plugin definitions and the plugin store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{ParamValue, ResourceId, Result};

/// `url` carried by plugins whose executor is compiled into the engine.
pub const BUILTIN_URL: &str = "builtin";

/// Where a plugin parameter takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    /// A single variable of the upstream stage environment.
    #[display("env")]
    Env,
    /// A stage-authored job parameter.
    #[display("job")]
    Job,
    /// A workspace resource selected by id in the job parameters.
    #[display("pipeline_resource")]
    PipelineResource,
    /// The whole upstream environment.
    #[display("pipeline_env")]
    PipelineEnv,
    /// The credential attached to the pipeline's code source.
    #[display("code_secret")]
    CodeSecret,
    /// An image registry selected by id in the job parameters.
    #[display("image_registry")]
    ImageRegistry,
    /// A code-scan server selected by id in the job parameters.
    #[display("sonar_qube")]
    SonarQube,
}

/// Declaration of one plugin parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Field name in the resolved parameter map.
    pub param_name: String,
    pub from: ParamSource,
    /// Key within the source. Empty for sources that yield one composite value.
    #[serde(default)]
    pub from_name: String,
    /// Used when the source yields nothing.
    #[serde(default)]
    pub default: ParamValue,
}

impl ParamSpec {
    pub fn new(
        param_name: impl Into<String>,
        from: ParamSource,
        from_name: impl Into<String>,
        default: impl Into<ParamValue>,
    ) -> Self {
        Self {
            param_name: param_name.into(),
            from,
            from_name: from_name.into(),
            default: default.into(),
        }
    }
}

/// Maps a field of a stage result onto an environment variable for later stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvSpec {
    pub result_name: String,
    pub env_name: String,
}

impl ResultEnvSpec {
    pub fn new(result_name: impl Into<String>, env_name: impl Into<String>) -> Self {
        Self {
            result_name: result_name.into(),
            env_name: env_name.into(),
        }
    }
}

/// A plugin as declared by its author. `key` is globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub key: String,
    pub name: String,
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub result_env: Vec<ResultEnvSpec>,
}

/// A plugin definition as held by a [`PluginStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: ResourceId,
    #[serde(flatten)]
    pub definition: PluginDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginRecord {
    /// A fresh record for a definition that has never been stored.
    pub fn new(definition: PluginDefinition, now: DateTime<Utc>) -> Self {
        Self {
            id: ResourceId::new(),
            definition,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> &str {
        &self.definition.key
    }
}

/// Storage for the plugin catalog, keyed by plugin key.
#[async_trait]
pub trait PluginStore: Send + Sync {
    /// Look up a plugin by key. Returns [`crate::Error::NotFound`] when absent.
    async fn get_by_key(&self, key: &str) -> Result<PluginRecord>;

    async fn list(&self) -> Result<Vec<PluginRecord>>;

    /// Insert a new record. Fails with [`crate::Error::Conflict`] if the key exists.
    async fn insert(&self, record: PluginRecord) -> Result<PluginRecord>;

    /// Replace the mutable fields of an existing record, keeping its id and
    /// creation time.
    async fn update(
        &self,
        id: ResourceId,
        definition: PluginDefinition,
        updated_at: DateTime<Utc>,
    ) -> Result<PluginRecord>;
}
