//! Workspace pipeline resources (build images, target hosts).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::secret::Secret;
use crate::{ResourceId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A container image reference.
    Image,
    /// A host reachable over SSH.
    Host,
}

/// A named resource a pipeline stage can reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResource {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Image reference or host address.
    pub value: String,
    #[serde(default)]
    pub workspace_id: Option<ResourceId>,
    /// Global resources are visible from every workspace.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub description: String,
    /// Credential used to reach the resource, attached by the store.
    #[serde(default)]
    pub secret: Option<Secret>,
}

impl PipelineResource {
    /// Whether a stage running in `workspace_id` may use this resource.
    pub fn visible_from(&self, workspace_id: Option<ResourceId>) -> bool {
        self.global || self.workspace_id == workspace_id
    }
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a resource by id, with its secret attached when it has one.
    async fn get(&self, id: ResourceId) -> Result<PipelineResource>;
}
