//! Platform settings consumed by plugins: image registries and code-scan servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ResourceId, Result};

/// Credentials for a container image registry.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRegistry {
    pub id: ResourceId,
    /// Registry host, e.g. `registry.example.com`.
    pub registry: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for ImageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRegistry")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// A SonarQube server the code-scan plugin reports to.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SonarQube {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub host_url: String,
    #[serde(default)]
    pub token: String,
}

impl fmt::Debug for SonarQube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SonarQube")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host_url", &self.host_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get(&self, id: ResourceId) -> Result<ImageRegistry>;
}

#[async_trait]
pub trait SonarQubeStore: Send + Sync {
    async fn get(&self, id: ResourceId) -> Result<SonarQube>;
}
