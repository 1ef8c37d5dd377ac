//! In-memory store implementations.
//!
//! Used by the CLI, which loads its fixtures from a pipeline file, and by
//! tests across the workspace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::context::Sources;
use crate::plugin::{PluginDefinition, PluginRecord, PluginStore};
use crate::resource::{PipelineResource, ResourceStore};
use crate::secret::{Secret, SecretStore};
use crate::settings::{ImageRegistry, RegistryStore, SonarQube, SonarQubeStore};
use crate::{Error, ResourceId, Result};

/// A record addressable by [`ResourceId`].
pub trait Keyed: Clone + Send + Sync {
    const KIND: &'static str;

    fn id(&self) -> ResourceId;
}

impl Keyed for PipelineResource {
    const KIND: &'static str = "pipeline resource";

    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Keyed for Secret {
    const KIND: &'static str = "secret";

    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Keyed for ImageRegistry {
    const KIND: &'static str = "image registry";

    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Keyed for SonarQube {
    const KIND: &'static str = "sonarqube";

    fn id(&self) -> ResourceId {
        self.id
    }
}

/// A table of records keyed by id.
#[derive(Debug)]
pub struct MemoryTable<T> {
    rows: RwLock<BTreeMap<ResourceId, T>>,
}

impl<T: Keyed> MemoryTable<T> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn put(&self, row: T) {
        self.rows.write().await.insert(row.id(), row);
    }

    pub async fn fetch(&self, id: ResourceId) -> Result<T> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} {}", T::KIND, id)))
    }

    pub async fn all(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }
}

impl<T: Keyed> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed> FromIterator<T> for MemoryTable<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            rows: RwLock::new(iter.into_iter().map(|r| (r.id(), r)).collect()),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryTable<PipelineResource> {
    async fn get(&self, id: ResourceId) -> Result<PipelineResource> {
        self.fetch(id).await
    }
}

#[async_trait]
impl SecretStore for MemoryTable<Secret> {
    async fn get(&self, id: ResourceId) -> Result<Secret> {
        self.fetch(id).await
    }
}

#[async_trait]
impl RegistryStore for MemoryTable<ImageRegistry> {
    async fn get(&self, id: ResourceId) -> Result<ImageRegistry> {
        self.fetch(id).await
    }
}

#[async_trait]
impl SonarQubeStore for MemoryTable<SonarQube> {
    async fn get(&self, id: ResourceId) -> Result<SonarQube> {
        self.fetch(id).await
    }
}

/// The four entity tables behind a [`Sources`] handle.
#[derive(Debug, Default)]
pub struct MemorySources {
    pub resources: MemoryTable<PipelineResource>,
    pub secrets: MemoryTable<Secret>,
    pub registries: MemoryTable<ImageRegistry>,
    pub sonar_qubes: MemoryTable<SonarQube>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_sources(self) -> Sources {
        Sources {
            resources: Arc::new(self.resources),
            secrets: Arc::new(self.secrets),
            registries: Arc::new(self.registries),
            sonar_qubes: Arc::new(self.sonar_qubes),
        }
    }
}

/// Plugin catalog storage keyed by plugin key.
#[derive(Debug, Default)]
pub struct MemoryPluginStore {
    records: RwLock<BTreeMap<String, PluginRecord>>,
    writes: AtomicUsize,
}

impl MemoryPluginStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inserts and updates performed so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginStore for MemoryPluginStore {
    async fn get_by_key(&self, key: &str) -> Result<PluginRecord> {
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("plugin {key}")))
    }

    async fn list(&self) -> Result<Vec<PluginRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn insert(&self, record: PluginRecord) -> Result<PluginRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(record.key()) {
            return Err(Error::Conflict(format!("plugin {} already exists", record.key())));
        }
        records.insert(record.key().to_string(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn update(
        &self,
        id: ResourceId,
        definition: PluginDefinition,
        updated_at: DateTime<Utc>,
    ) -> Result<PluginRecord> {
        let mut records = self.records.write().await;
        let existing = records
            .values()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("plugin {id}")))?;

        if existing.key() != definition.key {
            if records.contains_key(&definition.key) {
                return Err(Error::Conflict(format!(
                    "plugin {} already exists",
                    definition.key
                )));
            }
            records.remove(existing.key());
        }

        let updated = PluginRecord {
            id,
            definition,
            created_at: existing.created_at,
            updated_at,
        };
        records.insert(updated.key().to_string(), updated.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}
