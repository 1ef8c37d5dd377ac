//! The plugin catalog.

use chrono::Utc;
use kubeline_core::plugin::{PluginDefinition, PluginRecord, PluginStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::CatalogError;

/// Versioned registry of plugin definitions, backed by an injected store.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn PluginStore>,
}

/// What a reconcile pass did, by plugin key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: Vec<String>,
    pub upgraded: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
}

impl ReconcileReport {
    /// Number of store writes performed.
    pub fn writes(&self) -> usize {
        self.inserted.len() + self.upgraded.len()
    }
}

impl Catalog {
    pub fn new(store: Arc<dyn PluginStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> Result<PluginDefinition, CatalogError> {
        match self.store.get_by_key(key).await {
            Ok(record) => Ok(record.definition),
            Err(e) if e.is_not_found() => Err(CatalogError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<PluginDefinition>, CatalogError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .map(|r| r.definition)
            .collect())
    }

    /// Bring the stored catalog in line with `builtins`.
    ///
    /// Missing keys are inserted. A stored entry whose version differs is
    /// overwritten in place, keeping its id and creation time. Entries whose
    /// version matches are not written. Failures are logged and reported per
    /// key; they never stop the other entries.
    pub async fn reconcile(&self, builtins: &[PluginDefinition]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for builtin in builtins {
            let key = builtin.key.clone();
            let now = Utc::now();

            let stored = match self.store.get_by_key(&key).await {
                Ok(record) => Some(record),
                Err(e) if e.is_not_found() => None,
                Err(e) => {
                    error!(plugin = %key, error = %e, "Failed to look up plugin");
                    report.failed.push(key);
                    continue;
                }
            };

            match stored {
                None => {
                    let record = PluginRecord::new(builtin.clone(), now);
                    match self.store.insert(record).await {
                        Ok(_) => {
                            info!(plugin = %key, version = %builtin.version, "Registered builtin plugin");
                            report.inserted.push(key);
                        }
                        Err(e) => {
                            warn!(plugin = %key, error = %e, "Failed to register builtin plugin");
                            report.failed.push(key);
                        }
                    }
                }
                Some(record) if record.definition.version != builtin.version => {
                    let from = record.definition.version.clone();
                    match self.store.update(record.id, builtin.clone(), now).await {
                        Ok(_) => {
                            info!(
                                plugin = %key,
                                from = %from,
                                to = %builtin.version,
                                "Upgraded builtin plugin"
                            );
                            report.upgraded.push(key);
                        }
                        Err(e) => {
                            warn!(plugin = %key, error = %e, "Failed to upgrade builtin plugin");
                            report.failed.push(key);
                        }
                    }
                }
                Some(_) => {
                    debug!(plugin = %key, "Builtin plugin up to date");
                    report.unchanged.push(key);
                }
            }
        }

        report
    }
}
