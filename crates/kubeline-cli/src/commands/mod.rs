//! CLI command implementations.

pub mod plugins;
pub mod run;
pub mod validate;

use kubeline_config::EngineConfig;
use kubeline_core::memory::MemoryPluginStore;
use kubeline_plugin::{Catalog, builtin_plugins};
use std::sync::Arc;
use tracing::{info, warn};

/// A catalog over a fresh in-memory store, seeded with the builtin plugins
/// unless the engine config turns reconciliation off.
pub(crate) async fn open_catalog(config: &EngineConfig) -> Catalog {
    let catalog = Catalog::new(Arc::new(MemoryPluginStore::new()));
    if !config.reconcile_on_start {
        warn!("Plugin reconciliation is disabled; the catalog is empty");
        return catalog;
    }

    let report = catalog.reconcile(&builtin_plugins()).await;
    info!(
        inserted = report.inserted.len(),
        upgraded = report.upgraded.len(),
        failed = report.failed.len(),
        "Reconciled builtin plugins"
    );
    catalog
}
