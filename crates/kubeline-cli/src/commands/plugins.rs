//! Plugin catalog commands.

use anyhow::{Context, Result};
use kubeline_config::EngineConfig;

use super::open_catalog;

pub async fn list(config: &EngineConfig, json: bool) -> Result<()> {
    let catalog = open_catalog(config).await;
    let plugins = catalog.list().await.context("Failed to list plugins")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plugins)?);
        return Ok(());
    }

    if plugins.is_empty() {
        println!("No plugins registered");
        return Ok(());
    }
    for plugin in plugins {
        println!("{:<16} {:<24} v{}", plugin.key, plugin.name, plugin.version);
        for param in &plugin.params {
            if param.from_name.is_empty() {
                println!("    {} <- {}", param.param_name, param.from);
            } else {
                println!("    {} <- {}.{}", param.param_name, param.from, param.from_name);
            }
        }
    }
    Ok(())
}
