//! Pipeline file validation.

use anyhow::{Context, Result};
use kubeline_config::{EngineConfig, load_pipeline};
use kubeline_core::pipeline::PipelineSpec;
use kubeline_executor::PluginKind;
use kubeline_plugin::{Catalog, CatalogError};
use std::path::Path;

use super::open_catalog;

pub async fn validate(config: &EngineConfig, path: &Path) -> Result<()> {
    let file = load_pipeline(path)
        .with_context(|| format!("Failed to load pipeline file: {}", path.display()))?;

    let catalog = open_catalog(config).await;
    let problems = check_plugins(&file.pipeline, &catalog).await?;
    if !problems.is_empty() {
        for problem in &problems {
            println!("  {}", problem);
        }
        anyhow::bail!("{} problem(s) in {}", problems.len(), path.display());
    }

    println!(
        "Pipeline '{}' is valid ({} stages)",
        file.pipeline.name,
        file.pipeline.stages.len()
    );
    Ok(())
}

/// Stages whose plugin is missing from the catalog or has no executor.
pub(crate) async fn check_plugins(
    pipeline: &PipelineSpec,
    catalog: &Catalog,
) -> Result<Vec<String>> {
    let mut problems = Vec::new();
    for stage in &pipeline.stages {
        match catalog.get(&stage.plugin).await {
            Ok(_) => {}
            Err(CatalogError::NotFound(key)) => {
                problems.push(format!("stage '{}': unknown plugin '{}'", stage.name, key));
                continue;
            }
            Err(e) => return Err(e).context("Failed to read the plugin catalog"),
        }
        if stage.plugin.parse::<PluginKind>().is_err() {
            problems.push(format!(
                "stage '{}': plugin '{}' has no executor",
                stage.name, stage.plugin
            ));
        }
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubeline_core::pipeline::StageSpec;

    fn pipeline(plugins: &[(&str, &str)]) -> PipelineSpec {
        PipelineSpec {
            name: "app".to_string(),
            env: Default::default(),
            code_secret: None,
            workspace_id: None,
            stages: plugins
                .iter()
                .map(|(name, plugin)| StageSpec::new(*name, *plugin))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_builtin_plugins_validate() {
        let catalog = open_catalog(&EngineConfig::default()).await;
        let pipeline = pipeline(&[("build", "build_code_to_image"), ("deploy", "execute_shell")]);
        assert!(check_plugins(&pipeline, &catalog).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_plugin_reported() {
        let catalog = open_catalog(&EngineConfig::default()).await;
        let pipeline = pipeline(&[("build", "build_code_to_image"), ("lint", "eslint")]);
        let problems = check_plugins(&pipeline, &catalog).await.unwrap();
        assert_eq!(problems, vec!["stage 'lint': unknown plugin 'eslint'"]);
    }

    #[tokio::test]
    async fn test_disabled_reconcile_leaves_catalog_empty() {
        let config = EngineConfig {
            reconcile_on_start: false,
            ..EngineConfig::default()
        };
        let catalog = open_catalog(&config).await;
        let problems = check_plugins(&pipeline(&[("deploy", "execute_shell")]), &catalog)
            .await
            .unwrap();
        assert_eq!(problems.len(), 1);
    }
}
