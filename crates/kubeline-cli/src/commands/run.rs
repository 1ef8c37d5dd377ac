//! Local pipeline execution command.

use anyhow::{Context, Result};
use kubeline_config::{EngineConfig, ToolPaths, load_pipeline};
use kubeline_core::pipeline::StageStatus;
use kubeline_core::{Environment, LogStream};
use kubeline_executor::Tools;
use kubeline_scheduler::{PipelineEvent, PipelineOrchestrator};
use std::path::Path;
use tracing::{info, warn};

use super::open_catalog;

fn tools(paths: &ToolPaths) -> Tools {
    Tools {
        git: paths.git.clone(),
        docker: paths.docker.clone(),
        ssh: paths.ssh.clone(),
        sshpass: paths.sshpass.clone(),
    }
}

fn describe(status: &StageStatus) -> String {
    match status {
        StageStatus::Succeeded => "✓ succeeded".to_string(),
        StageStatus::Failed { message } => format!("✗ failed: {}", message),
        StageStatus::Skipped { reason } => format!("⊘ skipped: {}", reason),
        StageStatus::Canceled => "⊘ canceled".to_string(),
        StageStatus::Pending => "○ pending".to_string(),
        StageStatus::Running => "▶ running".to_string(),
    }
}

/// Run a pipeline file on this machine.
pub async fn run_local(config: &EngineConfig, path: &Path, stages: &[String]) -> Result<()> {
    let file = load_pipeline(path)
        .with_context(|| format!("Failed to load pipeline file: {}", path.display()))?;

    let pipeline = if stages.is_empty() {
        file.pipeline
    } else {
        println!("Running selected stages: {:?}", stages);
        file.pipeline
            .with_targets(stages)
            .context("Failed to select stages")?
    };

    println!("Running pipeline: {}", pipeline.name);
    println!("Stages: {}", pipeline.stages.len());

    if file.fixtures.is_empty() {
        warn!("Pipeline file declares no resources, secrets, registries or scan servers");
    }

    let catalog = open_catalog(config).await;
    let orchestrator =
        PipelineOrchestrator::new(catalog, file.fixtures.into_sources(), config.work_root.clone())
            .with_tools(tools(&config.tools));

    let env: Environment = [("CI", "true"), ("KUBELINE", "true")].into_iter().collect();

    println!("\n--- Starting pipeline execution ---\n");

    let (mut rx, handle) = orchestrator.execute(&pipeline, env);
    info!(run_id = %handle.run_id(), work_root = %config.work_root.display(), "Run started");

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling run");
            cancel.cancel();
        }
    });

    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StageStarted { stage } => {
                println!("▶ Stage '{}' started", stage);
            }
            PipelineEvent::StageLog { stage, line } => {
                let stream_marker = match line.stream {
                    LogStream::Stdout => " ",
                    LogStream::Stderr => "!",
                    LogStream::System => "*",
                };
                println!("  [{}]{} {}", stage, stream_marker, line.content);
            }
            PipelineEvent::StageCompleted { stage, status } => {
                println!("{} Stage '{}'\n", describe(&status), stage);
            }
            PipelineEvent::PipelineCompleted { success, canceled } => {
                if canceled {
                    println!("--- Pipeline canceled ---");
                } else if success {
                    println!("--- Pipeline completed successfully ---");
                } else {
                    println!("--- Pipeline failed ---");
                }
            }
        }
    }

    let result = handle.wait().await.context("Pipeline execution task failed")?;

    println!("\n--- Stage Summary ---");
    for (stage_name, state) in &result.stage_states {
        println!("  {} - {}", stage_name, describe(state));
    }

    if !result.env.is_empty() {
        println!("\n--- Environment ---");
        for (name, value) in result.env.iter() {
            println!("  {}={}", name, value);
        }
    }

    if result.canceled {
        anyhow::bail!("Pipeline canceled");
    }
    if !result.success {
        anyhow::bail!("Pipeline failed");
    }
    println!("\n✓ Pipeline succeeded!");
    Ok(())
}
