//! Kubeline CLI tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kubeline_config::{EngineConfig, LogFormat, load_engine_config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "kubeline")]
#[command(about = "Run Kubeline pipelines locally", long_about = None)]
struct Cli {
    /// Engine configuration file
    #[arg(long, env = "KUBELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for stage working directories
    #[arg(long, env = "KUBELINE_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the plugin catalog
    Plugins {
        #[command(subcommand)]
        command: PluginCommands,
    },
    /// Validate a pipeline file
    Validate {
        /// Path to the pipeline file
        #[arg(default_value = "kubeline.kdl")]
        path: PathBuf,
    },
    /// Run a pipeline file
    Run {
        /// Path to the pipeline file
        #[arg(default_value = "kubeline.kdl")]
        path: PathBuf,
        /// Only run these stages and the stages they need
        #[arg(long = "stage")]
        stages: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// List the plugins in the catalog
    List {
        /// Print the full definitions as JSON
        #[arg(long)]
        json: bool,
    },
}

fn engine_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => load_engine_config(path)
            .with_context(|| format!("Failed to load engine config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(work_root) = &cli.work_root {
        config.work_root = work_root.clone();
    }
    if cli.log_json {
        config.log_format = LogFormat::Json;
    }
    Ok(config)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = engine_config(&cli)?;
    init_tracing(config.log_format);

    match cli.command {
        Commands::Plugins { command } => match command {
            PluginCommands::List { json } => {
                commands::plugins::list(&config, json).await?;
            }
        },
        Commands::Validate { path } => {
            commands::validate::validate(&config, &path).await?;
        }
        Commands::Run { path, stages } => {
            commands::run::run_local(&config, &path, &stages).await?;
        }
    }

    Ok(())
}
