//! Engine configuration parsing.

use kdl::KdlDocument;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::kdl_util::{get_bool_prop, get_first_arg, get_first_string_arg, get_string_prop};
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// External programs the builtin executors run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    pub git: String,
    pub docker: String,
    pub ssh: String,
    pub sshpass: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            docker: "docker".to_string(),
            ssh: "ssh".to_string(),
            sshpass: "sshpass".to_string(),
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stage working directories live under `<work_root>/<run id>/<stage>`.
    pub work_root: PathBuf,
    pub log_format: LogFormat,
    /// Reconcile the builtin plugins into the catalog at startup.
    pub reconcile_on_start: bool,
    pub tools: ToolPaths,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from(".kubeline/work"),
            log_format: LogFormat::default(),
            reconcile_on_start: true,
            tools: ToolPaths::default(),
        }
    }
}

/// Parse engine configuration from KDL text.
///
/// ```kdl
/// work-root "/var/lib/kubeline"
/// log-format "json"
/// reconcile-on-start #true
/// tools {
///     docker "/usr/local/bin/docker"
/// }
/// ```
///
/// Every node is optional; unknown nodes are ignored.
pub fn parse_engine_config(kdl: &str) -> ConfigResult<EngineConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = EngineConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "work-root" | "work_root" => {
                let root = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("work-root path".to_string()))?;
                config.work_root = PathBuf::from(root);
            }
            "log-format" | "log_format" => {
                config.log_format = match get_first_string_arg(node).as_deref() {
                    Some("json") => LogFormat::Json,
                    Some("pretty") | Some("text") => LogFormat::Pretty,
                    other => {
                        return Err(ConfigError::invalid(
                            "log-format",
                            format!("expected \"pretty\" or \"json\", got {other:?}"),
                        ));
                    }
                };
            }
            "reconcile-on-start" | "reconcile_on_start" => {
                config.reconcile_on_start = get_first_arg(node)
                    .and_then(|v| v.as_bool())
                    .or_else(|| get_bool_prop(node, "enabled"))
                    .ok_or_else(|| {
                        ConfigError::invalid("reconcile-on-start", "expected #true or #false")
                    })?;
            }
            "tools" => {
                let Some(children) = node.children() else {
                    continue;
                };
                for child in children.nodes() {
                    let name = child.name().value();
                    let path = get_first_string_arg(child)
                        .or_else(|| get_string_prop(child, "path"))
                        .ok_or_else(|| ConfigError::MissingField(format!("path for tool {name}")))?;
                    match name {
                        "git" => config.tools.git = path,
                        "docker" => config.tools.docker = path,
                        "ssh" => config.tools.ssh = path,
                        "sshpass" => config.tools.sshpass = path,
                        other => {
                            return Err(ConfigError::invalid(
                                "tools",
                                format!("unknown tool {other}"),
                            ));
                        }
                    }
                }
            }
            other => {
                tracing::debug!(node = %other, "Ignoring unknown engine config node");
            }
        }
    }

    Ok(config)
}

/// Read and parse an engine configuration file.
pub fn load_engine_config(path: &Path) -> ConfigResult<EngineConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_engine_config(&text)
}
