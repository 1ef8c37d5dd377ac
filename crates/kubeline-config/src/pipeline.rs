//! Pipeline file parsing.
//!
//! A pipeline file declares the stages to run and, for local runs, the
//! records the resolver looks references up in:
//!
//! ```kdl
//! pipeline "my-service"
//! code-secret 1
//!
//! env {
//!     PIPELINE_CODE_URL "https://git.example.com/acme/app.git"
//! }
//!
//! stage "scan" plugin="sonar_qube" {
//!     params {
//!         sonar_scanner_image 2
//!         sonar_qube_id 1
//!     }
//! }
//!
//! secret 1 name="git" type="token" access-token="..."
//! resource 2 name="scanner" type="image" value="sonarsource/sonar-scanner-cli"
//! sonarqube 1 name="sonar" host-url="http://sonar:9000" token="..."
//! ```

use kdl::{KdlDocument, KdlNode};
use kubeline_core::memory::{MemorySources, MemoryTable};
use kubeline_core::pipeline::{PipelineSpec, StageSpec};
use kubeline_core::resource::{PipelineResource, ResourceKind};
use kubeline_core::secret::{Secret, SecretKind};
use kubeline_core::settings::{ImageRegistry, SonarQube};
use kubeline_core::{JobConfig, ResourceId, Sources};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::kdl_util::{
    get_bool_prop, get_first_arg, get_first_string_arg, get_string_children,
    get_string_list_prop, get_string_prop, id_prop, id_value, node_value,
};
use crate::{ConfigError, ConfigResult};

/// Records declared alongside a pipeline for local runs.
#[derive(Debug, Clone, Default)]
pub struct Fixtures {
    pub resources: Vec<PipelineResource>,
    pub secrets: Vec<Secret>,
    pub registries: Vec<ImageRegistry>,
    pub sonar_qubes: Vec<SonarQube>,
}

impl Fixtures {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
            && self.secrets.is_empty()
            && self.registries.is_empty()
            && self.sonar_qubes.is_empty()
    }

    /// In-memory stores holding the fixtures.
    pub fn into_sources(self) -> Sources {
        MemorySources {
            resources: self.resources.into_iter().collect::<MemoryTable<_>>(),
            secrets: self.secrets.into_iter().collect(),
            registries: self.registries.into_iter().collect(),
            sonar_qubes: self.sonar_qubes.into_iter().collect(),
        }
        .into_sources()
    }
}

/// A parsed pipeline file.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub pipeline: PipelineSpec,
    pub fixtures: Fixtures,
}

/// Parse a pipeline file from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<PipelineFile> {
    let doc: KdlDocument = kdl.parse()?;

    let mut pipeline = PipelineSpec::default();
    let mut fixtures = Fixtures::default();
    // Resource id -> secret id, linked once every secret is known.
    let mut resource_secrets: Vec<(usize, ResourceId)> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                pipeline.name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("pipeline name".to_string()))?;
            }
            "workspace" => {
                pipeline.workspace_id = Some(first_id(node, "workspace")?);
            }
            "code-secret" | "code_secret" => {
                pipeline.code_secret = Some(first_id(node, "code-secret")?);
            }
            "env" => {
                pipeline.env.extend(get_string_children(node));
            }
            "stage" => {
                pipeline.stages.push(parse_stage(node)?);
            }
            "resource" => {
                let (resource, secret) = parse_resource(node)?;
                if let Some(secret) = secret {
                    resource_secrets.push((fixtures.resources.len(), secret));
                }
                fixtures.resources.push(resource);
            }
            "secret" => fixtures.secrets.push(parse_secret(node)?),
            "registry" => fixtures.registries.push(parse_registry(node)?),
            "sonarqube" | "sonar_qube" => fixtures.sonar_qubes.push(parse_sonar_qube(node)?),
            _ => {} // Ignore unknown nodes
        }
    }

    if pipeline.name.is_empty() {
        return Err(ConfigError::MissingField("pipeline name".to_string()));
    }

    check_unique("stage", pipeline.stages.iter().map(|s| s.name.clone()))?;
    check_unique("resource", fixtures.resources.iter().map(|r| r.id.to_string()))?;
    check_unique("secret", fixtures.secrets.iter().map(|s| s.id.to_string()))?;
    check_unique("registry", fixtures.registries.iter().map(|r| r.id.to_string()))?;
    check_unique("sonarqube", fixtures.sonar_qubes.iter().map(|s| s.id.to_string()))?;

    for (index, secret_id) in resource_secrets {
        let secret = fixtures
            .secrets
            .iter()
            .find(|s| s.id == secret_id)
            .cloned()
            .ok_or_else(|| {
                ConfigError::InvalidReference(format!(
                    "resource '{}' uses unknown secret {}",
                    fixtures.resources[index].name, secret_id
                ))
            })?;
        fixtures.resources[index].secret = Some(secret);
    }

    // Validate DAG - check for missing dependencies
    let stage_names: Vec<&str> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
    for stage in &pipeline.stages {
        for dep in &stage.needs {
            if !stage_names.contains(&dep.as_str()) {
                return Err(ConfigError::InvalidReference(format!(
                    "stage '{}' depends on unknown stage '{}'",
                    stage.name, dep
                )));
            }
        }
    }

    // Check for cycles
    if let Err(cycle) = detect_cycle(&pipeline.stages) {
        return Err(ConfigError::CycleDetected(cycle));
    }

    Ok(PipelineFile { pipeline, fixtures })
}

/// Read and parse a pipeline file.
pub fn load_pipeline(path: &Path) -> ConfigResult<PipelineFile> {
    let text = std::fs::read_to_string(path)?;
    parse_pipeline(&text)
}

fn parse_stage(node: &KdlNode) -> ConfigResult<StageSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("stage name".to_string()))?;
    let plugin = get_string_prop(node, "plugin")
        .ok_or_else(|| ConfigError::MissingField(format!("plugin for stage '{name}'")))?;

    let mut params = JobConfig::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "params" {
                continue;
            }
            let Some(entries) = child.children() else {
                continue;
            };
            for entry in entries.nodes() {
                params.insert(entry.name().value().to_string(), node_value(entry)?);
            }
        }
    }

    Ok(StageSpec {
        needs: get_string_list_prop(node, "needs"),
        params,
        ..StageSpec::new(name, plugin)
    })
}

fn first_id(node: &KdlNode, field: &str) -> ConfigResult<ResourceId> {
    let value =
        get_first_arg(node).ok_or_else(|| ConfigError::MissingField(format!("{field} id")))?;
    id_value(value, field)
}

fn required_prop(node: &KdlNode, kind: &str, name: &str) -> ConfigResult<String> {
    get_string_prop(node, name)
        .ok_or_else(|| ConfigError::MissingField(format!("{name} for {kind}")))
}

fn parse_resource(node: &KdlNode) -> ConfigResult<(PipelineResource, Option<ResourceId>)> {
    let id = first_id(node, "resource")?;
    let kind = match required_prop(node, "resource", "type")?.as_str() {
        "image" => ResourceKind::Image,
        "host" => ResourceKind::Host,
        other => {
            return Err(ConfigError::invalid(
                "resource type",
                format!("expected \"image\" or \"host\", got {other:?}"),
            ));
        }
    };

    let resource = PipelineResource {
        id,
        name: required_prop(node, "resource", "name")?,
        kind,
        value: required_prop(node, "resource", "value")?,
        workspace_id: id_prop(node, "workspace")?,
        global: get_bool_prop(node, "global").unwrap_or(false),
        description: get_string_prop(node, "description").unwrap_or_default(),
        secret: None,
    };
    Ok((resource, id_prop(node, "secret")?))
}

fn parse_secret(node: &KdlNode) -> ConfigResult<Secret> {
    let kind = match required_prop(node, "secret", "type")?.as_str() {
        "password" => SecretKind::Password,
        "key" => SecretKind::Key,
        "token" => SecretKind::Token,
        other => {
            return Err(ConfigError::invalid(
                "secret type",
                format!("expected \"password\", \"key\" or \"token\", got {other:?}"),
            ));
        }
    };

    Ok(Secret {
        id: first_id(node, "secret")?,
        name: required_prop(node, "secret", "name")?,
        kind,
        user: get_string_prop(node, "user").unwrap_or_default(),
        password: get_string_prop(node, "password").unwrap_or_default(),
        private_key: get_string_prop(node, "private-key").unwrap_or_default(),
        access_token: get_string_prop(node, "access-token").unwrap_or_default(),
    })
}

fn parse_registry(node: &KdlNode) -> ConfigResult<ImageRegistry> {
    Ok(ImageRegistry {
        id: first_id(node, "registry")?,
        registry: required_prop(node, "registry", "registry")?,
        user: get_string_prop(node, "user").unwrap_or_default(),
        password: get_string_prop(node, "password").unwrap_or_default(),
    })
}

fn parse_sonar_qube(node: &KdlNode) -> ConfigResult<SonarQube> {
    Ok(SonarQube {
        id: first_id(node, "sonarqube")?,
        name: required_prop(node, "sonarqube", "name")?,
        description: get_string_prop(node, "description").unwrap_or_default(),
        host_url: required_prop(node, "sonarqube", "host-url")?,
        token: get_string_prop(node, "token").unwrap_or_default(),
    })
}

fn check_unique(kind: &'static str, keys: impl Iterator<Item = String>) -> ConfigResult<()> {
    let mut seen = BTreeSet::new();
    for key in keys {
        if !seen.insert(key.clone()) {
            return Err(ConfigError::Duplicate { kind, key });
        }
    }
    Ok(())
}

/// Detect cycles in the stage dependency graph using DFS.
fn detect_cycle(stages: &[StageSpec]) -> Result<(), String> {
    let mut visited = HashMap::new();
    let mut rec_stack = HashMap::new();

    let stage_map: HashMap<&str, &StageSpec> =
        stages.iter().map(|s| (s.name.as_str(), s)).collect();

    for stage in stages {
        if !visited.contains_key(stage.name.as_str()) {
            if let Some(cycle) =
                dfs_detect_cycle(&stage.name, &stage_map, &mut visited, &mut rec_stack)
            {
                return Err(cycle);
            }
        }
    }
    Ok(())
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    stage_map: &'a HashMap<&'a str, &'a StageSpec>,
    visited: &mut HashMap<&'a str, bool>,
    rec_stack: &mut HashMap<&'a str, bool>,
) -> Option<String> {
    visited.insert(node, true);
    rec_stack.insert(node, true);

    if let Some(stage) = stage_map.get(node) {
        for dep in &stage.needs {
            let dep_str: &'a str = dep.as_str();
            if !visited.contains_key(dep_str) {
                if let Some(cycle) = dfs_detect_cycle(dep_str, stage_map, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.get(dep_str).copied().unwrap_or(false) {
                return Some(format!("{} -> {}", node, dep));
            }
        }
    }

    rec_stack.insert(node, false);
    None
}
