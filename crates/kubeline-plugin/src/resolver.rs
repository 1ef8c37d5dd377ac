//! Parameter resolution.
//!
//! Each [`ParamSpec`] names exactly one source. A source that yields nothing
//! falls back to the spec's default, which may itself be [`ParamValue::Absent`];
//! the field is then present but empty and the executor decides whether that
//! is acceptable. Store lookups that fail abort the whole resolution.

use kubeline_core::plugin::{ParamSource, ParamSpec};
use kubeline_core::{ExecutionContext, ParamValue, ResolvedParams, ResourceId};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::ResolutionError;

/// Job key holding the selected resource when a spec leaves `from_name` empty.
pub const DEFAULT_RESOURCE_KEY: &str = "resource";
pub const DEFAULT_REGISTRY_KEY: &str = "image_registry";
pub const DEFAULT_SONAR_QUBE_KEY: &str = "sonar_qube_id";

/// Build the flat parameter map for one stage run.
pub async fn resolve(
    specs: &[ParamSpec],
    ctx: &ExecutionContext,
) -> Result<ResolvedParams, ResolutionError> {
    let mut resolved = BTreeMap::new();

    for spec in specs {
        let value = match lookup(spec, ctx).await? {
            Some(value) => value,
            None => spec.default.clone(),
        };
        debug!(
            job_id = %ctx.job_id,
            param = %spec.param_name,
            from = %spec.from,
            absent = value.is_absent(),
            "Resolved parameter"
        );
        resolved.insert(spec.param_name.clone(), value);
    }

    Ok(ResolvedParams::from(resolved))
}

/// `Ok(None)` means the source has nothing for this spec.
async fn lookup(
    spec: &ParamSpec,
    ctx: &ExecutionContext,
) -> Result<Option<ParamValue>, ResolutionError> {
    let sources = &ctx.sources;

    match spec.from {
        ParamSource::Env => Ok(ctx
            .upstream_env
            .get(&spec.from_name)
            .map(ParamValue::from)),

        ParamSource::Job => Ok(ctx
            .job_config
            .get(&spec.from_name)
            .filter(|v| !v.is_absent())
            .cloned()),

        ParamSource::PipelineEnv => Ok(Some(ParamValue::Map(
            ctx.upstream_env
                .iter()
                .map(|(k, v)| (k.clone(), ParamValue::from(v.as_str())))
                .collect(),
        ))),

        ParamSource::CodeSecret => match ctx.code_secret {
            None => Ok(None),
            Some(id) => {
                let secret = sources
                    .secrets
                    .get(id)
                    .await
                    .map_err(|e| lookup_error(spec, e))?;
                to_value(spec, &secret).map(Some)
            }
        },

        ParamSource::PipelineResource => {
            let Some(id) = selected_id(spec, ctx, DEFAULT_RESOURCE_KEY)? else {
                return Ok(None);
            };
            let resource = sources
                .resources
                .get(id)
                .await
                .map_err(|e| lookup_error(spec, e))?;
            // Reported like a missing row so other workspaces' resources stay hidden.
            if !resource.visible_from(ctx.workspace_id) {
                return Err(lookup_error(
                    spec,
                    kubeline_core::Error::NotFound(format!("resource {id}")),
                ));
            }
            to_value(spec, &resource).map(Some)
        }

        ParamSource::ImageRegistry => {
            let Some(id) = selected_id(spec, ctx, DEFAULT_REGISTRY_KEY)? else {
                return Ok(None);
            };
            let registry = sources
                .registries
                .get(id)
                .await
                .map_err(|e| lookup_error(spec, e))?;
            to_value(spec, &registry).map(Some)
        }

        ParamSource::SonarQube => {
            let Some(id) = selected_id(spec, ctx, DEFAULT_SONAR_QUBE_KEY)? else {
                return Ok(None);
            };
            let server = sources
                .sonar_qubes
                .get(id)
                .await
                .map_err(|e| lookup_error(spec, e))?;
            to_value(spec, &server).map(Some)
        }
    }
}

/// Read the id a job parameter selects. Missing, empty and zero select nothing.
fn selected_id(
    spec: &ParamSpec,
    ctx: &ExecutionContext,
    default_key: &str,
) -> Result<Option<ResourceId>, ResolutionError> {
    let key = if spec.from_name.is_empty() {
        default_key
    } else {
        spec.from_name.as_str()
    };

    let invalid = |value: &ParamValue| ResolutionError::InvalidReference {
        param: spec.param_name.clone(),
        value: value.to_json().to_string(),
    };

    match ctx.job_config.get(key) {
        None | Some(ParamValue::Absent) => Ok(None),
        Some(ParamValue::Int(0)) => Ok(None),
        Some(ParamValue::Int(n)) => u64::try_from(*n)
            .map(|n| Some(ResourceId::from_number(n)))
            .map_err(|_| invalid(&ParamValue::Int(*n))),
        Some(ParamValue::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s == "0" {
                return Ok(None);
            }
            s.parse::<ResourceId>()
                .map(Some)
                .map_err(|_| invalid(&ParamValue::from(s)))
        }
        Some(other) => Err(invalid(other)),
    }
}

fn lookup_error(spec: &ParamSpec, error: kubeline_core::Error) -> ResolutionError {
    ResolutionError::Lookup {
        param: spec.param_name.clone(),
        from: spec.from,
        error,
    }
}

fn to_value<T: Serialize>(spec: &ParamSpec, value: &T) -> Result<ParamValue, ResolutionError> {
    ParamValue::from_serialize(value)
        .map_err(|e| lookup_error(spec, kubeline_core::Error::Internal(e.to_string())))
}
