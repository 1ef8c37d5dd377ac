//! Result propagation into the stage-to-stage environment.

use kubeline_core::plugin::ResultEnvSpec;
use kubeline_core::{ParamValue, StageResult};
use std::collections::BTreeMap;

/// Map declared result fields onto environment variable names.
///
/// Fields the result does not carry (or carries as `Absent`) are skipped.
/// When two specs target the same variable the later one wins.
pub fn propagate(specs: &[ResultEnvSpec], result: &StageResult) -> BTreeMap<String, String> {
    specs
        .iter()
        .filter_map(|spec| {
            let value = result.get(&spec.result_name)?;
            let rendered = render(value)?;
            Some((spec.env_name.clone(), rendered))
        })
        .collect()
}

/// Render a value as an environment variable string. `None` for `Absent`.
pub fn render(value: &ParamValue) -> Option<String> {
    match value {
        ParamValue::Absent => None,
        ParamValue::String(s) => Some(s.clone()),
        ParamValue::Bool(b) => Some(b.to_string()),
        ParamValue::Int(n) => Some(n.to_string()),
        ParamValue::Float(f) => Some(f.to_string()),
        ParamValue::List(items) if items.iter().all(ParamValue::is_scalar) => Some(
            items
                .iter()
                .filter_map(render)
                .collect::<Vec<_>>()
                .join(","),
        ),
        ParamValue::List(_) | ParamValue::Map(_) => Some(value.to_json().to_string()),
    }
}
