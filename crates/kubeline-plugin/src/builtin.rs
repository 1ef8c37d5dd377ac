//! Plugins whose executors are compiled into the engine.

use kubeline_core::ParamValue;
use kubeline_core::plugin::{BUILTIN_URL, ParamSource, ParamSpec, PluginDefinition, ResultEnvSpec};

pub const BUILD_CODE_TO_IMAGE: &str = "build_code_to_image";
pub const EXECUTE_SHELL: &str = "execute_shell";
pub const SONAR_QUBE: &str = "sonar_qube";

/// The builtin plugin set the catalog is reconciled against at startup.
pub fn builtin_plugins() -> Vec<PluginDefinition> {
    vec![build_code_to_image(), execute_shell(), sonar_qube()]
}

/// Code location variables published by the pipeline trigger.
fn code_params() -> Vec<ParamSpec> {
    let mut params: Vec<ParamSpec> = [
        ("code_url", "PIPELINE_CODE_URL"),
        ("code_api_url", "PIPELINE_CODE_API_URL"),
        ("code_type", "PIPELINE_CODE_TYPE"),
        ("code_branch", "PIPELINE_CODE_BRANCH"),
        ("code_commit_id", "PIPELINE_CODE_COMMIT_ID"),
    ]
    .into_iter()
    .map(|(param, env)| ParamSpec::new(param, ParamSource::Env, env, ""))
    .collect();
    params.push(ParamSpec::new(
        "code_secret",
        ParamSource::CodeSecret,
        "",
        ParamValue::Absent,
    ));
    params
}

fn job(name: &str, default: impl Into<ParamValue>) -> ParamSpec {
    ParamSpec::new(name, ParamSource::Job, name, default)
}

fn build_code_to_image() -> PluginDefinition {
    let mut params = code_params();
    params.extend([
        job("code_build", true),
        job("code_build_type", "file"),
        ParamSpec::new(
            "code_build_image",
            ParamSource::PipelineResource,
            "code_build_image",
            ParamValue::Absent,
        ),
        job("code_build_file", "build.sh"),
        job("code_build_script", ""),
        job("code_build_exec", ""),
        ParamSpec::new(
            "image_build_registry",
            ParamSource::ImageRegistry,
            "image_build_registry",
            ParamValue::Absent,
        ),
        ParamSpec::new("image_registry_id", ParamSource::Job, "image_build_registry", 0i64),
        job("image_builds", ParamValue::Absent),
    ]);

    PluginDefinition {
        key: BUILD_CODE_TO_IMAGE.to_string(),
        name: "Build code to image".to_string(),
        version: "1.1".to_string(),
        url: BUILTIN_URL.to_string(),
        params,
        result_env: vec![
            ResultEnvSpec::new("images", "CODE_BUILD_IMAGES"),
            ResultEnvSpec::new("image_registry", "CODE_BUILD_REGISTRY"),
            ResultEnvSpec::new("image_registry_id", "CODE_BUILD_REGISTRY_ID"),
        ],
    }
}

fn execute_shell() -> PluginDefinition {
    PluginDefinition {
        key: EXECUTE_SHELL.to_string(),
        name: "Execute shell script".to_string(),
        version: "1.0".to_string(),
        url: BUILTIN_URL.to_string(),
        params: vec![
            ParamSpec::new(
                "resource",
                ParamSource::PipelineResource,
                "resource",
                ParamValue::Absent,
            ),
            job("port", "22"),
            job("script", ""),
            job("shell", "bash"),
            ParamSpec::new("env", ParamSource::PipelineEnv, "", ParamValue::Absent),
        ],
        result_env: vec![],
    }
}

fn sonar_qube() -> PluginDefinition {
    let mut params = code_params();
    params.extend([
        ParamSpec::new(
            "sonar_scanner_image",
            ParamSource::PipelineResource,
            "sonar_scanner_image",
            ParamValue::Absent,
        ),
        job("sonar_scanner_type", "file"),
        job("sonar_scanner_file", "sonar-project.properties"),
        job("sonar_scanner_script", ""),
        job("sonar_qube_id", ""),
        ParamSpec::new(
            "sonar_qube",
            ParamSource::SonarQube,
            "sonar_qube_id",
            ParamValue::Absent,
        ),
    ]);

    PluginDefinition {
        key: SONAR_QUBE.to_string(),
        name: "Code scan".to_string(),
        version: "1.0".to_string(),
        url: BUILTIN_URL.to_string(),
        params,
        result_env: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_keys_are_unique() {
        let plugins = builtin_plugins();
        let keys: HashSet<_> = plugins.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys.len(), plugins.len());
        assert!(plugins.iter().all(|p| p.url == BUILTIN_URL));
    }

    #[test]
    fn test_build_publishes_image_results() {
        let plugin = build_code_to_image();
        let envs: Vec<_> = plugin.result_env.iter().map(|r| r.env_name.as_str()).collect();
        assert_eq!(
            envs,
            vec!["CODE_BUILD_IMAGES", "CODE_BUILD_REGISTRY", "CODE_BUILD_REGISTRY_ID"]
        );
    }

    #[test]
    fn test_param_names_are_unique_per_plugin() {
        for plugin in builtin_plugins() {
            let names: HashSet<_> = plugin.params.iter().map(|p| &p.param_name).collect();
            assert_eq!(names.len(), plugin.params.len(), "{}", plugin.key);
        }
    }
}
