//! Builtin executors.

mod code_build;
mod shell;
mod sonar_scanner;

pub use code_build::CodeBuild;
pub use shell::ExecuteShell;
pub use sonar_scanner::SonarScanner;

use serde::{Deserialize, Deserializer};

/// Accept a string, number or flag where a string is expected. Job
/// parameters written by hand often carry `port 22` rather than `port "22"`.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        String(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Loose::deserialize(deserializer)? {
        Loose::String(s) => s,
        Loose::Int(n) => n.to_string(),
        Loose::Float(f) => f.to_string(),
        Loose::Bool(b) => b.to_string(),
    })
}

/// Accept `true`/`false` or their string spellings.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Bool(bool),
        String(String),
    }

    match Loose::deserialize(deserializer)? {
        Loose::Bool(b) => Ok(b),
        Loose::String(s) => match s.trim() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got {other:?}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "lenient_string")]
        port: String,
        #[serde(deserialize_with = "lenient_bool")]
        enabled: bool,
    }

    #[test]
    fn test_lenient_fields() {
        let s: Sample = serde_json::from_value(serde_json::json!({"port": 22, "enabled": "yes"})).unwrap();
        assert_eq!(s.port, "22");
        assert!(s.enabled);

        let s: Sample =
            serde_json::from_value(serde_json::json!({"port": "2222", "enabled": false})).unwrap();
        assert_eq!(s.port, "2222");
        assert!(!s.enabled);
    }

    #[test]
    fn test_lenient_bool_rejects_garbage() {
        let err = serde_json::from_value::<Sample>(serde_json::json!({"port": "22", "enabled": "maybe"}));
        assert!(err.is_err());
    }
}
