//! Credential records and the secret store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ResourceId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// Username and password.
    Password,
    /// SSH private key.
    Key,
    /// Bearer/access token.
    Token,
}

/// Resolved credential material.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SecretKind,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub access_token: String,
}

impl Secret {
    /// Values that must never reach a log line.
    pub fn sensitive_values(&self) -> Vec<String> {
        [&self.password, &self.private_key, &self.access_token]
            .into_iter()
            .filter(|v| !v.is_empty())
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Trait for secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get a secret by id.
    async fn get(&self, id: ResourceId) -> Result<Secret>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Secret {
        Secret {
            id: ResourceId::from_number(1),
            name: "deploy".to_string(),
            kind: SecretKind::Password,
            user: "root".to_string(),
            password: "hunter2".to_string(),
            private_key: String::new(),
            access_token: String::new(),
        }
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let out = format!("{:?}", secret());
        assert!(out.contains("root"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn test_sensitive_values_skip_empty_fields() {
        assert_eq!(secret().sensitive_values(), vec!["hunter2".to_string()]);
    }
}
