//! Swarm configs and secrets
//!
//! Both carry their payload base64-encoded in `Data`, the way the engine
//! API transports them. Payloads are immutable once created; an update may
//! only touch labels.

use super::ObjectVersion;
use crate::error::{Result, StackError};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

fn encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn decode(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| StackError::InvalidConfig(format!("Invalid base64 data: {}", e)))
}

/// Docker Config specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConfigSpec {
    /// Config name
    pub name: String,
    /// Labels
    #[serde(deserialize_with = "super::nullable")]
    pub labels: BTreeMap<String, String>,
    /// Base64-encoded config data
    pub data: String,
}

impl ConfigSpec {
    pub fn new(name: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            data: encode(data),
        }
    }

    /// Get the raw config data (base64 decoded)
    pub fn get_data(&self) -> Result<Vec<u8>> {
        decode(&self.data)
    }
}

/// Docker Config object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Config ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Config version
    pub version: ObjectVersion,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Config specification
    pub spec: ConfigSpec,
}

impl Config {
    /// Create a new config
    pub fn new(spec: ConfigSpec) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            version: ObjectVersion { index: 1 },
            created_at: now,
            updated_at: now,
            spec,
        }
    }

    /// Update the config specification
    pub fn update(&mut self, spec: ConfigSpec) -> Result<()> {
        if self.spec.data != spec.data {
            return Err(StackError::InvalidConfig(format!(
                "config {}: only updates to Labels are allowed",
                self.spec.name
            )));
        }

        self.spec.labels = spec.labels;
        self.version.index += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Docker Secret specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SecretSpec {
    /// Secret name
    pub name: String,
    /// Labels
    #[serde(deserialize_with = "super::nullable")]
    pub labels: BTreeMap<String, String>,
    /// Base64-encoded secret data
    pub data: String,
}

impl SecretSpec {
    pub fn new(name: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            data: encode(data),
        }
    }

    /// Get the raw secret data (base64 decoded)
    pub fn get_data(&self) -> Result<Vec<u8>> {
        decode(&self.data)
    }
}

/// Docker Secret object; the engine never returns `Data` on inspect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Secret {
    /// Secret ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Secret version
    pub version: ObjectVersion,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Secret specification
    pub spec: SecretSpec,
}

impl Secret {
    /// Create a new secret
    pub fn new(spec: SecretSpec) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            version: ObjectVersion { index: 1 },
            created_at: now,
            updated_at: now,
            spec,
        }
    }

    /// Update the secret specification
    pub fn update(&mut self, spec: SecretSpec) -> Result<()> {
        if self.spec.data != spec.data {
            return Err(StackError::InvalidConfig(format!(
                "secret {}: only updates to Labels are allowed",
                self.spec.name
            )));
        }

        self.spec.labels = spec.labels;
        self.version.index += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_data_round_trip() {
        let original = "server {\n  listen 80;\n}";
        let spec = ConfigSpec::new("nginx-config", original.as_bytes());
        let config = Config::new(spec);

        assert_eq!(config.version.index, 1);
        assert_eq!(config.spec.get_data().unwrap(), original.as_bytes());
    }

    #[test]
    fn test_update_labels_only() {
        let mut config = Config::new(ConfigSpec::new("app", b"a=1"));

        let mut relabeled = ConfigSpec::new("app", b"a=1");
        relabeled.labels.insert("env".to_string(), "prod".to_string());
        config.update(relabeled).unwrap();
        assert_eq!(config.version.index, 2);
        assert_eq!(config.spec.labels["env"], "prod");

        let err = config.update(ConfigSpec::new("app", b"a=2")).unwrap_err();
        assert!(err.to_string().contains("only updates to Labels"));
    }

    #[test]
    fn test_secret_rejects_data_change() {
        let mut secret = Secret::new(SecretSpec::new("db_password", b"hunter2"));
        assert!(secret.update(SecretSpec::new("db_password", b"hunter3")).is_err());
        assert!(secret.update(SecretSpec::new("db_password", b"hunter2")).is_ok());
        assert_eq!(secret.version.index, 2);
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(SecretSpec::new("s", b"x")).unwrap();
        assert_eq!(json, serde_json::json!({"Name": "s", "Labels": {}, "Data": "eA=="}));
    }
}
