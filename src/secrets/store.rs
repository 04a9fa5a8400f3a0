//! Decrypted secret store
//!
//! A flat map of key to string value. Decryption happens elsewhere; this
//! only loads the plaintext YAML mapping and answers lookups.

use crate::error::{Result, StackError};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Flat key/value secret store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretStore {
    values: BTreeMap<String, String>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML mapping of scalar values from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StackError::SecretStore(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a YAML mapping; numbers and booleans are stringified, nested
    /// values are rejected
    pub fn from_yaml(content: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(content)?;
        let mapping = match root {
            Value::Null => return Ok(Self::new()),
            Value::Mapping(mapping) => mapping,
            _ => {
                return Err(StackError::SecretStore(
                    "secret store must be a mapping of key to value".to_string(),
                ))
            }
        };

        let mut values = BTreeMap::new();
        for (key, value) in mapping {
            let key = match key {
                Value::String(s) => s,
                other => scalar_to_string(&other).ok_or_else(|| {
                    StackError::SecretStore("secret keys must be scalars".to_string())
                })?,
            };
            let value = scalar_to_string(&value).ok_or_else(|| {
                StackError::SecretStore(format!(
                    "secret {:?} must be a scalar value, not a map or list",
                    key
                ))
            })?;
            values.insert(key, value);
        }

        Ok(Self { values })
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, String)> for SecretStore {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_are_stringified() {
        let store = SecretStore::from_yaml("DB_PASS: hunter2\nPORT: 5432\nDEBUG: false\n").unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("DB_PASS"), Some("hunter2"));
        assert_eq!(store.get("PORT"), Some("5432"));
        assert_eq!(store.get("DEBUG"), Some("false"));
        assert_eq!(store.get("MISSING"), None);
    }

    #[test]
    fn test_nested_values_rejected() {
        let err = SecretStore::from_yaml("db:\n  user: a\n  pass: b\n").unwrap_err();
        assert!(err.to_string().contains("\"db\""));

        let err = SecretStore::from_yaml("hosts: [a, b]\n").unwrap_err();
        assert!(err.to_string().contains("\"hosts\""));
    }

    #[test]
    fn test_empty_document() {
        assert!(SecretStore::from_yaml("").unwrap().is_empty());
        assert!(SecretStore::from_yaml("- a\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yaml");
        std::fs::write(&path, "TOKEN: abc\n").unwrap();

        let store = SecretStore::load(&path).unwrap();
        assert_eq!(store.get("TOKEN"), Some("abc"));
        assert!(SecretStore::load(&dir.path().join("nope.yaml")).is_err());
    }
}
