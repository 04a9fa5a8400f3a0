//! Registry credentials sent along with service create and update

use crate::error::{Result, StackError};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Registry host images without a domain are pulled from
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Credential for one registry, in the shape the engine expects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryAuth {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serveraddress: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub identitytoken: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub registrytoken: String,
}

/// Credentials keyed by registry host
pub type Registries = HashMap<String, RegistryAuth>;

/// Load a YAML mapping of registry host to credential
pub fn load_registries(path: &Path) -> Result<Registries> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        StackError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
    })?;
    let registries: Option<Registries> = serde_yaml::from_str(&content)?;
    Ok(registries
        .unwrap_or_default()
        .into_iter()
        .map(|(host, auth)| (normalize_domain(&host), auth))
        .collect())
}

fn normalize_domain(domain: &str) -> String {
    match domain {
        "index.docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}

/// Registry host of an image reference.
///
/// The first path component is a host when it contains a dot or a port, or
/// is `localhost`; anything else lives on Docker Hub.
pub fn image_domain(image: &str) -> Option<String> {
    let image = image.trim();
    if image.is_empty() || image.chars().any(char::is_whitespace) {
        return None;
    }

    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            Some(normalize_domain(first))
        }
        _ => Some(DEFAULT_REGISTRY.to_string()),
    }
}

/// Base64url-encoded credential for the registry `image` is pulled from,
/// or `None` when nothing is configured for it
pub fn encoded_auth(image: &str, registries: &Registries) -> Option<String> {
    if registries.is_empty() {
        return None;
    }

    let auth = registries.get(&image_domain(image)?)?;
    let json = serde_json::to_vec(auth).ok()?;
    Some(base64::engine::general_purpose::URL_SAFE.encode(json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_domain() {
        assert_eq!(image_domain("nginx").as_deref(), Some("docker.io"));
        assert_eq!(image_domain("library/nginx:1").as_deref(), Some("docker.io"));
        assert_eq!(image_domain("ghcr.io/acme/app:v1").as_deref(), Some("ghcr.io"));
        assert_eq!(
            image_domain("registry.local:5000/app").as_deref(),
            Some("registry.local:5000")
        );
        assert_eq!(image_domain("localhost/app").as_deref(), Some("localhost"));
        assert_eq!(image_domain("index.docker.io/app").as_deref(), Some("docker.io"));
        assert_eq!(image_domain(""), None);
    }

    #[test]
    fn test_encoded_auth() {
        let mut registries = Registries::new();
        registries.insert(
            "ghcr.io".to_string(),
            RegistryAuth {
                username: "bot".to_string(),
                password: "hunter2".to_string(),
                ..Default::default()
            },
        );

        let encoded = encoded_auth("ghcr.io/acme/app:v1", &registries).unwrap();
        let decoded = base64::engine::general_purpose::URL_SAFE
            .decode(encoded)
            .unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            r#"{"username":"bot","password":"hunter2"}"#
        );

        assert_eq!(encoded_auth("nginx", &registries), None);
        assert_eq!(encoded_auth("ghcr.io/acme/app", &Registries::new()), None);
    }

    #[test]
    fn test_load_registries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registries.yaml");
        std::fs::write(
            &path,
            "index.docker.io:\n  username: me\n  password: pw\nghcr.io:\n  identitytoken: tok\n",
        )
        .unwrap();

        let registries = load_registries(&path).unwrap();
        assert_eq!(registries["docker.io"].username, "me");
        assert_eq!(registries["ghcr.io"].identitytoken, "tok");
    }
}
