//! Content-addressed secrets and configs
//!
//! Sensitive rules and local config files are rendered to bytes, named
//! after a hash of those bytes, and injected into the project as regular
//! top-level secrets/configs plus a reference on the owning service. Same
//! content gives the same name, so an unchanged secret never triggers a
//! service update; changed content gets a new name and forces one.

use super::format::{self, SecretFormat};
use super::store::SecretStore;
use crate::compose::config::{
    ConfigConfig, FileReference, ConfigRef, SecretConfig, SecretRef, SensitiveConfig,
    SensitiveSecret,
};
use crate::compose::Project;
use crate::error::{Result, StackError};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// `<name>_<first 8 hex chars of sha256(content)>`
pub fn hashed_name(name: &str, content: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(content));
    format!("{}_{}", name, &digest[..8])
}

/// Expand both service extensions in place
pub fn materialize(project: &mut Project, store: &SecretStore) -> Result<()> {
    process_local_configs(project)?;
    process_sensitive_secrets(project, store)?;
    Ok(())
}

/// Read every `local_configs` file and register it as a generated config
pub fn process_local_configs(project: &mut Project) -> Result<()> {
    let working_dir = project.working_dir.clone();

    for (service_name, service) in project.services.iter_mut() {
        for (name, local) in &service.local_configs {
            let path = working_dir.join(&local.source);
            let content = std::fs::read(&path).map_err(|e| {
                StackError::InvalidConfig(format!(
                    "failed to read local config file {} for service {}: {}",
                    local.source, service_name, e
                ))
            })?;

            let config_name = hashed_name(name, &content);
            debug!(service = %service_name, config = %config_name, "generated local config");

            project.configs.insert(
                config_name.clone(),
                ConfigConfig {
                    data: Some(content),
                    ..Default::default()
                },
            );
            service.configs.push(ConfigRef::Long(FileReference {
                source: config_name,
                target: local.target.clone(),
                ..Default::default()
            }));
        }
    }

    Ok(())
}

/// Render every `sensitive` rule from the secret store into a generated secret
pub fn process_sensitive_secrets(project: &mut Project, store: &SecretStore) -> Result<()> {
    let working_dir = project.working_dir.clone();

    for (service_name, service) in project.services.iter_mut() {
        for (name, rule) in &service.sensitive {
            let content = render_rule(store, rule, service_name, &working_dir)?;

            let secret_name = hashed_name(name, &content);
            debug!(service = %service_name, secret = %secret_name, "generated sensitive secret");

            project.secrets.insert(
                secret_name.clone(),
                SecretConfig {
                    data: Some(content),
                    ..Default::default()
                },
            );
            service.secrets.push(SecretRef::Long(FileReference {
                source: secret_name,
                target: rule.target.clone(),
                uid: rule.uid.clone(),
                gid: rule.gid.clone(),
                mode: rule.mode,
            }));
        }
    }

    Ok(())
}

fn render_rule(
    store: &SecretStore,
    rule: &SensitiveConfig,
    service: &str,
    working_dir: &Path,
) -> Result<Vec<u8>> {
    let target = rule.target.clone().unwrap_or_default();
    let picked = pick(store, &rule.secrets, service, &target)?;
    let format = SecretFormat::parse(rule.format.as_deref())?;

    let template = match (format, rule.template.as_deref()) {
        (SecretFormat::Template, Some(path)) if !path.is_empty() => {
            let full = working_dir.join(path);
            Some(std::fs::read_to_string(&full).map_err(|e| {
                StackError::Template(format!("failed to read template file {}: {}", path, e))
            })?)
        }
        _ => None,
    };

    format::render(format, &picked, template.as_deref()).map_err(|e| {
        StackError::InvalidConfig(format!(
            "failed to format sensitive secrets for service {} target {}: {}",
            service, target, e
        ))
    })
}

/// Look up each requested key, keyed by its output name
fn pick(
    store: &SecretStore,
    needed: &[SensitiveSecret],
    service: &str,
    target: &str,
) -> Result<BTreeMap<String, String>> {
    if needed.is_empty() {
        return Err(StackError::InvalidConfig(format!(
            "no secrets specified for sensitive config (service {}, target {})",
            service, target
        )));
    }

    let picked = needed
        .iter()
        .map(|secret| {
            let value = store
                .get(&secret.source)
                .ok_or_else(|| StackError::SecretKeyNotFound {
                    service: service.to_string(),
                    target: target.to_string(),
                    key: secret.source.clone(),
                })?;
            Ok((secret.output_name().to_string(), value.to_string()))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    if picked.len() != needed.len() {
        return Err(StackError::InvalidConfig(format!(
            "duplicate output names in sensitive config (service {}, target {})",
            service, target
        )));
    }
    Ok(picked)
}
