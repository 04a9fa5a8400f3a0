//! Stack secrets and configs

use super::{add_stack_label, scope_name};
use crate::compose::config::{LabelsConfig, Resource};
use crate::compose::Project;
use crate::error::{Result, StackError};
use crate::swarm::{ConfigSpec, SecretSpec};
use std::path::Path;

/// Where a secret or config gets its payload from
struct Source<'a> {
    kind: &'static str,
    name: &'a str,
    file: Option<&'a str>,
    content: Option<&'a str>,
    environment: Option<&'a str>,
    data: Option<&'a [u8]>,
}

impl Source<'_> {
    fn read(&self, working_dir: &Path) -> Result<Vec<u8>> {
        if let Some(data) = self.data {
            return Ok(data.to_vec());
        }

        let set = [self.file, self.content, self.environment]
            .iter()
            .filter(|s| s.is_some())
            .count();
        if set > 1 {
            return Err(StackError::InvalidConfig(format!(
                "{} {}: only one of file, content or environment may be set",
                self.kind, self.name
            )));
        }

        if let Some(file) = self.file {
            let path = working_dir.join(file);
            return std::fs::read(&path).map_err(|e| {
                StackError::InvalidConfig(format!(
                    "failed to read {} file {}: {}",
                    self.kind,
                    path.display(),
                    e
                ))
            });
        }
        if let Some(content) = self.content {
            return Ok(content.as_bytes().to_vec());
        }
        if let Some(var) = self.environment {
            return std::env::var(var).map(String::into_bytes).map_err(|_| {
                StackError::InvalidConfig(format!(
                    "{} {}: environment variable {} is not set",
                    self.kind, self.name, var
                ))
            });
        }
        Ok(Vec::new())
    }
}

fn cluster_name<R: Resource>(stack: &str, key: &str, resource: &R) -> String {
    match resource.explicit_name() {
        Some(name) => name.to_string(),
        None => scope_name(stack, key),
    }
}

fn labels(stack: &str, labels: Option<&LabelsConfig>) -> std::collections::BTreeMap<String, String> {
    add_stack_label(stack, labels.map(LabelsConfig::to_map).unwrap_or_default())
}

/// Secret specs for every non-external secret, sorted by name
pub fn convert_secrets(stack: &str, project: &Project) -> Result<Vec<SecretSpec>> {
    let mut result = Vec::new();

    for (key, secret) in &project.secrets {
        if secret.is_external() {
            continue;
        }

        let name = cluster_name(stack, key, secret);
        let data = Source {
            kind: "secret",
            name: key,
            file: secret.file.as_deref(),
            content: secret.content.as_deref(),
            environment: secret.environment.as_deref(),
            data: secret.data.as_deref(),
        }
        .read(&project.working_dir)?;

        let mut spec = SecretSpec::new(name, &data);
        spec.labels = labels(stack, secret.labels.as_ref());
        result.push(spec);
    }

    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

/// Config specs for every non-external config, sorted by name
pub fn convert_configs(stack: &str, project: &Project) -> Result<Vec<ConfigSpec>> {
    let mut result = Vec::new();

    for (key, config) in &project.configs {
        if config.is_external() {
            continue;
        }

        let name = cluster_name(stack, key, config);
        let data = Source {
            kind: "config",
            name: key,
            file: config.file.as_deref(),
            content: config.content.as_deref(),
            environment: None,
            data: config.data.as_deref(),
        }
        .read(&project.working_dir)?;

        let mut spec = ConfigSpec::new(name, &data);
        spec.labels = labels(stack, config.labels.as_ref());
        result.push(spec);
    }

    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::ConfigConfig;
    use crate::compose::ComposeParser;
    use crate::convert::LABEL_NAMESPACE;

    #[test]
    fn test_secret_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token.txt"), "t0ken").unwrap();

        let mut project = ComposeParser::parse_str(
            r#"
services: {}
secrets:
  token:
    file: ./token.txt
  inline:
    content: hello
  renamed:
    name: global_secret
    content: x
  outside:
    external: true
"#,
        )
        .unwrap();
        project.working_dir = dir.path().to_path_buf();

        let specs = convert_secrets("demo", &project).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["demo_inline", "demo_token", "global_secret"]);

        assert_eq!(specs[1].get_data().unwrap(), b"t0ken");
        assert_eq!(specs[0].get_data().unwrap(), b"hello");
        assert_eq!(specs[0].labels[LABEL_NAMESPACE], "demo");
    }

    #[test]
    fn test_conflicting_sources_rejected() {
        let project = ComposeParser::parse_str(
            "services: {}\nconfigs:\n  both:\n    file: a.conf\n    content: b\n",
        )
        .unwrap();
        let err = convert_configs("demo", &project).unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut project =
            ComposeParser::parse_str("services: {}\nconfigs:\n  app:\n    file: app.conf\n").unwrap();
        project.working_dir = dir.path().to_path_buf();

        let err = convert_configs("demo", &project).unwrap_err();
        assert!(err.to_string().contains("app.conf"));
    }

    #[test]
    fn test_generated_bytes_kept_verbatim() {
        let der = vec![0x30, 0x82, 0xff, 0xfe, 0x00, 0x01];
        let mut project = ComposeParser::parse_str("services: {}\n").unwrap();
        project.configs.insert(
            "cert_1a2b3c4d".to_string(),
            ConfigConfig {
                data: Some(der.clone()),
                ..Default::default()
            },
        );

        let specs = convert_configs("demo", &project).unwrap();
        assert_eq!(specs[0].name, "demo_cert_1a2b3c4d");
        assert_eq!(specs[0].get_data().unwrap(), der);
    }

    #[test]
    fn test_empty_source_gives_empty_data() {
        let project = ComposeParser::parse_str("services: {}\nconfigs:\n  empty: {}\n").unwrap();
        let specs = convert_configs("demo", &project).unwrap();
        assert!(specs[0].get_data().unwrap().is_empty());
    }
}
