//! Compose file loader

use super::config::Project;
use crate::error::{Result, StackError};
use regex::{Captures, Regex};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_COMPOSE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Load and merge compose files; later files override earlier ones.
    /// The working directory is the absolute parent of the first file.
    pub fn load_files(paths: &[PathBuf], env: &HashMap<String, String>) -> Result<Project> {
        let first = paths
            .first()
            .ok_or_else(|| StackError::ComposeParse("no compose file given".to_string()))?;

        let mut merged = Value::Null;
        for path in paths {
            let content = std::fs::read_to_string(path).map_err(|e| {
                StackError::ComposeParse(format!("failed to read {}: {}", path.display(), e))
            })?;
            let content = interpolate(&content, env)?;
            let value: Value = serde_yaml::from_str(&content).map_err(|e| {
                StackError::ComposeParse(format!("failed to parse {}: {}", path.display(), e))
            })?;
            merge_values(&mut merged, value);
        }

        let mut project: Project = serde_yaml::from_value(merged)
            .map_err(|e| StackError::ComposeParse(format!("invalid compose model: {}", e)))?;
        project.working_dir = std::fs::canonicalize(first)?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        Self::validate(&project)?;
        Ok(project)
    }

    /// Parse compose YAML from a string, without interpolation
    pub fn parse_str(content: &str) -> Result<Project> {
        serde_yaml::from_str(content)
            .map_err(|e| StackError::ComposeParse(format!("Failed to parse YAML: {}", e)))
    }

    /// Reject projects that cannot be deployed as a stack
    pub fn validate(project: &Project) -> Result<()> {
        for (name, service) in &project.services {
            if service.image.as_deref().map_or(true, str::is_empty) {
                return Err(StackError::ComposeParse(format!(
                    "Service '{}' must have 'image' specified",
                    name
                )));
            }

            for net in service.network_map().keys() {
                if net != "default" && !project.networks.contains_key(net) {
                    return Err(StackError::UndefinedNetwork(format!(
                        "{} (service {})",
                        net, name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Deep merge: mappings merge key by key, anything else is replaced
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Interpolate `$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR-default}`,
/// `${VAR:?err}` and `${VAR?err}`; `$$` is a literal dollar
pub fn interpolate(s: &str, env: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(
        r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?[-?])([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))",
    )
    .map_err(|e| StackError::ComposeParse(e.to_string()))?;

    let mut failure = None;
    let result = re.replace_all(s, |caps: &Captures| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }
        if let Some(var) = caps.get(5) {
            return env.get(var.as_str()).cloned().unwrap_or_default();
        }

        let var = &caps[2];
        let value = env.get(var);
        let arg = caps.get(4).map_or("", |m| m.as_str());
        match caps.get(3).map(|m| m.as_str()) {
            None => value.cloned().unwrap_or_default(),
            Some(":-") => value
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| arg.to_string()),
            Some("-") => value.cloned().unwrap_or_else(|| arg.to_string()),
            Some(op) => {
                let missing = if op == ":?" {
                    value.map_or(true, String::is_empty)
                } else {
                    value.is_none()
                };
                if missing && failure.is_none() {
                    failure = Some(format!("required variable {} is missing a value: {}", var, arg));
                }
                value.cloned().unwrap_or_default()
            }
        }
    });

    match failure {
        Some(msg) => Err(StackError::ComposeParse(msg)),
        None => Ok(result.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_simple_compose() {
        let yaml = r#"
version: "3.8"
services:
  web:
    image: nginx:latest
    ports:
      - "80:80"
  db:
    image: postgres:13
    environment:
      POSTGRES_PASSWORD: secret
"#;

        let project = ComposeParser::parse_str(yaml).unwrap();
        assert_eq!(project.services.len(), 2);
        assert!(project.services.contains_key("web"));
        assert!(project.services.contains_key("db"));
        assert!(ComposeParser::validate(&project).is_ok());
    }

    #[test]
    fn test_validate_missing_image() {
        let project = ComposeParser::parse_str("services:\n  web:\n    ports:\n      - \"80:80\"\n")
            .unwrap();
        assert!(ComposeParser::validate(&project).is_err());
    }

    #[test]
    fn test_validate_undefined_network() {
        let project =
            ComposeParser::parse_str("services:\n  web:\n    image: a\n    networks: [front]\n")
                .unwrap();
        let err = ComposeParser::validate(&project).unwrap_err();
        assert!(err.to_string().contains("front"));
    }

    #[test]
    fn test_interpolate() {
        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "1.0.0".to_string());
        env.insert("EMPTY".to_string(), String::new());

        assert_eq!(interpolate("nginx:${TAG}", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate("nginx:$TAG", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate("${EMPTY:-x}", &env).unwrap(), "x");
        assert_eq!(interpolate("${EMPTY-x}", &env).unwrap(), "");
        assert_eq!(interpolate("$${TAG}", &env).unwrap(), "${TAG}");
        assert!(interpolate("${NOPE:?must be set}", &env).is_err());
    }

    #[test]
    fn test_load_files_merges_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("compose.yaml");
        let overlay = dir.path().join("compose.prod.yaml");

        let mut f = std::fs::File::create(&base).unwrap();
        writeln!(f, "services:\n  web:\n    image: app:${{TAG}}\n    environment:\n      A: \"1\"").unwrap();
        let mut f = std::fs::File::create(&overlay).unwrap();
        writeln!(f, "services:\n  web:\n    environment:\n      B: \"2\"\n    deploy:\n      replicas: 3").unwrap();

        let mut env = HashMap::new();
        env.insert("TAG".to_string(), "v1".to_string());

        let project = ComposeParser::load_files(&[base, overlay], &env).unwrap();
        let web = &project.services["web"];
        assert_eq!(web.image.as_deref(), Some("app:v1"));
        assert_eq!(web.environment_map().len(), 2);
        assert_eq!(web.deploy.as_ref().unwrap().replicas, Some(3));
        assert_eq!(project.working_dir, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_working_dir_is_absolute_and_named() {
        let dir = tempfile::tempdir().unwrap();
        let stack_dir = dir.path().join("shop");
        std::fs::create_dir_all(stack_dir.join("sub")).unwrap();
        std::fs::write(stack_dir.join("compose.yaml"), "services:\n  web:\n    image: a\n").unwrap();

        // sub/../compose.yaml has no usable parent name until resolved
        let path = stack_dir.join("sub").join("..").join("compose.yaml");
        let project = ComposeParser::load_files(&[path], &HashMap::new()).unwrap();

        assert!(project.working_dir.is_absolute());
        assert_eq!(project.working_dir.file_name().unwrap(), "shop");
    }
}
