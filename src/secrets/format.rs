//! Output formats for rendered secrets

use crate::error::{Result, StackError};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;

/// How picked secrets are laid out in the mounted file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretFormat {
    /// `KEY=VALUE` lines, sorted by key
    #[default]
    Env,
    /// Flat JSON object
    Json,
    /// The single picked value, unmodified
    Raw,
    /// User template with `{{ .KEY }}` placeholders
    Template,
}

impl SecretFormat {
    /// Parse a format name; empty means `env`
    pub fn parse(name: Option<&str>) -> Result<Self> {
        match name.unwrap_or_default() {
            "" | "env" => Ok(SecretFormat::Env),
            "json" => Ok(SecretFormat::Json),
            "raw" => Ok(SecretFormat::Raw),
            "template" => Ok(SecretFormat::Template),
            other => Err(StackError::InvalidConfig(format!(
                "unknown format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SecretFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecretFormat::Env => "env",
            SecretFormat::Json => "json",
            SecretFormat::Raw => "raw",
            SecretFormat::Template => "template",
        };
        f.write_str(name)
    }
}

pub fn format_env(picked: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = String::new();
    for (key, value) in picked {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out.into_bytes()
}

pub fn format_json(picked: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(picked)?)
}

pub fn format_raw(picked: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let mut values = picked.values();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value.as_bytes().to_vec()),
        _ => Err(StackError::InvalidConfig(format!(
            "raw format requires exactly one secret, got {}",
            picked.len()
        ))),
    }
}

/// Replace `{{ .KEY }}` placeholders; any key that was not picked is an error
pub fn format_template(picked: &BTreeMap<String, String>, template: &str) -> Result<Vec<u8>> {
    let re = Regex::new(r"\{\{-?\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*-?\}\}")
        .map_err(|e| StackError::Template(e.to_string()))?;

    let mut missing = None;
    let rendered = re.replace_all(template, |caps: &Captures| match picked.get(&caps[1]) {
        Some(value) => value.clone(),
        None => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });

    match missing {
        Some(key) => Err(StackError::Template(format!(
            "template references {:?}, which is not among the picked secrets",
            key
        ))),
        None => Ok(rendered.into_owned().into_bytes()),
    }
}

/// Render picked secrets in the given format
pub fn render(
    format: SecretFormat,
    picked: &BTreeMap<String, String>,
    template: Option<&str>,
) -> Result<Vec<u8>> {
    match format {
        SecretFormat::Env => Ok(format_env(picked)),
        SecretFormat::Json => format_json(picked),
        SecretFormat::Raw => format_raw(picked),
        SecretFormat::Template => {
            let template = template.ok_or_else(|| {
                StackError::Template("template format requires template path".to_string())
            })?;
            format_template(picked, template)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picked(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(SecretFormat::parse(None).unwrap(), SecretFormat::Env);
        assert_eq!(SecretFormat::parse(Some("")).unwrap(), SecretFormat::Env);
        assert_eq!(SecretFormat::parse(Some("raw")).unwrap(), SecretFormat::Raw);
        assert!(SecretFormat::parse(Some("yaml")).is_err());
    }

    #[test]
    fn test_env_is_sorted() {
        let out = format_env(&picked(&[("Z", "last"), ("A", "first"), ("M", "x=y")]));
        assert_eq!(String::from_utf8(out).unwrap(), "A=first\nM=x=y\nZ=last\n");
    }

    #[test]
    fn test_json_is_flat_and_sorted() {
        let out = format_json(&picked(&[("b", "2"), ("a", "1")])).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), r#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn test_raw_requires_exactly_one() {
        let value = "line1\nline2 \t";
        assert_eq!(format_raw(&picked(&[("k", value)])).unwrap(), value.as_bytes());
        assert!(format_raw(&picked(&[])).is_err());
        assert!(format_raw(&picked(&[("a", "1"), ("b", "2")])).is_err());
    }

    #[test]
    fn test_template() {
        let out = format_template(
            &picked(&[("USER", "admin"), ("PASS", "s3cret")]),
            "url=postgres://{{ .USER }}:{{.PASS}}@db\n",
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "url=postgres://admin:s3cret@db\n");

        let err = format_template(&picked(&[("USER", "admin")]), "{{ .PASS }}").unwrap_err();
        assert!(err.to_string().contains("PASS"));

        assert!(render(SecretFormat::Template, &picked(&[("A", "1")]), None).is_err());
    }
}
