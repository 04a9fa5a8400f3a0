//! Error types for rune-stack

use std::fmt;
use thiserror::Error;

/// Result type for rune-stack operations
pub type Result<T> = std::result::Result<T, StackError>;

/// rune-stack error types
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Compose file parse error: {0}")]
    ComposeParse(String),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("secret {key:?} not found in secret store (service {service}, target {target})")]
    SecretKeyNotFound {
        service: String,
        target: String,
        key: String,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("undefined volume {0:?}")]
    UndefinedVolume(String),

    #[error("undefined network {0:?}")]
    UndefinedNetwork(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Config not found: {0}")]
    ConfigNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error(
        "this node is not a swarm manager. Use \"docker swarm init\" or \"docker swarm join\" \
         to connect this node to swarm and try again"
    )]
    NotSwarmManager,

    #[error(
        "network {0:?} is declared as external, but could not be found. \
         You need to create a swarm-scoped network before the stack is deployed"
    )]
    ExternalNetworkNotFound(String),

    #[error(
        "network {name:?} is declared as external, but it is not in the right scope: \
         {scope:?} instead of \"swarm\""
    )]
    ExternalNetworkScope { name: String, scope: String },

    #[error("update conflict: {0}")]
    Conflict(String),

    #[error("failed to prune services:\n{0}")]
    Prune(MultiError),

    #[error("service {service}: {source}")]
    Service {
        service: String,
        #[source]
        source: Box<StackError>,
    },

    #[error("timed out waiting for service {0} to converge")]
    ConvergenceTimeout(String),

    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StackError {
    /// Whether the error reports a resource missing from the cluster
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StackError::NetworkNotFound(_)
                | StackError::SecretNotFound(_)
                | StackError::ConfigNotFound(_)
                | StackError::ServiceNotFound(_)
        )
    }

    /// Version conflicts are safe to retry after re-reading the object
    pub fn is_retryable(&self) -> bool {
        match self {
            StackError::Conflict(_) => true,
            StackError::Service { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Attach the name of the service the error was raised for
    pub fn for_service(self, service: impl Into<String>) -> Self {
        StackError::Service {
            service: service.into(),
            source: Box::new(self),
        }
    }
}

/// Errors collected across a batch that keeps going after a failure
#[derive(Debug, Default)]
pub struct MultiError(Vec<StackError>);

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: StackError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[StackError] {
        &self.0
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> std::result::Result<(), MultiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_error_joins_lines() {
        let mut errs = MultiError::new();
        assert!(errs.is_empty());

        errs.push(StackError::ServiceNotFound("a".to_string()));
        errs.push(StackError::Engine("boom".to_string()));

        assert_eq!(errs.len(), 2);
        assert_eq!(errs.to_string(), "Service not found: a\nEngine error: boom");
        assert!(errs.into_result().is_err());
    }

    #[test]
    fn test_conflict_is_retryable_through_context() {
        let err = StackError::Conflict("version 3 != 4".to_string()).for_service("demo_web");
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("service demo_web:"));
        assert!(!StackError::NotSwarmManager.is_retryable());
    }
}
