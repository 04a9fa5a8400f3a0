//! Cluster client interface
//!
//! The deployer talks to the orchestrator only through [`ClusterClient`].
//! [`EngineClient`] speaks the Docker Engine HTTP API; [`MemoryCluster`]
//! keeps everything in process and backs the tests and `--dry-run`.

pub mod engine;
pub mod memory;

pub use engine::EngineClient;
pub use memory::MemoryCluster;

use crate::error::Result;
use crate::swarm::{
    Config, ConfigSpec, NetworkCreate, NetworkSummary, ObjectVersion, Secret, SecretSpec,
    Service, ServiceSpec,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Filters for list calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// `key` or `key=value` label matches, all of which must hold
    pub label: Vec<String>,
}

impl ListFilter {
    /// Everything owned by a stack
    pub fn stack(stack: &str) -> Self {
        Self {
            label: vec![crate::convert::stack_filter(stack)],
        }
    }

    /// Whether a label set satisfies every label filter
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.label.iter().all(|label| match label.split_once('=') {
            Some((key, value)) => labels.get(key).map(|v| v == value).unwrap_or(false),
            None => labels.contains_key(label),
        })
    }
}

/// Options for service create and update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Base64url-encoded registry credential
    pub encoded_registry_auth: Option<String>,
    /// Ask the orchestrator to resolve the image digest and platforms
    pub query_registry: bool,
}

/// Operations the deployer needs from the orchestrator.
///
/// Missing objects are reported with the `*NotFound` error kinds and a
/// stale version token with `Conflict`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Whether this node may perform control-plane operations
    async fn is_manager(&self) -> Result<bool>;

    async fn list_networks(&self, filter: &ListFilter) -> Result<Vec<NetworkSummary>>;
    async fn inspect_network(&self, name: &str) -> Result<NetworkSummary>;
    async fn create_network(&self, create: &NetworkCreate) -> Result<String>;

    async fn inspect_secret(&self, name: &str) -> Result<Secret>;
    async fn create_secret(&self, spec: &SecretSpec) -> Result<String>;
    async fn update_secret(&self, id: &str, version: ObjectVersion, spec: &SecretSpec)
        -> Result<()>;

    async fn inspect_config(&self, name: &str) -> Result<Config>;
    async fn create_config(&self, spec: &ConfigSpec) -> Result<String>;
    async fn update_config(&self, id: &str, version: ObjectVersion, spec: &ConfigSpec)
        -> Result<()>;

    async fn list_services(&self, filter: &ListFilter) -> Result<Vec<Service>>;
    /// Inspect a service including its task counts
    async fn inspect_service(&self, id: &str) -> Result<Service>;
    async fn create_service(&self, spec: &ServiceSpec, options: &ServiceOptions)
        -> Result<String>;
    async fn update_service(
        &self,
        id: &str,
        version: ObjectVersion,
        spec: &ServiceSpec,
        options: &ServiceOptions,
    ) -> Result<()>;
    async fn remove_service(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_filter() {
        let mut labels = BTreeMap::new();
        labels.insert("com.docker.stack.namespace".to_string(), "demo".to_string());
        labels.insert("tier".to_string(), "web".to_string());

        assert!(ListFilter::stack("demo").matches(&labels));
        assert!(!ListFilter::stack("other").matches(&labels));
        assert!(ListFilter {
            label: vec!["tier".to_string()]
        }
        .matches(&labels));
        assert!(ListFilter::default().matches(&BTreeMap::new()));
    }
}
