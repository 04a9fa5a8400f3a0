//! In-process cluster
//!
//! Holds networks, secrets, configs and services in memory and records every
//! mutating call. Tasks start immediately unless a service is marked as
//! stalled, so convergence completes on the first poll.

use super::{ClusterClient, ListFilter, ServiceOptions};
use crate::error::{Result, StackError};
use crate::swarm::service::Platform;
use crate::swarm::{
    Config, ConfigSpec, NetworkCreate, NetworkSummary, ObjectVersion, Secret, SecretSpec,
    Service, ServiceSpec, ServiceStatus,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

/// A mutating call made against the cluster
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateNetwork(String),
    CreateSecret(String),
    UpdateSecret(String),
    CreateConfig(String),
    UpdateConfig(String),
    CreateService {
        spec: ServiceSpec,
        options: ServiceOptions,
    },
    UpdateService {
        spec: ServiceSpec,
        options: ServiceOptions,
    },
    RemoveService(String),
}

impl Call {
    pub fn is_service_update(&self) -> bool {
        matches!(self, Call::UpdateService { .. })
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::CreateNetwork(name) => write!(f, "create network {}", name),
            Call::CreateSecret(name) => write!(f, "create secret {}", name),
            Call::UpdateSecret(name) => write!(f, "update secret {}", name),
            Call::CreateConfig(name) => write!(f, "create config {}", name),
            Call::UpdateConfig(name) => write!(f, "update config {}", name),
            Call::CreateService { spec, .. } => write!(f, "create service {}", spec.name),
            Call::UpdateService { spec, .. } => write!(f, "update service {}", spec.name),
            Call::RemoveService(name) => write!(f, "remove service {}", name),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StackError::Lock("Failed to acquire read lock".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StackError::Lock("Failed to acquire write lock".to_string()))
}

/// In-memory cluster
#[derive(Clone)]
pub struct MemoryCluster {
    manager: bool,
    networks: Arc<RwLock<HashMap<String, NetworkSummary>>>,
    secrets: Arc<RwLock<HashMap<String, Secret>>>,
    configs: Arc<RwLock<HashMap<String, Config>>>,
    services: Arc<RwLock<HashMap<String, Service>>>,
    calls: Arc<RwLock<Vec<Call>>>,
    failing_removals: Arc<RwLock<HashSet<String>>>,
    stalled: Arc<RwLock<HashSet<String>>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Create an empty cluster whose node is a manager
    pub fn new() -> Self {
        Self {
            manager: true,
            networks: Arc::new(RwLock::new(HashMap::new())),
            secrets: Arc::new(RwLock::new(HashMap::new())),
            configs: Arc::new(RwLock::new(HashMap::new())),
            services: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            failing_removals: Arc::new(RwLock::new(HashSet::new())),
            stalled: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Act as a worker node
    pub fn worker() -> Self {
        Self {
            manager: false,
            ..Self::new()
        }
    }

    /// Add a pre-existing network outside any stack
    pub fn add_network(&self, name: &str, scope: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let driver = if scope == "swarm" { "overlay" } else { "bridge" };
        write(&self.networks)?.insert(
            id.clone(),
            NetworkSummary {
                id: id.clone(),
                name: name.to_string(),
                scope: scope.to_string(),
                driver: driver.to_string(),
                ..Default::default()
            },
        );
        Ok(id)
    }

    /// Make removing the named service fail
    pub fn fail_removal(&self, service_name: &str) -> Result<()> {
        write(&self.failing_removals)?.insert(service_name.to_string());
        Ok(())
    }

    /// Keep the named service at zero running tasks
    pub fn stall(&self, service_name: &str) -> Result<()> {
        write(&self.stalled)?.insert(service_name.to_string());
        Ok(())
    }

    /// Mutating calls made so far, oldest first
    pub fn calls(&self) -> Result<Vec<Call>> {
        Ok(read(&self.calls)?.clone())
    }

    pub fn clear_calls(&self) -> Result<()> {
        write(&self.calls)?.clear();
        Ok(())
    }

    /// Find a service by name
    pub fn service(&self, name: &str) -> Result<Option<Service>> {
        Ok(read(&self.services)?
            .values()
            .find(|s| s.spec.name == name)
            .cloned())
    }

    fn record(&self, call: Call) -> Result<()> {
        write(&self.calls)?.push(call);
        Ok(())
    }

    /// Mimic the engine pinning the image digest and platforms
    fn resolve_image(spec: &mut ServiceSpec) {
        let Some(container) = spec.task_template.container_spec.as_mut() else {
            return;
        };
        if !container.image.contains('@') {
            let digest = format!("{:x}", Sha256::digest(container.image.as_bytes()));
            container.image = format!("{}@sha256:{}", container.image, digest);
        }
        spec.task_template
            .placement
            .get_or_insert_with(Default::default)
            .platforms = vec![Platform {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
        }];
    }

    fn status(&self, service: &Service) -> Result<ServiceStatus> {
        let desired = service.replicas().unwrap_or(1);
        let running = if read(&self.stalled)?.contains(&service.spec.name) {
            0
        } else {
            desired
        };
        Ok(ServiceStatus {
            running_tasks: running,
            desired_tasks: desired,
            completed_tasks: 0,
        })
    }
}

fn find<'a, T>(
    map: &'a HashMap<String, T>,
    id_or_name: &str,
    name_of: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    map.get(id_or_name)
        .or_else(|| map.values().find(|v| name_of(v) == id_or_name))
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn is_manager(&self) -> Result<bool> {
        Ok(self.manager)
    }

    async fn list_networks(&self, filter: &ListFilter) -> Result<Vec<NetworkSummary>> {
        let mut result: Vec<NetworkSummary> = read(&self.networks)?
            .values()
            .filter(|n| filter.matches(&n.labels))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkSummary> {
        let networks = read(&self.networks)?;
        find(&*networks, name, |n| n.name.as_str())
            .cloned()
            .ok_or_else(|| StackError::NetworkNotFound(name.to_string()))
    }

    async fn create_network(&self, create: &NetworkCreate) -> Result<String> {
        let mut networks = write(&self.networks)?;
        if networks.values().any(|n| n.name == create.name) {
            return Err(StackError::Conflict(format!(
                "network with name {} already exists",
                create.name
            )));
        }

        let id = Uuid::new_v4().to_string();
        let scope = if create.driver == "overlay" { "swarm" } else { "local" };
        networks.insert(
            id.clone(),
            NetworkSummary {
                id: id.clone(),
                name: create.name.clone(),
                scope: scope.to_string(),
                driver: create.driver.clone(),
                labels: create.labels.clone(),
            },
        );
        drop(networks);

        debug!(network = %create.name, "created network");
        self.record(Call::CreateNetwork(create.name.clone()))?;
        Ok(id)
    }

    async fn inspect_secret(&self, name: &str) -> Result<Secret> {
        let secrets = read(&self.secrets)?;
        find(&*secrets, name, |s| s.spec.name.as_str())
            .cloned()
            .ok_or_else(|| StackError::SecretNotFound(name.to_string()))
    }

    async fn create_secret(&self, spec: &SecretSpec) -> Result<String> {
        let mut secrets = write(&self.secrets)?;
        if secrets.values().any(|s| s.spec.name == spec.name) {
            return Err(StackError::Conflict(format!(
                "secret {} already exists",
                spec.name
            )));
        }

        let secret = Secret::new(spec.clone());
        let id = secret.id.clone();
        secrets.insert(id.clone(), secret);
        drop(secrets);

        self.record(Call::CreateSecret(spec.name.clone()))?;
        Ok(id)
    }

    async fn update_secret(&self, id: &str, version: ObjectVersion, spec: &SecretSpec) -> Result<()> {
        let mut secrets = write(&self.secrets)?;
        let secret = secrets
            .get_mut(id)
            .ok_or_else(|| StackError::SecretNotFound(id.to_string()))?;

        if secret.version != version {
            return Err(StackError::Conflict(format!(
                "update out of sequence: secret {} is at version {}, got {}",
                secret.spec.name, secret.version.index, version.index
            )));
        }
        secret.update(spec.clone())?;
        drop(secrets);

        self.record(Call::UpdateSecret(spec.name.clone()))
    }

    async fn inspect_config(&self, name: &str) -> Result<Config> {
        let configs = read(&self.configs)?;
        find(&*configs, name, |c| c.spec.name.as_str())
            .cloned()
            .ok_or_else(|| StackError::ConfigNotFound(name.to_string()))
    }

    async fn create_config(&self, spec: &ConfigSpec) -> Result<String> {
        let mut configs = write(&self.configs)?;
        if configs.values().any(|c| c.spec.name == spec.name) {
            return Err(StackError::Conflict(format!(
                "config {} already exists",
                spec.name
            )));
        }

        let config = Config::new(spec.clone());
        let id = config.id.clone();
        configs.insert(id.clone(), config);
        drop(configs);

        self.record(Call::CreateConfig(spec.name.clone()))?;
        Ok(id)
    }

    async fn update_config(&self, id: &str, version: ObjectVersion, spec: &ConfigSpec) -> Result<()> {
        let mut configs = write(&self.configs)?;
        let config = configs
            .get_mut(id)
            .ok_or_else(|| StackError::ConfigNotFound(id.to_string()))?;

        if config.version != version {
            return Err(StackError::Conflict(format!(
                "update out of sequence: config {} is at version {}, got {}",
                config.spec.name, config.version.index, version.index
            )));
        }
        config.update(spec.clone())?;
        drop(configs);

        self.record(Call::UpdateConfig(spec.name.clone()))
    }

    async fn list_services(&self, filter: &ListFilter) -> Result<Vec<Service>> {
        let mut result: Vec<Service> = read(&self.services)?
            .values()
            .filter(|s| filter.matches(&s.spec.labels))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        Ok(result)
    }

    async fn inspect_service(&self, id: &str) -> Result<Service> {
        let mut service = {
            let services = read(&self.services)?;
            find(&*services, id, |s| s.spec.name.as_str())
                .cloned()
                .ok_or_else(|| StackError::ServiceNotFound(id.to_string()))?
        };
        service.service_status = Some(self.status(&service)?);
        Ok(service)
    }

    async fn create_service(&self, spec: &ServiceSpec, options: &ServiceOptions) -> Result<String> {
        let mut stored = spec.clone();
        if options.query_registry {
            Self::resolve_image(&mut stored);
        }

        let mut services = write(&self.services)?;
        if services.values().any(|s| s.spec.name == spec.name) {
            return Err(StackError::Conflict(format!(
                "service {} already exists",
                spec.name
            )));
        }

        let service = Service::new(stored);
        let id = service.id.clone();
        services.insert(id.clone(), service);
        drop(services);

        self.record(Call::CreateService {
            spec: spec.clone(),
            options: options.clone(),
        })?;
        Ok(id)
    }

    async fn update_service(
        &self,
        id: &str,
        version: ObjectVersion,
        spec: &ServiceSpec,
        options: &ServiceOptions,
    ) -> Result<()> {
        let mut stored = spec.clone();
        if options.query_registry {
            Self::resolve_image(&mut stored);
        }

        let mut services = write(&self.services)?;
        let service = services
            .get_mut(id)
            .ok_or_else(|| StackError::ServiceNotFound(id.to_string()))?;

        if service.version != version {
            return Err(StackError::Conflict(format!(
                "update out of sequence: service {} is at version {}, got {}",
                service.spec.name, service.version.index, version.index
            )));
        }
        service.update(stored);
        drop(services);

        self.record(Call::UpdateService {
            spec: spec.clone(),
            options: options.clone(),
        })
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        let mut services = write(&self.services)?;
        let name = services
            .get(id)
            .map(|s| s.spec.name.clone())
            .ok_or_else(|| StackError::ServiceNotFound(id.to_string()))?;

        if read(&self.failing_removals)?.contains(&name) {
            return Err(StackError::Engine(format!(
                "failed to remove service {}: removal refused",
                name
            )));
        }
        services.remove(id);
        drop(services);

        self.record(Call::RemoveService(name))
    }
}
