//! Swarm service objects, in Docker Engine API shape

use super::ObjectVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Swarm service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Service {
    /// Service ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Service version
    pub version: ObjectVersion,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
    /// Service specification
    pub spec: ServiceSpec,
    /// Previous spec
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_spec: Option<ServiceSpec>,
    /// Task counts, present when requested with status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_status: Option<ServiceStatus>,
}

impl Service {
    /// Create a new service
    pub fn new(spec: ServiceSpec) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            version: ObjectVersion { index: 1 },
            created_at: now,
            updated_at: now,
            spec,
            previous_spec: None,
            service_status: None,
        }
    }

    /// Replace the specification, bumping the version
    pub fn update(&mut self, new_spec: ServiceSpec) {
        self.previous_spec = Some(std::mem::replace(&mut self.spec, new_spec));
        self.version.index += 1;
        self.updated_at = Utc::now();
    }

    /// Image the service currently runs, as resolved by the orchestrator
    pub fn image(&self) -> Option<&str> {
        self.spec
            .task_template
            .container_spec
            .as_ref()
            .map(|c| c.image.as_str())
    }

    /// Tasks the orchestrator should keep running; global modes are unknown
    /// until tasks are scheduled
    pub fn replicas(&self) -> Option<u64> {
        match self.spec.mode.as_ref() {
            None => Some(1),
            Some(ServiceMode::Replicated { replicas }) => Some(replicas.unwrap_or(1)),
            Some(ServiceMode::ReplicatedJob {
                total_completions, ..
            }) => Some(total_completions.unwrap_or(1)),
            Some(ServiceMode::Global {}) | Some(ServiceMode::GlobalJob {}) => None,
        }
    }
}

/// Running vs. desired task counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceStatus {
    /// Tasks in the running state
    pub running_tasks: u64,
    /// Tasks the orchestrator wants running
    pub desired_tasks: u64,
    /// Completed tasks (jobs only)
    pub completed_tasks: u64,
}

/// Service specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceSpec {
    /// Service name
    pub name: String,
    /// Labels
    #[serde(deserialize_with = "super::nullable")]
    pub labels: BTreeMap<String, String>,
    /// Task template
    pub task_template: TaskSpec,
    /// Service mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ServiceMode>,
    /// Update config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_config: Option<UpdateConfig>,
    /// Rollback config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_config: Option<UpdateConfig>,
    /// Endpoint specification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_spec: Option<EndpointSpec>,
}

/// Task specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TaskSpec {
    /// Container spec
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_spec: Option<ContainerSpec>,
    /// Resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Restart policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    /// Placement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    /// Counter that forces a task update when bumped
    pub force_update: u64,
    /// Network attachments
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachmentConfig>,
    /// Log driver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_driver: Option<LogDriver>,
}

/// Container specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerSpec {
    /// Image
    pub image: String,
    /// Labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Command
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Args
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Hostname
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Environment variables
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// User
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// TTY
    #[serde(rename = "TTY")]
    pub tty: bool,
    /// Open stdin
    pub open_stdin: bool,
    /// Read only
    pub read_only: bool,
    /// Mounts
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    /// Stop signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    /// Stop grace period in nanoseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_grace_period: Option<i64>,
    /// Health check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthConfig>,
    /// Hosts, as "IP hostname" lines
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// DNS config
    #[serde(rename = "DNSConfig", skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<DnsConfig>,
    /// Secrets
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretReference>,
    /// Configs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub configs: Vec<ConfigReference>,
    /// Isolation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation: Option<String>,
    /// Init
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
    /// Sysctls
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sysctls: BTreeMap<String, String>,
    /// Capability add
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capability_add: Vec<String>,
    /// Capability drop
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capability_drop: Vec<String>,
    /// Ulimits
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ulimits: Vec<Ulimit>,
}

/// Mount configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Mount {
    /// Target
    pub target: String,
    /// Source
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Type (bind, volume, tmpfs, npipe, cluster)
    #[serde(rename = "Type")]
    pub mount_type: String,
    /// Read only
    pub read_only: bool,
    /// Consistency
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<String>,
    /// Bind options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_options: Option<BindOptions>,
    /// Volume options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_options: Option<VolumeOptions>,
    /// Tmpfs options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmpfs_options: Option<TmpfsOptions>,
}

/// Bind options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BindOptions {
    /// Propagation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagation: Option<String>,
    /// Create the host path when missing
    pub create_mountpoint: bool,
}

/// Volume options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeOptions {
    /// No copy
    pub no_copy: bool,
    /// Labels
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Driver config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_config: Option<DriverConfig>,
    /// Path inside the volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
}

/// Driver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DriverConfig {
    /// Name
    pub name: String,
    /// Options
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Tmpfs options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TmpfsOptions {
    /// Size
    pub size_bytes: i64,
    /// Mode
    pub mode: u32,
}

/// Health check configuration; durations in nanoseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HealthConfig {
    /// Test
    pub test: Vec<String>,
    /// Interval
    pub interval: i64,
    /// Timeout
    pub timeout: i64,
    /// Retries
    pub retries: u64,
    /// Start period
    pub start_period: i64,
    /// Start interval
    pub start_interval: i64,
}

/// DNS configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DnsConfig {
    /// Nameservers
    pub nameservers: Vec<String>,
    /// Search
    pub search: Vec<String>,
    /// Options
    pub options: Vec<String>,
}

/// File placement of a secret or config inside the container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileTarget {
    /// Name
    pub name: String,
    /// UID
    #[serde(rename = "UID")]
    pub uid: String,
    /// GID
    #[serde(rename = "GID")]
    pub gid: String,
    /// Mode
    pub mode: u32,
}

/// Secret reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SecretReference {
    /// File
    pub file: Option<FileTarget>,
    /// Secret ID
    #[serde(rename = "SecretID")]
    pub secret_id: String,
    /// Secret name
    pub secret_name: String,
}

/// Config reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConfigReference {
    /// File
    pub file: Option<FileTarget>,
    /// Config ID
    #[serde(rename = "ConfigID")]
    pub config_id: String,
    /// Config name
    pub config_name: String,
}

/// Ulimit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Ulimit {
    /// Name
    pub name: String,
    /// Soft limit
    pub soft: i64,
    /// Hard limit
    pub hard: i64,
}

/// Resource requirements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResourceRequirements {
    /// Limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limit>,
    /// Reservations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservations: Option<Resources>,
}

/// Resource limits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Limit {
    /// CPU limit in nanoCPUs
    #[serde(rename = "NanoCPUs")]
    pub nano_cpus: i64,
    /// Memory limit in bytes
    pub memory_bytes: i64,
    /// Pids limit
    pub pids: i64,
}

/// Resource reservations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Resources {
    /// CPU reservation in nanoCPUs
    #[serde(rename = "NanoCPUs")]
    pub nano_cpus: i64,
    /// Memory reservation in bytes
    pub memory_bytes: i64,
    /// Generic resources
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub generic_resources: Vec<GenericResource>,
}

/// Generic resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GenericResource {
    /// Discrete resource spec
    pub discrete_resource_spec: Option<DiscreteResourceSpec>,
}

/// Discrete resource spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiscreteResourceSpec {
    /// Kind
    pub kind: String,
    /// Value
    pub value: i64,
}

/// Restart policy; durations in nanoseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RestartPolicy {
    /// Condition (none, on-failure, any)
    pub condition: String,
    /// Delay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
    /// Max attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u64>,
    /// Window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<i64>,
}

/// Placement configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Placement {
    /// Constraints
    pub constraints: Vec<String>,
    /// Preferences
    pub preferences: Vec<PlacementPreference>,
    /// Max replicas per node
    pub max_replicas: u64,
    /// Platforms, filled in when the registry is queried
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<Platform>,
}

/// Placement preference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PlacementPreference {
    /// Spread
    pub spread: Option<SpreadOver>,
}

/// Spread over
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SpreadOver {
    /// Spread descriptor
    pub spread_descriptor: String,
}

/// Platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Platform {
    /// Architecture
    pub architecture: String,
    /// OS
    #[serde(rename = "OS")]
    pub os: String,
}

/// Log driver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LogDriver {
    /// Name
    pub name: String,
    /// Options
    pub options: BTreeMap<String, String>,
}

/// Service mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", rename_all_fields = "PascalCase")]
pub enum ServiceMode {
    /// Replicated service
    Replicated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replicas: Option<u64>,
    },
    /// Global service (one per node)
    Global {},
    /// Replicated job
    ReplicatedJob {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrent: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_completions: Option<u64>,
    },
    /// Global job
    GlobalJob {},
}

/// Update/rollback configuration; durations in nanoseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateConfig {
    /// Parallelism
    pub parallelism: u64,
    /// Delay
    pub delay: i64,
    /// Failure action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_action: Option<String>,
    /// Monitor
    pub monitor: i64,
    /// Max failure ratio
    pub max_failure_ratio: f64,
    /// Order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

/// Network attachment configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkAttachmentConfig {
    /// Target
    pub target: String,
    /// Aliases
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Driver opts
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub driver_opts: BTreeMap<String, String>,
}

/// Endpoint specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EndpointSpec {
    /// Mode (vip, dnsrr)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Ports
    pub ports: Vec<PortConfig>,
}

/// Port configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortConfig {
    /// Name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Protocol
    pub protocol: String,
    /// Target port
    pub target_port: u32,
    /// Published port
    pub published_port: u32,
    /// Publish mode (ingress, host)
    pub publish_mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_spec(image: &str) -> ServiceSpec {
        ServiceSpec {
            name: "web".to_string(),
            task_template: TaskSpec {
                container_spec: Some(ContainerSpec {
                    image: image.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_create_service() {
        let service = Service::new(web_spec("nginx:latest"));
        assert_eq!(service.spec.name, "web");
        assert_eq!(service.version.index, 1);
        assert_eq!(service.replicas(), Some(1));
        assert_eq!(service.image(), Some("nginx:latest"));
    }

    #[test]
    fn test_update_bumps_version() {
        let mut service = Service::new(web_spec("nginx:1.0"));
        service.update(web_spec("nginx:2.0"));

        assert_eq!(service.version.index, 2);
        assert_eq!(service.image(), Some("nginx:2.0"));
        assert_eq!(
            service.previous_spec.as_ref().and_then(|s| s.task_template.container_spec.as_ref()).map(|c| c.image.as_str()),
            Some("nginx:1.0")
        );
    }

    #[test]
    fn test_mode_wire_shape() {
        let json = serde_json::to_value(ServiceMode::Replicated { replicas: Some(3) }).unwrap();
        assert_eq!(json, serde_json::json!({"Replicated": {"Replicas": 3}}));

        let json = serde_json::to_value(ServiceMode::Global {}).unwrap();
        assert_eq!(json, serde_json::json!({"Global": {}}));

        let mode: ServiceMode =
            serde_json::from_str(r#"{"ReplicatedJob":{"MaxConcurrent":2,"TotalCompletions":2}}"#)
                .unwrap();
        assert_eq!(
            mode,
            ServiceMode::ReplicatedJob {
                max_concurrent: Some(2),
                total_completions: Some(2)
            }
        );
    }

    #[test]
    fn test_decode_engine_service() {
        let raw = r#"{
            "ID": "abc",
            "Version": {"Index": 7},
            "Spec": {
                "Name": "demo_web",
                "Labels": {"com.docker.stack.namespace": "demo"},
                "TaskTemplate": {
                    "ContainerSpec": {"Image": "app:v1@sha256:00", "TTY": true},
                    "ForceUpdate": 2
                }
            },
            "ServiceStatus": {"RunningTasks": 1, "DesiredTasks": 2}
        }"#;

        let service: Service = serde_json::from_str(raw).unwrap();
        assert_eq!(service.version.index, 7);
        assert_eq!(service.spec.task_template.force_update, 2);
        assert_eq!(service.image(), Some("app:v1@sha256:00"));
        assert!(service.spec.task_template.container_spec.as_ref().unwrap().tty);
        assert_eq!(service.service_status.unwrap().desired_tasks, 2);
    }
}
