//! Compose project model
//!
//! These types mirror the Compose file format closely enough to be loaded
//! straight from YAML. Both the short and long syntaxes are accepted where
//! Compose allows them; the `*_map` / `normalize` helpers turn them into a
//! single canonical shape for the converter.

use crate::error::{Result, StackError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A loaded Compose project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    /// Project name
    #[serde(default)]
    pub name: Option<String>,
    /// Services
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Networks
    #[serde(default, deserialize_with = "nullable_map")]
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Volumes
    #[serde(default, deserialize_with = "nullable_map")]
    pub volumes: BTreeMap<String, VolumeConfig>,
    /// Secrets
    #[serde(default, deserialize_with = "nullable_map")]
    pub secrets: BTreeMap<String, SecretConfig>,
    /// Configs
    #[serde(default, deserialize_with = "nullable_map")]
    pub configs: BTreeMap<String, ConfigConfig>,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub working_dir: PathBuf,
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image name
    #[serde(default)]
    pub image: Option<String>,
    /// Command to run
    #[serde(default)]
    pub command: Option<CommandConfig>,
    /// Entrypoint
    #[serde(default)]
    pub entrypoint: Option<CommandConfig>,
    /// Hostname
    #[serde(default)]
    pub hostname: Option<String>,
    /// Environment variables
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    /// Port mappings
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    /// Volume mounts
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    /// Networks to connect to
    #[serde(default)]
    pub networks: Option<NetworksConfig>,
    /// Deploy configuration
    #[serde(default)]
    pub deploy: Option<DeployConfig>,
    /// Healthcheck configuration
    #[serde(default)]
    pub healthcheck: Option<HealthcheckConfig>,
    /// Container labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// Restart policy shorthand (`condition[:max-attempts]`)
    #[serde(default)]
    pub restart: Option<String>,
    /// Working directory
    #[serde(default)]
    pub working_dir: Option<String>,
    /// User
    #[serde(default)]
    pub user: Option<String>,
    /// Read only root filesystem
    #[serde(default)]
    pub read_only: Option<bool>,
    /// Stdin open
    #[serde(default)]
    pub stdin_open: Option<bool>,
    /// TTY
    #[serde(default)]
    pub tty: Option<bool>,
    /// Init process
    #[serde(default)]
    pub init: Option<bool>,
    /// Isolation technology
    #[serde(default)]
    pub isolation: Option<String>,
    /// Stop signal
    #[serde(default)]
    pub stop_signal: Option<String>,
    /// Stop grace period
    #[serde(default)]
    pub stop_grace_period: Option<String>,
    /// Sysctls
    #[serde(default)]
    pub sysctls: BTreeMap<String, String>,
    /// Ulimits
    #[serde(default)]
    pub ulimits: BTreeMap<String, UlimitConfig>,
    /// Extra hosts (`host:ip` or `host=ip`)
    #[serde(default)]
    pub extra_hosts: Vec<String>,
    /// DNS servers
    #[serde(default)]
    pub dns: Vec<String>,
    /// DNS search domains
    #[serde(default)]
    pub dns_search: Vec<String>,
    /// Capabilities to add
    #[serde(default)]
    pub cap_add: Vec<String>,
    /// Capabilities to drop
    #[serde(default)]
    pub cap_drop: Vec<String>,
    /// Secrets
    #[serde(default)]
    pub secrets: Vec<SecretRef>,
    /// Configs
    #[serde(default)]
    pub configs: Vec<ConfigRef>,
    /// Secrets rendered from the local secret store
    #[serde(default)]
    pub sensitive: BTreeMap<String, SensitiveConfig>,
    /// Configs read from local files
    #[serde(default)]
    pub local_configs: BTreeMap<String, LocalConfig>,
}

impl ServiceConfig {
    /// Environment as a sorted map; `None` values are declared but unset
    pub fn environment_map(&self) -> BTreeMap<String, Option<String>> {
        match &self.environment {
            None => BTreeMap::new(),
            Some(EnvironmentConfig::Map(map)) => map.clone(),
            Some(EnvironmentConfig::Array(arr)) => arr
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), Some(value.to_string())),
                    None => (item.clone(), None),
                })
                .collect(),
        }
    }

    /// Networks the service joins, keyed by network name
    pub fn network_map(&self) -> BTreeMap<String, ServiceNetworkConfig> {
        match &self.networks {
            None => BTreeMap::new(),
            Some(NetworksConfig::Array(arr)) => arr
                .iter()
                .map(|name| (name.clone(), ServiceNetworkConfig::default()))
                .collect(),
            Some(NetworksConfig::Map(map)) => map
                .iter()
                .map(|(name, cfg)| (name.clone(), cfg.clone().unwrap_or_default()))
                .collect(),
        }
    }

    /// Container labels as a map
    pub fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.as_ref().map(LabelsConfig::to_map).unwrap_or_default()
    }

    /// Secret references in long form
    pub fn secret_refs(&self) -> Vec<FileReference> {
        self.secrets.iter().map(SecretRef::to_long).collect()
    }

    /// Config references in long form
    pub fn config_refs(&self) -> Vec<FileReference> {
        self.configs.iter().map(ConfigRef::to_long).collect()
    }
}

/// Command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

impl CommandConfig {
    /// Argument vector; the string form is split shell-style
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            CommandConfig::Shell(s) => split_shell_words(s),
            CommandConfig::Exec(arr) => arr.clone(),
        }
    }
}

/// Split a command line on whitespace, honoring single and double quotes
fn split_shell_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_word = true;
                    }
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if in_word {
        words.push(current);
    }
    words
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(#[serde(deserialize_with = "scalar_value_map")] BTreeMap<String, Option<String>>),
}

/// Port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Short syntax: "8080:80/udp"
    Short(#[serde(deserialize_with = "string_or_number")] String),
    /// Long syntax
    Long(PortConfigLong),
}

/// Long port configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port in container
    pub target: u32,
    /// Published port on host
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub published: Option<String>,
    /// Host IP to bind to
    #[serde(default)]
    pub host_ip: Option<String>,
    /// Protocol (tcp/udp)
    #[serde(default)]
    pub protocol: Option<String>,
    /// Mode (host/ingress)
    #[serde(default)]
    pub mode: Option<String>,
}

impl PortConfig {
    /// Expand into long form; ranges produce one entry per port
    pub fn expand(&self) -> Result<Vec<PortConfigLong>> {
        match self {
            PortConfig::Long(long) => Ok(vec![long.clone()]),
            PortConfig::Short(short) => parse_short_port(short),
        }
    }
}

fn parse_short_port(spec: &str) -> Result<Vec<PortConfigLong>> {
    let invalid = || StackError::InvalidConfig(format!("invalid port specification: {:?}", spec));

    let (mapping, protocol) = match spec.rsplit_once('/') {
        Some((m, p)) => (m, Some(p.to_string())),
        None => (spec, None),
    };

    let parts: Vec<&str> = mapping.split(':').collect();
    let (host_ip, published, target) = match parts.as_slice() {
        [target] => (None, None, *target),
        [published, target] => (None, Some(*published), *target),
        [ip, published, target] => (Some(ip.to_string()), Some(*published), *target),
        _ => return Err(invalid()),
    };

    let targets = parse_port_range(target).ok_or_else(invalid)?;
    let published: Option<Vec<u32>> = match published {
        None | Some("") => None,
        Some(p) => Some(parse_port_range(p).ok_or_else(invalid)?),
    };

    if let Some(ref published) = published {
        if published.len() != targets.len() && published.len() != 1 {
            return Err(invalid());
        }
    }

    Ok(targets
        .iter()
        .enumerate()
        .map(|(i, target)| PortConfigLong {
            target: *target,
            published: published.as_ref().map(|p| {
                if p.len() == 1 {
                    p[0].to_string()
                } else {
                    p[i].to_string()
                }
            }),
            host_ip: host_ip.clone(),
            protocol: protocol.clone(),
            mode: None,
        })
        .collect())
}

fn parse_port_range(spec: &str) -> Option<Vec<u32>> {
    match spec.split_once('-') {
        Some((start, end)) => {
            let start: u32 = start.parse().ok()?;
            let end: u32 = end.parse().ok()?;
            (start <= end).then(|| (start..=end).collect())
        }
        None => spec.parse().ok().map(|p| vec![p]),
    }
}

/// Volume mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolumeMount {
    /// Short syntax: "source:target:mode"
    Short(String),
    /// Long syntax
    Long(VolumeMountLong),
}

/// Long volume mount configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMountLong {
    /// Mount type (volume, bind, tmpfs, cluster, npipe)
    #[serde(rename = "type", default)]
    pub mount_type: Option<String>,
    /// Source path or volume name
    #[serde(default)]
    pub source: Option<String>,
    /// Target path in container
    pub target: String,
    /// Read only
    #[serde(default)]
    pub read_only: Option<bool>,
    /// Bind options
    #[serde(default)]
    pub bind: Option<BindOptions>,
    /// Volume options
    #[serde(default)]
    pub volume: Option<VolumeOptions>,
    /// Tmpfs options
    #[serde(default)]
    pub tmpfs: Option<TmpfsOptions>,
    /// Consistency
    #[serde(default)]
    pub consistency: Option<String>,
}

impl VolumeMount {
    /// Long form of the mount; short specs infer bind vs. volume from the source
    pub fn normalize(&self) -> Result<VolumeMountLong> {
        let spec = match self {
            VolumeMount::Long(long) => return Ok(long.clone()),
            VolumeMount::Short(spec) => spec,
        };

        let parts: Vec<&str> = spec.split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [target] => (None, *target, None),
            [source, target] => (Some(*source), *target, None),
            [source, target, mode] => (Some(*source), *target, Some(*mode)),
            _ => {
                return Err(StackError::InvalidConfig(format!(
                    "invalid volume specification: {:?}",
                    spec
                )))
            }
        };

        if target.is_empty() {
            return Err(StackError::InvalidConfig(format!(
                "invalid volume specification: {:?}",
                spec
            )));
        }

        let mount_type = match source {
            Some(s) if is_host_path(s) => "bind",
            _ => "volume",
        };

        let mut mount = VolumeMountLong {
            mount_type: Some(mount_type.to_string()),
            source: source.map(str::to_string),
            target: target.to_string(),
            ..Default::default()
        };

        for option in mode.unwrap_or_default().split(',').filter(|o| !o.is_empty()) {
            match option {
                "ro" => mount.read_only = Some(true),
                "rw" => mount.read_only = Some(false),
                "nocopy" => {
                    mount.volume = Some(VolumeOptions {
                        nocopy: Some(true),
                        ..Default::default()
                    })
                }
                "shared" | "rshared" | "slave" | "rslave" | "private" | "rprivate" => {
                    mount.bind = Some(BindOptions {
                        propagation: Some(option.to_string()),
                        ..Default::default()
                    })
                }
                "consistent" | "cached" | "delegated" => {
                    mount.consistency = Some(option.to_string())
                }
                // SELinux relabeling has no swarm counterpart
                "z" | "Z" => {}
                other => {
                    return Err(StackError::InvalidConfig(format!(
                        "invalid volume mode {:?} in {:?}",
                        other, spec
                    )))
                }
            }
        }

        Ok(mount)
    }
}

fn is_host_path(source: &str) -> bool {
    source.starts_with('/')
        || source.starts_with('.')
        || source.starts_with('~')
        || source.starts_with('\\')
        || (source.len() > 1 && source.as_bytes()[1] == b':')
}

/// Bind mount options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindOptions {
    /// Propagation mode
    #[serde(default)]
    pub propagation: Option<String>,
    /// Create host path
    #[serde(default)]
    pub create_host_path: Option<bool>,
}

/// Volume options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeOptions {
    /// No copy data from container
    #[serde(default)]
    pub nocopy: Option<bool>,
    /// Path inside the volume to mount instead of its root
    #[serde(default)]
    pub subpath: Option<String>,
}

/// Tmpfs options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TmpfsOptions {
    /// Size (bytes or unit string)
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub size: Option<String>,
    /// Mode
    #[serde(default)]
    pub mode: Option<u32>,
}

/// Networks configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworksConfig {
    /// Array of network names
    Array(Vec<String>),
    /// Map of network name to config
    Map(BTreeMap<String, Option<ServiceNetworkConfig>>),
}

/// Service network configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceNetworkConfig {
    /// Aliases
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Driver options
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
}

/// Deploy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Deployment mode (replicated, global, replicated-job, global-job)
    #[serde(default)]
    pub mode: Option<String>,
    /// Number of replicas
    #[serde(default)]
    pub replicas: Option<u64>,
    /// Placement constraints
    #[serde(default)]
    pub placement: Option<PlacementConfig>,
    /// Resource limits and reservations
    #[serde(default)]
    pub resources: Option<ResourcesConfig>,
    /// Restart policy
    #[serde(default)]
    pub restart_policy: Option<RestartPolicyConfig>,
    /// Update configuration
    #[serde(default)]
    pub update_config: Option<UpdateConfig>,
    /// Rollback configuration
    #[serde(default)]
    pub rollback_config: Option<UpdateConfig>,
    /// Service labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Endpoint mode (vip, dnsrr)
    #[serde(default)]
    pub endpoint_mode: Option<String>,
}

/// Placement configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Constraints
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Preferences
    #[serde(default)]
    pub preferences: Vec<PlacementPreference>,
    /// Max replicas per node
    #[serde(default)]
    pub max_replicas_per_node: Option<u64>,
}

/// Placement preference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementPreference {
    /// Spread strategy
    pub spread: String,
}

/// Resources configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Resource limits
    #[serde(default)]
    pub limits: Option<ResourceSpec>,
    /// Resource reservations
    #[serde(default)]
    pub reservations: Option<ResourceSpec>,
}

/// Resource specification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPUs, fractional
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub cpus: Option<String>,
    /// Memory (bytes or unit string)
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub memory: Option<String>,
    /// PIDs limit
    #[serde(default)]
    pub pids: Option<i64>,
    /// Generic resources (reservations only)
    #[serde(default)]
    pub generic_resources: Vec<GenericResourceConfig>,
}

/// Generic resource reservation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericResourceConfig {
    /// Discrete resource
    #[serde(default)]
    pub discrete_resource_spec: Option<DiscreteResourceConfig>,
}

/// Discrete generic resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscreteResourceConfig {
    /// Kind
    pub kind: String,
    /// Value
    pub value: i64,
}

/// Restart policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartPolicyConfig {
    /// Condition (none, on-failure, any)
    #[serde(default)]
    pub condition: Option<String>,
    /// Delay between retries
    #[serde(default)]
    pub delay: Option<String>,
    /// Maximum attempts
    #[serde(default)]
    pub max_attempts: Option<u64>,
    /// Window for counting retries
    #[serde(default)]
    pub window: Option<String>,
}

/// Update/rollback configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Parallelism
    #[serde(default)]
    pub parallelism: Option<u64>,
    /// Delay between updates
    #[serde(default)]
    pub delay: Option<String>,
    /// Failure action
    #[serde(default)]
    pub failure_action: Option<String>,
    /// Monitor duration
    #[serde(default)]
    pub monitor: Option<String>,
    /// Max failure ratio
    #[serde(default)]
    pub max_failure_ratio: Option<f64>,
    /// Order (start-first, stop-first)
    #[serde(default)]
    pub order: Option<String>,
}

/// Healthcheck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthcheckConfig {
    /// Test command
    #[serde(default)]
    pub test: Option<HealthcheckTest>,
    /// Interval
    #[serde(default)]
    pub interval: Option<String>,
    /// Timeout
    #[serde(default)]
    pub timeout: Option<String>,
    /// Retries
    #[serde(default)]
    pub retries: Option<u64>,
    /// Start period
    #[serde(default)]
    pub start_period: Option<String>,
    /// Start interval
    #[serde(default)]
    pub start_interval: Option<String>,
    /// Disable healthcheck
    #[serde(default)]
    pub disable: bool,
}

/// Healthcheck test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthcheckTest {
    /// Command string, run through the shell
    Command(String),
    /// Command array
    Array(Vec<String>),
}

impl HealthcheckTest {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            HealthcheckTest::Command(cmd) => vec!["CMD-SHELL".to_string(), cmd.clone()],
            HealthcheckTest::Array(arr) => arr.clone(),
        }
    }
}

/// Labels configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelsConfig {
    /// Array of "key=value" strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, String>),
}

impl LabelsConfig {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        match self {
            LabelsConfig::Map(map) => map.clone(),
            LabelsConfig::Array(arr) => arr
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item.clone(), String::new()),
                })
                .collect(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Driver
    #[serde(default)]
    pub driver: Option<String>,
    /// Options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Ulimit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UlimitConfig {
    /// Single value (same for soft and hard)
    Single(i64),
    /// Separate soft and hard limits
    SoftHard { soft: i64, hard: i64 },
}

/// Network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Driver
    #[serde(default)]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
    /// IPAM configuration
    #[serde(default)]
    pub ipam: Option<IpamConfig>,
    /// External network
    #[serde(default)]
    pub external: Option<ExternalConfig>,
    /// Internal network
    #[serde(default)]
    pub internal: bool,
    /// Attachable
    #[serde(default)]
    pub attachable: bool,
    /// Labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Name
    #[serde(default)]
    pub name: Option<String>,
}

/// IPAM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Driver
    #[serde(default)]
    pub driver: Option<String>,
    /// Config blocks
    #[serde(default)]
    pub config: Vec<IpamPoolConfig>,
}

/// IPAM pool configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpamPoolConfig {
    /// Subnet
    #[serde(default)]
    pub subnet: Option<String>,
    /// IP range
    #[serde(default)]
    pub ip_range: Option<String>,
    /// Gateway
    #[serde(default)]
    pub gateway: Option<String>,
    /// Auxiliary addresses
    #[serde(default)]
    pub aux_addresses: BTreeMap<String, String>,
}

/// Volume configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Driver
    #[serde(default)]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default)]
    pub driver_opts: BTreeMap<String, String>,
    /// External volume
    #[serde(default)]
    pub external: Option<ExternalConfig>,
    /// Labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Name
    #[serde(default)]
    pub name: Option<String>,
}

/// External resource configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalConfig {
    /// Boolean
    Bool(bool),
    /// With name (legacy syntax)
    Named { name: String },
}

/// Shared accessors for top-level resources that may be external or renamed
pub trait Resource {
    fn external(&self) -> Option<&ExternalConfig>;
    fn explicit_name(&self) -> Option<&str>;

    fn is_external(&self) -> bool {
        match self.external() {
            Some(ExternalConfig::Bool(b)) => *b,
            Some(ExternalConfig::Named { .. }) => true,
            None => false,
        }
    }

    /// Name of an external resource in the cluster
    fn external_name<'a>(&'a self, key: &'a str) -> &'a str {
        if let Some(name) = self.explicit_name() {
            return name;
        }
        match self.external() {
            Some(ExternalConfig::Named { name }) => name,
            _ => key,
        }
    }
}

macro_rules! impl_resource {
    ($($ty:ty),*) => {
        $(impl Resource for $ty {
            fn external(&self) -> Option<&ExternalConfig> {
                self.external.as_ref()
            }

            fn explicit_name(&self) -> Option<&str> {
                self.name.as_deref().filter(|n| !n.is_empty())
            }
        })*
    };
}

impl_resource!(NetworkConfig, VolumeConfig, SecretConfig, ConfigConfig);

/// Secret configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretConfig {
    /// File path
    #[serde(default)]
    pub file: Option<String>,
    /// Literal content
    #[serde(default)]
    pub content: Option<String>,
    /// Environment variable holding the content
    #[serde(default)]
    pub environment: Option<String>,
    /// Generated payload, kept as raw bytes
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
    /// External secret
    #[serde(default)]
    pub external: Option<ExternalConfig>,
    /// Labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Name
    #[serde(default)]
    pub name: Option<String>,
}

/// Config configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigConfig {
    /// File path
    #[serde(default)]
    pub file: Option<String>,
    /// Literal content
    #[serde(default)]
    pub content: Option<String>,
    /// Generated payload, kept as raw bytes
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
    /// External config
    #[serde(default)]
    pub external: Option<ExternalConfig>,
    /// Labels
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    /// Name
    #[serde(default)]
    pub name: Option<String>,
}

/// Secret reference in service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretRef {
    /// Short syntax
    Short(String),
    /// Long syntax
    Long(FileReference),
}

impl SecretRef {
    pub fn to_long(&self) -> FileReference {
        match self {
            SecretRef::Short(source) => FileReference::new(source),
            SecretRef::Long(long) => long.clone(),
        }
    }
}

/// Config reference in service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigRef {
    /// Short syntax
    Short(String),
    /// Long syntax
    Long(FileReference),
}

impl ConfigRef {
    pub fn to_long(&self) -> FileReference {
        match self {
            ConfigRef::Short(source) => FileReference::new(source),
            ConfigRef::Long(long) => long.clone(),
        }
    }
}

/// Long secret/config reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    /// Source secret or config name
    pub source: String,
    /// Target path in container
    #[serde(default)]
    pub target: Option<String>,
    /// UID
    #[serde(default)]
    pub uid: Option<String>,
    /// GID
    #[serde(default)]
    pub gid: Option<String>,
    /// Mode
    #[serde(default)]
    pub mode: Option<u32>,
}

impl FileReference {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }
}

/// Secret rendered from the local secret store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensitiveConfig {
    /// Target path in container
    #[serde(default)]
    pub target: Option<String>,
    /// Output format (env, json, raw, template)
    #[serde(default)]
    pub format: Option<String>,
    /// Template file for the template format
    #[serde(default)]
    pub template: Option<String>,
    /// UID
    #[serde(default)]
    pub uid: Option<String>,
    /// GID
    #[serde(default)]
    pub gid: Option<String>,
    /// Mode
    #[serde(default)]
    pub mode: Option<u32>,
    /// Store keys to include
    #[serde(default)]
    pub secrets: Vec<SensitiveSecret>,
}

/// A store key picked into a sensitive secret, optionally renamed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensitiveSecret {
    /// Key in the secret store
    pub source: String,
    /// Key in the rendered output
    #[serde(default)]
    pub name: Option<String>,
}

impl SensitiveSecret {
    pub fn output_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.source)
    }
}

/// Config read from a local file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Path, relative to the project directory
    pub source: String,
    /// Target path in container
    #[serde(default)]
    pub target: Option<String>,
}

/// Top-level maps allow `name:` with no body
fn nullable_map<'de, D, T>(deserializer: D) -> std::result::Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let raw: Option<BTreeMap<String, Option<T>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Scalar::deserialize(deserializer)?.into_string())
}

fn opt_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
}

fn scalar_value_map<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Option<Scalar>> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k, v.map(Scalar::into_string)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_forms() {
        let svc: ServiceConfig = serde_yaml::from_str(
            "environment:\n  - A=1\n  - B\n  - C=x=y\n",
        )
        .unwrap();
        let env = svc.environment_map();
        assert_eq!(env["A"], Some("1".to_string()));
        assert_eq!(env["B"], None);
        assert_eq!(env["C"], Some("x=y".to_string()));

        let svc: ServiceConfig =
            serde_yaml::from_str("environment:\n  PORT: 8080\n  EMPTY:\n").unwrap();
        let env = svc.environment_map();
        assert_eq!(env["PORT"], Some("8080".to_string()));
        assert_eq!(env["EMPTY"], None);
    }

    #[test]
    fn test_short_ports() {
        let ports = PortConfig::Short("127.0.0.1:8080:80/udp".to_string())
            .expand()
            .unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].target, 80);
        assert_eq!(ports[0].published.as_deref(), Some("8080"));
        assert_eq!(ports[0].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(ports[0].protocol.as_deref(), Some("udp"));

        let ranged = PortConfig::Short("9000-9001:90-91".to_string())
            .expand()
            .unwrap();
        assert_eq!(ranged.len(), 2);
        assert_eq!(ranged[1].target, 91);
        assert_eq!(ranged[1].published.as_deref(), Some("9001"));

        assert!(PortConfig::Short("a:b:c:d".to_string()).expand().is_err());
    }

    #[test]
    fn test_short_volumes() {
        let bind = VolumeMount::Short("./data:/data:ro".to_string())
            .normalize()
            .unwrap();
        assert_eq!(bind.mount_type.as_deref(), Some("bind"));
        assert_eq!(bind.read_only, Some(true));

        let named = VolumeMount::Short("db-data:/var/lib/db".to_string())
            .normalize()
            .unwrap();
        assert_eq!(named.mount_type.as_deref(), Some("volume"));
        assert_eq!(named.source.as_deref(), Some("db-data"));

        let anonymous = VolumeMount::Short("/cache".to_string()).normalize().unwrap();
        assert_eq!(anonymous.mount_type.as_deref(), Some("volume"));
        assert!(anonymous.source.is_none());

        assert!(VolumeMount::Short("a:/b:bogus".to_string()).normalize().is_err());
    }

    #[test]
    fn test_shell_words() {
        assert_eq!(
            split_shell_words(r#"sh -c "echo 'hi there'" x\ y"#),
            vec!["sh", "-c", "echo 'hi there'", "x y"]
        );
        assert!(split_shell_words("   ").is_empty());
    }

    #[test]
    fn test_external_names() {
        let net: NetworkConfig = serde_yaml::from_str("external: true\n").unwrap();
        assert!(net.is_external());
        assert_eq!(net.external_name("edge"), "edge");

        let net: NetworkConfig = serde_yaml::from_str("external: true\nname: real-edge\n").unwrap();
        assert_eq!(net.external_name("edge"), "real-edge");

        let legacy: SecretConfig = serde_yaml::from_str("external:\n  name: legacy\n").unwrap();
        assert!(legacy.is_external());
        assert_eq!(legacy.external_name("s"), "legacy");
    }

    #[test]
    fn test_nullable_top_level_maps() {
        let project: Project =
            serde_yaml::from_str("services: {}\nnetworks:\n  front:\nvolumes:\n  data:\n").unwrap();
        assert!(project.networks.contains_key("front"));
        assert!(project.volumes.contains_key("data"));
    }
}
