//! Service conversion

use super::network::is_user_defined_network;
use super::policy::{convert_healthcheck, convert_log_driver, DeployPolicy};
use super::{add_stack_label, scope_name, LABEL_IMAGE};
use crate::cluster::ClusterClient;
use crate::compose::config::{
    FileReference, PortConfigLong, Resource, ServiceConfig, UlimitConfig, VolumeMountLong,
};
use crate::compose::units::{parse_bytes, parse_duration};
use crate::compose::Project;
use crate::error::{Result, StackError};
use crate::swarm::service::{
    BindOptions, ConfigReference, ContainerSpec, DnsConfig, DriverConfig, EndpointSpec,
    FileTarget, Mount, NetworkAttachmentConfig, PortConfig, SecretReference, ServiceSpec,
    TaskSpec, TmpfsOptions, Ulimit, VolumeOptions,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

const DEFAULT_FILE_MODE: u32 = 0o444;

/// Convert every service, keyed by service name
pub async fn convert_services(
    client: &dyn ClusterClient,
    stack: &str,
    project: &Project,
) -> Result<BTreeMap<String, ServiceSpec>> {
    let mut result = BTreeMap::new();
    for (name, service) in &project.services {
        let spec = convert_service(client, stack, project, name, service)
            .await
            .map_err(|e| e.for_service(name))?;
        result.insert(name.clone(), spec);
    }
    Ok(result)
}

/// Convert one service; secret and config IDs are looked up by name
pub async fn convert_service(
    client: &dyn ClusterClient,
    stack: &str,
    project: &Project,
    name: &str,
    service: &ServiceConfig,
) -> Result<ServiceSpec> {
    let image = service.image.clone().unwrap_or_default();

    let deploy_labels = service
        .deploy
        .as_ref()
        .and_then(|d| d.labels.as_ref())
        .map(|l| l.to_map())
        .unwrap_or_default();
    let mut labels = add_stack_label(stack, deploy_labels);
    labels.insert(LABEL_IMAGE.to_string(), image.clone());

    let policy = DeployPolicy::convert(service.deploy.as_ref(), service.restart.as_deref())?;
    let (capability_add, capability_drop) =
        effective_capabilities(&service.cap_add, &service.cap_drop);

    let container_spec = ContainerSpec {
        image,
        labels: add_stack_label(stack, service.label_map()),
        command: service.entrypoint.as_ref().map(|c| c.to_vec()).unwrap_or_default(),
        args: service.command.as_ref().map(|c| c.to_vec()).unwrap_or_default(),
        hostname: service.hostname.clone(),
        env: convert_environment(service),
        dir: service.working_dir.clone(),
        user: service.user.clone(),
        tty: service.tty.unwrap_or(false),
        open_stdin: service.stdin_open.unwrap_or(false),
        read_only: service.read_only.unwrap_or(false),
        mounts: convert_mounts(stack, project, service)?,
        stop_signal: service.stop_signal.clone(),
        stop_grace_period: service
            .stop_grace_period
            .as_deref()
            .map(parse_duration)
            .transpose()?,
        health_check: convert_healthcheck(service.healthcheck.as_ref())?,
        hosts: convert_extra_hosts(&service.extra_hosts)?,
        dns_config: convert_dns_config(&service.dns, &service.dns_search),
        secrets: convert_secret_refs(client, stack, project, service).await?,
        configs: convert_config_refs(client, stack, project, service).await?,
        isolation: service.isolation.clone(),
        init: service.init,
        sysctls: service.sysctls.clone(),
        capability_add,
        capability_drop,
        ulimits: convert_ulimits(&service.ulimits),
    };

    let endpoint_spec = convert_endpoint(&service.ports, policy.endpoint_mode)?;

    Ok(ServiceSpec {
        name: scope_name(stack, name),
        labels,
        task_template: TaskSpec {
            container_spec: Some(container_spec),
            resources: policy.resources,
            restart_policy: policy.restart_policy,
            placement: policy.placement,
            force_update: 0,
            networks: convert_network_attachments(stack, project, name, service),
            log_driver: convert_log_driver(service.logging.as_ref()),
        },
        mode: policy.mode,
        update_config: policy.update_config,
        rollback_config: policy.rollback_config,
        endpoint_spec,
    })
}

/// `KEY=VALUE`, or bare `KEY` when unset, sorted
pub fn convert_environment(service: &ServiceConfig) -> Vec<String> {
    let mut env: Vec<String> = service
        .environment_map()
        .into_iter()
        .map(|(key, value)| match value {
            Some(value) => format!("{}={}", key, value),
            None => key,
        })
        .collect();
    env.sort();
    env
}

/// Upper-case, `CAP_`-prefixed capability sets. `ALL` collapses a set to
/// itself, and a capability in both sets is only added.
pub fn effective_capabilities(add: &[String], drop: &[String]) -> (Vec<String>, Vec<String>) {
    fn normalize(caps: &[String]) -> BTreeSet<String> {
        let set: BTreeSet<String> = caps
            .iter()
            .map(|c| {
                let c = c.trim().to_uppercase();
                if c == "ALL" || c.starts_with("CAP_") {
                    c
                } else {
                    format!("CAP_{}", c)
                }
            })
            .collect();
        if set.contains("ALL") {
            BTreeSet::from(["ALL".to_string()])
        } else {
            set
        }
    }

    let add = normalize(add);
    let drop = normalize(drop);

    let cap_drop = drop.difference(&add).cloned().collect();
    (add.into_iter().collect(), cap_drop)
}

fn convert_ulimits(ulimits: &BTreeMap<String, UlimitConfig>) -> Vec<Ulimit> {
    ulimits
        .iter()
        .map(|(name, limit)| {
            let (soft, hard) = match limit {
                UlimitConfig::Single(value) => (*value, *value),
                UlimitConfig::SoftHard { soft, hard } => (*soft, *hard),
            };
            Ulimit {
                name: name.clone(),
                soft,
                hard,
            }
        })
        .collect()
}

/// `host:ip` / `host=ip` entries to sorted `ip host` lines
fn convert_extra_hosts(extra_hosts: &[String]) -> Result<Vec<String>> {
    let mut hosts = extra_hosts
        .iter()
        .map(|entry| {
            let (host, ip) = entry
                .split_once('=')
                .or_else(|| entry.split_once(':'))
                .ok_or_else(|| {
                    StackError::InvalidConfig(format!("invalid extra host: {:?}", entry))
                })?;
            Ok(format!("{} {}", ip, host))
        })
        .collect::<Result<Vec<_>>>()?;
    hosts.sort();
    Ok(hosts)
}

/// Nameservers that are not IP addresses are dropped
fn convert_dns_config(dns: &[String], search: &[String]) -> Option<DnsConfig> {
    if dns.is_empty() && search.is_empty() {
        return None;
    }

    Some(DnsConfig {
        nameservers: dns
            .iter()
            .filter(|ip| ip.parse::<IpAddr>().is_ok())
            .cloned()
            .collect(),
        search: search.to_vec(),
        options: Vec::new(),
    })
}

fn convert_endpoint(
    ports: &[crate::compose::config::PortConfig],
    endpoint_mode: Option<String>,
) -> Result<Option<EndpointSpec>> {
    if ports.is_empty() && endpoint_mode.is_none() {
        return Ok(None);
    }

    let mut expanded = Vec::new();
    for port in ports {
        expanded.extend(port.expand()?);
    }

    Ok(Some(EndpointSpec {
        mode: endpoint_mode,
        ports: convert_ports(&expanded),
    }))
}

/// Published ports that do not parse become 0; sorted by published, then target
pub fn convert_ports(ports: &[PortConfigLong]) -> Vec<PortConfig> {
    let mut result: Vec<PortConfig> = ports
        .iter()
        .map(|port| PortConfig {
            name: None,
            protocol: port.protocol.clone().unwrap_or_else(|| "tcp".to_string()),
            target_port: port.target,
            published_port: port
                .published
                .as_deref()
                .and_then(|p| p.parse().ok())
                .unwrap_or(0),
            publish_mode: port.mode.clone().unwrap_or_else(|| "ingress".to_string()),
        })
        .collect();

    result.sort_by_key(|p| (p.published_port, p.target_port));
    result
}

/// One attachment per declared network, or `<stack>_default` when none
pub fn convert_network_attachments(
    stack: &str,
    project: &Project,
    name: &str,
    service: &ServiceConfig,
) -> Vec<NetworkAttachmentConfig> {
    let networks = service.network_map();
    if networks.is_empty() {
        return vec![NetworkAttachmentConfig {
            target: scope_name(stack, "default"),
            aliases: vec![name.to_string()],
            driver_opts: BTreeMap::new(),
        }];
    }

    let mut attachments: Vec<NetworkAttachmentConfig> = networks
        .into_iter()
        .map(|(net_name, config)| {
            let target = match project.networks.get(&net_name) {
                Some(net) if net.is_external() => net.external_name(&net_name).to_string(),
                Some(net) => net
                    .explicit_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| scope_name(stack, &net_name)),
                None => scope_name(stack, &net_name),
            };

            let mut aliases = config.aliases;
            if is_user_defined_network(&target) {
                aliases.push(name.to_string());
            }

            NetworkAttachmentConfig {
                target,
                aliases,
                driver_opts: config.driver_opts,
            }
        })
        .collect();

    attachments.sort_by(|a, b| a.target.cmp(&b.target));
    attachments
}

fn resolve_host_path(working_dir: &Path, source: &str) -> String {
    if let Some(rest) = source.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home
                .join(rest.trim_start_matches('/'))
                .to_string_lossy()
                .into_owned();
        }
    }
    let path = PathBuf::from(source);
    if path.is_absolute() {
        source.to_string()
    } else {
        working_dir.join(path).to_string_lossy().into_owned()
    }
}

fn convert_mounts(stack: &str, project: &Project, service: &ServiceConfig) -> Result<Vec<Mount>> {
    service
        .volumes
        .iter()
        .map(|volume| convert_mount(stack, project, &volume.normalize()?))
        .collect()
}

fn convert_mount(stack: &str, project: &Project, volume: &VolumeMountLong) -> Result<Mount> {
    let mount_type = volume.mount_type.clone().unwrap_or_else(|| "volume".to_string());
    let source = volume.source.clone().unwrap_or_default();

    let mut mount = Mount {
        target: volume.target.clone(),
        source: String::new(),
        mount_type: mount_type.clone(),
        read_only: volume.read_only.unwrap_or(false),
        consistency: volume.consistency.clone(),
        ..Default::default()
    };

    match mount_type.as_str() {
        "bind" | "npipe" => {
            if source.is_empty() {
                return Err(StackError::InvalidConfig(format!(
                    "invalid {} source, source cannot be empty",
                    mount_type
                )));
            }
            mount.source = if mount_type == "bind" {
                resolve_host_path(&project.working_dir, &source)
            } else {
                source
            };
            mount.bind_options = volume.bind.as_ref().map(|bind| BindOptions {
                propagation: bind.propagation.clone(),
                create_mountpoint: bind.create_host_path.unwrap_or(false),
            });
        }
        "tmpfs" => {
            if !source.is_empty() {
                return Err(StackError::InvalidConfig(
                    "invalid tmpfs source, source must be empty".to_string(),
                ));
            }
            if let Some(tmpfs) = &volume.tmpfs {
                mount.tmpfs_options = Some(TmpfsOptions {
                    size_bytes: tmpfs.size.as_deref().map(parse_bytes).transpose()?.unwrap_or(0),
                    mode: tmpfs.mode.unwrap_or(0),
                });
            }
        }
        "volume" => {
            let mut options = VolumeOptions {
                no_copy: volume.volume.as_ref().and_then(|v| v.nocopy).unwrap_or(false),
                subpath: volume.volume.as_ref().and_then(|v| v.subpath.clone()),
                ..Default::default()
            };

            if !source.is_empty() {
                let declared = project
                    .volumes
                    .get(&source)
                    .ok_or_else(|| StackError::UndefinedVolume(source.clone()))?;

                if declared.is_external() {
                    mount.source = declared.external_name(&source).to_string();
                } else {
                    mount.source = declared
                        .explicit_name()
                        .map(str::to_string)
                        .unwrap_or_else(|| scope_name(stack, &source));
                    options.labels = add_stack_label(
                        stack,
                        declared.labels.as_ref().map(|l| l.to_map()).unwrap_or_default(),
                    );
                    if declared.driver.is_some() || !declared.driver_opts.is_empty() {
                        options.driver_config = Some(DriverConfig {
                            name: declared.driver.clone().unwrap_or_default(),
                            options: declared.driver_opts.clone(),
                        });
                    }
                }
            }

            if options != VolumeOptions::default() {
                mount.volume_options = Some(options);
            }
        }
        "cluster" => {
            if source.is_empty() {
                return Err(StackError::InvalidConfig(
                    "invalid cluster source, source cannot be empty".to_string(),
                ));
            }
            let declared = project
                .volumes
                .get(&source)
                .ok_or_else(|| StackError::UndefinedVolume(source.clone()))?;
            mount.source = if declared.is_external() {
                declared.external_name(&source).to_string()
            } else {
                scope_name(stack, &source)
            };
        }
        other => {
            return Err(StackError::InvalidConfig(format!(
                "unknown mount type: {}",
                other
            )))
        }
    }

    Ok(mount)
}

/// Cluster name of a referenced secret/config: explicit name, raw name for
/// externals, otherwise scoped
fn referenced_name<R: Resource>(stack: &str, source: &str, resource: &R) -> String {
    if let Some(name) = resource.explicit_name() {
        name.to_string()
    } else if resource.is_external() {
        resource.external_name(source).to_string()
    } else {
        scope_name(stack, source)
    }
}

fn file_target(reference: &FileReference, default_name: String) -> FileTarget {
    FileTarget {
        name: reference
            .target
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or(default_name),
        uid: reference
            .uid
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "0".to_string()),
        gid: reference
            .gid
            .clone()
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| "0".to_string()),
        mode: reference.mode.unwrap_or(DEFAULT_FILE_MODE),
    }
}

async fn convert_secret_refs(
    client: &dyn ClusterClient,
    stack: &str,
    project: &Project,
    service: &ServiceConfig,
) -> Result<Vec<SecretReference>> {
    let mut refs = Vec::new();

    for reference in service.secret_refs() {
        let secret = project.secrets.get(&reference.source).ok_or_else(|| {
            StackError::InvalidConfig(format!("undefined secret {:?}", reference.source))
        })?;

        let secret_name = referenced_name(stack, &reference.source, secret);
        let secret_id = client
            .inspect_secret(&secret_name)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => StackError::SecretNotFound(secret_name.clone()),
                e => e,
            })?
            .id;

        refs.push(SecretReference {
            file: Some(file_target(&reference, reference.source.clone())),
            secret_id,
            secret_name,
        });
    }

    refs.sort_by(|a, b| a.secret_name.cmp(&b.secret_name));
    Ok(refs)
}

async fn convert_config_refs(
    client: &dyn ClusterClient,
    stack: &str,
    project: &Project,
    service: &ServiceConfig,
) -> Result<Vec<ConfigReference>> {
    let mut refs = Vec::new();

    for reference in service.config_refs() {
        let config = project.configs.get(&reference.source).ok_or_else(|| {
            StackError::InvalidConfig(format!("undefined config {:?}", reference.source))
        })?;

        let config_name = referenced_name(stack, &reference.source, config);
        let config_id = client
            .inspect_config(&config_name)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => StackError::ConfigNotFound(config_name.clone()),
                e => e,
            })?
            .id;

        refs.push(ConfigReference {
            file: Some(file_target(&reference, format!("/{}", reference.source))),
            config_id,
            config_name,
        });
    }

    refs.sort_by(|a, b| a.config_name.cmp(&b.config_name));
    Ok(refs)
}
