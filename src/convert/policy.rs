//! Deploy policies: restart, mode, update, resources, placement, health

use crate::compose::config::{
    DeployConfig, HealthcheckConfig, LoggingConfig, PlacementConfig, ResourcesConfig,
    RestartPolicyConfig, UpdateConfig as ComposeUpdateConfig,
};
use crate::compose::units::{opt_duration, parse_bytes, parse_nano_cpus};
use crate::error::{Result, StackError};
use crate::swarm::service::{
    DiscreteResourceSpec, GenericResource, HealthConfig, Limit, LogDriver, Placement,
    PlacementPreference, ResourceRequirements, Resources, RestartPolicy, ServiceMode,
    SpreadOver, UpdateConfig,
};

/// Restart policy from the structured `deploy.restart_policy` block, falling
/// back to the `condition[:max-attempts]` shorthand
pub fn convert_restart_policy(
    restart: Option<&str>,
    source: Option<&RestartPolicyConfig>,
) -> Result<Option<RestartPolicy>> {
    if let Some(source) = source {
        return Ok(Some(RestartPolicy {
            condition: source.condition.clone().unwrap_or_default(),
            delay: opt_duration(source.delay.as_deref())?,
            max_attempts: source.max_attempts,
            window: opt_duration(source.window.as_deref())?,
        }));
    }

    let restart = restart.unwrap_or_default();
    if restart.is_empty() || restart == "no" {
        return Ok(None);
    }

    let (name, max_retries) = match restart.split_once(':') {
        Some((name, max)) => (name, max),
        None => (restart, ""),
    };

    let max_attempts = if max_retries.is_empty() {
        None
    } else {
        Some(max_retries.parse::<u64>().map_err(|_| {
            StackError::InvalidConfig(format!("invalid restart policy: {}", restart))
        })?)
    };

    match name {
        "always" | "unless-stopped" => Ok(Some(RestartPolicy {
            condition: "any".to_string(),
            ..Default::default()
        })),
        "on-failure" => Ok(Some(RestartPolicy {
            condition: "on-failure".to_string(),
            max_attempts,
            ..Default::default()
        })),
        _ => Err(StackError::InvalidConfig(format!(
            "unknown restart policy: {}",
            restart
        ))),
    }
}

/// Service mode from `deploy.mode` and `deploy.replicas`
pub fn convert_deploy_mode(mode: Option<&str>, replicas: Option<u64>) -> Result<ServiceMode> {
    let global_with_replicas = || {
        StackError::InvalidConfig(
            "replicas can only be used with replicated or replicated-job mode".to_string(),
        )
    };

    match mode.unwrap_or_default() {
        "global-job" => match replicas {
            Some(_) => Err(global_with_replicas()),
            None => Ok(ServiceMode::GlobalJob {}),
        },
        "global" => match replicas {
            Some(_) => Err(global_with_replicas()),
            None => Ok(ServiceMode::Global {}),
        },
        "replicated-job" => Ok(ServiceMode::ReplicatedJob {
            max_concurrent: replicas,
            total_completions: replicas,
        }),
        "replicated" | "" => Ok(ServiceMode::Replicated { replicas }),
        other => Err(StackError::InvalidConfig(format!("unknown mode: {}", other))),
    }
}

/// Health check; `disable` alone yields `["NONE"]`
pub fn convert_healthcheck(healthcheck: Option<&HealthcheckConfig>) -> Result<Option<HealthConfig>> {
    let healthcheck = match healthcheck {
        Some(h) => h,
        None => return Ok(None),
    };

    let test = healthcheck
        .test
        .as_ref()
        .map(|t| t.to_vec())
        .unwrap_or_default();

    if healthcheck.disable {
        if !test.is_empty() {
            return Err(StackError::InvalidConfig(
                "test and disable can't be set at the same time".to_string(),
            ));
        }
        return Ok(Some(HealthConfig {
            test: vec!["NONE".to_string()],
            ..Default::default()
        }));
    }

    Ok(Some(HealthConfig {
        test,
        interval: opt_duration(healthcheck.interval.as_deref())?.unwrap_or(0),
        timeout: opt_duration(healthcheck.timeout.as_deref())?.unwrap_or(0),
        retries: healthcheck.retries.unwrap_or(0),
        start_period: opt_duration(healthcheck.start_period.as_deref())?.unwrap_or(0),
        start_interval: opt_duration(healthcheck.start_interval.as_deref())?.unwrap_or(0),
    }))
}

/// Update or rollback config; parallelism defaults to 1
pub fn convert_update_config(source: Option<&ComposeUpdateConfig>) -> Result<Option<UpdateConfig>> {
    let source = match source {
        Some(s) => s,
        None => return Ok(None),
    };

    Ok(Some(UpdateConfig {
        parallelism: source.parallelism.unwrap_or(1),
        delay: opt_duration(source.delay.as_deref())?.unwrap_or(0),
        failure_action: source.failure_action.clone(),
        monitor: opt_duration(source.monitor.as_deref())?.unwrap_or(0),
        max_failure_ratio: source.max_failure_ratio.unwrap_or(0.0),
        order: source.order.clone(),
    }))
}

fn opt_nano_cpus(cpus: Option<&str>) -> Result<i64> {
    cpus.map(parse_nano_cpus).transpose().map(Option::unwrap_or_default)
}

fn opt_bytes(memory: Option<&str>) -> Result<i64> {
    memory.map(parse_bytes).transpose().map(Option::unwrap_or_default)
}

/// Limits and reservations
pub fn convert_resources(source: Option<&ResourcesConfig>) -> Result<ResourceRequirements> {
    let source = match source {
        Some(s) => s,
        None => return Ok(ResourceRequirements::default()),
    };

    let limits = source
        .limits
        .as_ref()
        .map(|limits| -> Result<Limit> {
            Ok(Limit {
                nano_cpus: opt_nano_cpus(limits.cpus.as_deref())?,
                memory_bytes: opt_bytes(limits.memory.as_deref())?,
                pids: limits.pids.unwrap_or(0),
            })
        })
        .transpose()?;

    let reservations = source
        .reservations
        .as_ref()
        .map(|res| -> Result<Resources> {
            Ok(Resources {
                nano_cpus: opt_nano_cpus(res.cpus.as_deref())?,
                memory_bytes: opt_bytes(res.memory.as_deref())?,
                generic_resources: res
                    .generic_resources
                    .iter()
                    .map(|g| GenericResource {
                        discrete_resource_spec: g.discrete_resource_spec.as_ref().map(|d| {
                            DiscreteResourceSpec {
                                kind: d.kind.clone(),
                                value: d.value,
                            }
                        }),
                    })
                    .collect(),
            })
        })
        .transpose()?;

    Ok(ResourceRequirements {
        limits,
        reservations,
    })
}

pub fn convert_placement(source: Option<&PlacementConfig>) -> Placement {
    let source = match source {
        Some(s) => s,
        None => return Placement::default(),
    };

    Placement {
        constraints: source.constraints.clone(),
        preferences: source
            .preferences
            .iter()
            .map(|pref| PlacementPreference {
                spread: Some(SpreadOver {
                    spread_descriptor: pref.spread.clone(),
                }),
            })
            .collect(),
        max_replicas: source.max_replicas_per_node.unwrap_or(0),
        platforms: Vec::new(),
    }
}

pub fn convert_log_driver(logging: Option<&LoggingConfig>) -> Option<LogDriver> {
    logging.map(|logging| LogDriver {
        name: logging.driver.clone().unwrap_or_default(),
        options: logging.options.clone(),
    })
}

/// Everything derived from the `deploy` block
#[derive(Debug, Default)]
pub struct DeployPolicy {
    pub mode: Option<ServiceMode>,
    pub restart_policy: Option<RestartPolicy>,
    pub resources: Option<ResourceRequirements>,
    pub placement: Option<Placement>,
    pub update_config: Option<UpdateConfig>,
    pub rollback_config: Option<UpdateConfig>,
    pub endpoint_mode: Option<String>,
}

impl DeployPolicy {
    pub fn convert(deploy: Option<&DeployConfig>, restart: Option<&str>) -> Result<Self> {
        let deploy = match deploy {
            Some(d) => d,
            None => {
                return Ok(Self {
                    mode: Some(ServiceMode::Replicated { replicas: None }),
                    restart_policy: convert_restart_policy(restart, None)?,
                    ..Default::default()
                })
            }
        };

        Ok(Self {
            mode: Some(convert_deploy_mode(deploy.mode.as_deref(), deploy.replicas)?),
            restart_policy: convert_restart_policy(restart, deploy.restart_policy.as_ref())?,
            resources: Some(convert_resources(deploy.resources.as_ref())?),
            placement: Some(convert_placement(deploy.placement.as_ref())),
            update_config: convert_update_config(deploy.update_config.as_ref())?,
            rollback_config: convert_update_config(deploy.rollback_config.as_ref())?,
            endpoint_mode: deploy
                .endpoint_mode
                .as_ref()
                .filter(|m| !m.is_empty())
                .map(|m| m.to_lowercase()),
        })
    }
}
