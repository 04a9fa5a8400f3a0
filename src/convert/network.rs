//! Stack networks

use super::{add_stack_label, scope_name, DEFAULT_NETWORK_DRIVER};
use crate::compose::config::{NetworkConfig, Resource};
use crate::compose::Project;
use crate::swarm::network::{Ipam, IpamPool, NetworkCreate};
use std::collections::{BTreeMap, BTreeSet};

/// Names of the networks at least one service joins; a service without
/// networks joins `default`
pub fn service_networks(project: &Project) -> BTreeSet<String> {
    let mut used = BTreeSet::new();
    for service in project.services.values() {
        let networks = service.network_map();
        if networks.is_empty() {
            used.insert("default".to_string());
        }
        used.extend(networks.into_keys());
    }
    used
}

/// Network create requests keyed by cluster name, plus the names of the
/// external networks that must already exist
pub fn convert_networks(
    stack: &str,
    project: &Project,
) -> (BTreeMap<String, NetworkCreate>, Vec<String>) {
    let synthesized = NetworkConfig::default();
    let mut result = BTreeMap::new();
    let mut externals = Vec::new();

    for name in service_networks(project) {
        let net = match project.networks.get(&name) {
            Some(net) => net,
            None if name == "default" => &synthesized,
            None => continue,
        };

        if net.is_external() {
            externals.push(net.external_name(&name).to_string());
            continue;
        }

        let net_name = match net.explicit_name() {
            Some(explicit) => explicit.to_string(),
            None => scope_name(stack, &name),
        };

        let labels = net.labels.as_ref().map(|l| l.to_map()).unwrap_or_default();
        let driver = net
            .driver
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_NETWORK_DRIVER.to_string());

        let ipam = net.ipam.as_ref().map(|ipam| Ipam {
            driver: ipam.driver.clone().unwrap_or_default(),
            config: ipam
                .config
                .iter()
                .map(|pool| IpamPool {
                    subnet: pool.subnet.clone().unwrap_or_default(),
                    ip_range: pool.ip_range.clone().unwrap_or_default(),
                    gateway: pool.gateway.clone().unwrap_or_default(),
                    auxiliary_addresses: pool.aux_addresses.clone(),
                })
                .collect(),
        });

        result.insert(
            net_name.clone(),
            NetworkCreate {
                name: net_name,
                driver,
                options: net.driver_opts.clone(),
                labels: add_stack_label(stack, labels),
                internal: net.internal,
                attachable: net.attachable,
                ipam,
            },
        );
    }

    externals.sort();
    externals.dedup();
    (result, externals)
}

/// Whether a network mode names a user-defined network rather than one of
/// the engine's built-in modes
pub fn is_user_defined_network(name: &str) -> bool {
    !matches!(name, "default" | "bridge" | "host" | "none") && !name.starts_with("container:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ComposeParser;
    use crate::convert::LABEL_NAMESPACE;

    #[test]
    fn test_only_used_networks_converted() {
        let project = ComposeParser::parse_str(
            r#"
services:
  web:
    image: a
    networks: [front, edge]
  worker:
    image: b
networks:
  front:
    driver_opts:
      encrypted: "true"
    ipam:
      config:
        - subnet: 10.0.9.0/24
  unused: {}
  edge:
    external: true
"#,
        )
        .unwrap();

        let (networks, externals) = convert_networks("demo", &project);

        assert_eq!(
            networks.keys().cloned().collect::<Vec<_>>(),
            vec!["demo_default".to_string(), "demo_front".to_string()]
        );
        assert_eq!(externals, vec!["edge".to_string()]);

        let front = &networks["demo_front"];
        assert_eq!(front.driver, "overlay");
        assert_eq!(front.labels[LABEL_NAMESPACE], "demo");
        assert_eq!(front.options["encrypted"], "true");
        assert_eq!(front.ipam.as_ref().unwrap().config[0].subnet, "10.0.9.0/24");
    }

    #[test]
    fn test_explicit_names() {
        let project = ComposeParser::parse_str(
            r#"
services:
  web:
    image: a
    networks: [back, shared]
networks:
  back:
    name: legacy-back
    driver: weave
  shared:
    external:
      name: shared-net
"#,
        )
        .unwrap();

        let (networks, externals) = convert_networks("demo", &project);
        assert_eq!(networks["legacy-back"].driver, "weave");
        assert_eq!(externals, vec!["shared-net".to_string()]);
    }

    #[test]
    fn test_user_defined() {
        assert!(is_user_defined_network("demo_front"));
        assert!(!is_user_defined_network("host"));
        assert!(!is_user_defined_network("container:abc"));
    }
}
