//! Reconciliation steps
//!
//! Each step compares desired objects with what the cluster already holds
//! under the stack namespace and issues the creates and updates needed.

use super::registry::{encoded_auth, Registries};
use super::wait::DeployedService;
use super::ResolveImage;
use crate::cluster::{ClusterClient, ListFilter, ServiceOptions};
use crate::convert::{is_user_defined_network, LABEL_IMAGE};
use crate::error::{MultiError, Result, StackError};
use crate::swarm::{ConfigSpec, NetworkCreate, SecretSpec, Service, ServiceSpec};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Fail unless the node can perform control-plane operations
pub async fn check_manager(client: &dyn ClusterClient) -> Result<()> {
    if client.is_manager().await? {
        Ok(())
    } else {
        Err(StackError::NotSwarmManager)
    }
}

/// Every user-defined external network must exist with swarm scope
pub async fn validate_external_networks(
    client: &dyn ClusterClient,
    externals: &[String],
) -> Result<()> {
    for name in externals {
        if !is_user_defined_network(name) {
            continue;
        }

        let network = match client.inspect_network(name).await {
            Ok(network) => network,
            Err(e) if e.is_not_found() => {
                return Err(StackError::ExternalNetworkNotFound(name.clone()))
            }
            Err(e) => return Err(e),
        };

        if network.scope != "swarm" {
            return Err(StackError::ExternalNetworkScope {
                name: name.clone(),
                scope: network.scope,
            });
        }
    }
    Ok(())
}

/// Create stack networks that do not exist yet; existing ones are left alone
pub async fn create_networks(
    client: &dyn ClusterClient,
    stack: &str,
    networks: &BTreeMap<String, NetworkCreate>,
    quiet: bool,
) -> Result<()> {
    let existing: BTreeSet<String> = client
        .list_networks(&ListFilter::stack(stack))
        .await?
        .into_iter()
        .map(|n| n.name)
        .collect();

    for (name, create) in networks {
        if existing.contains(name) {
            debug!(network = %name, "network exists");
            continue;
        }

        if !quiet {
            info!("Creating network {}", name);
        }
        client.create_network(create).await.map_err(|e| {
            StackError::Engine(format!("failed to create network {}: {}", name, e))
        })?;
    }
    Ok(())
}

/// Update secrets that exist, create the rest
pub async fn create_secrets(client: &dyn ClusterClient, secrets: &[SecretSpec], quiet: bool) -> Result<()> {
    for spec in secrets {
        match client.inspect_secret(&spec.name).await {
            Ok(secret) => {
                if !quiet {
                    info!("Updating secret {}", spec.name);
                }
                client.update_secret(&secret.id, secret.version, spec).await?;
            }
            Err(e) if e.is_not_found() => {
                if !quiet {
                    info!("Creating secret {}", spec.name);
                }
                client.create_secret(spec).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Update configs that exist, create the rest
pub async fn create_configs(client: &dyn ClusterClient, configs: &[ConfigSpec], quiet: bool) -> Result<()> {
    for spec in configs {
        match client.inspect_config(&spec.name).await {
            Ok(config) => {
                if !quiet {
                    info!("Updating config {}", spec.name);
                }
                client.update_config(&config.id, config.version, spec).await?;
            }
            Err(e) if e.is_not_found() => {
                if !quiet {
                    info!("Creating config {}", spec.name);
                }
                client.create_config(spec).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove stack services that are no longer desired. Every removal is
/// attempted; failures are reported together afterwards.
pub async fn prune_services(
    client: &dyn ClusterClient,
    stack: &str,
    desired: &BTreeSet<String>,
    quiet: bool,
) -> Result<Vec<String>> {
    let services = client.list_services(&ListFilter::stack(stack)).await?;

    let mut removed = Vec::new();
    let mut errors = MultiError::new();
    for service in services {
        if desired.contains(&service.spec.name) {
            continue;
        }

        if !quiet {
            info!("Removing service {}", service.spec.name);
        }
        match client.remove_service(&service.id).await {
            Ok(()) => removed.push(service.spec.name),
            Err(e) => errors.push(e.for_service(service.spec.name)),
        }
    }

    errors.into_result().map_err(StackError::Prune)?;
    Ok(removed)
}

/// How service create and update calls are made
#[derive(Debug, Clone, Copy)]
pub struct ServicePolicy<'a> {
    pub resolve_image: ResolveImage,
    pub registries: &'a Registries,
    pub skip_unchanged: bool,
    pub quiet: bool,
}

/// Create or update every desired service, keyed by cluster name
pub async fn deploy_services(
    client: &dyn ClusterClient,
    stack: &str,
    services: BTreeMap<String, ServiceSpec>,
    policy: ServicePolicy<'_>,
) -> Result<Vec<DeployedService>> {
    let mut existing: HashMap<String, Service> = client
        .list_services(&ListFilter::stack(stack))
        .await?
        .into_iter()
        .map(|s| (s.spec.name.clone(), s))
        .collect();

    let mut deployed = Vec::with_capacity(services.len());
    for (name, spec) in services {
        let id = match existing.remove(&name) {
            Some(current) => update_service(client, spec, &current, policy).await?,
            None => create_service(client, spec, policy).await?,
        };
        deployed.push(DeployedService { name, id });
    }
    Ok(deployed)
}

fn logical_image(spec: &ServiceSpec) -> &str {
    spec.task_template
        .container_spec
        .as_ref()
        .map(|c| c.image.as_str())
        .unwrap_or_default()
}

async fn create_service(
    client: &dyn ClusterClient,
    spec: ServiceSpec,
    policy: ServicePolicy<'_>,
) -> Result<String> {
    let options = ServiceOptions {
        encoded_registry_auth: encoded_auth(logical_image(&spec), policy.registries),
        query_registry: policy.resolve_image != ResolveImage::Never,
    };

    if !policy.quiet {
        info!("Creating service {}", spec.name);
    }
    client
        .create_service(&spec, &options)
        .await
        .map_err(|e| e.for_service(&spec.name))
}

async fn update_service(
    client: &dyn ClusterClient,
    mut spec: ServiceSpec,
    current: &Service,
    policy: ServicePolicy<'_>,
) -> Result<String> {
    let image = logical_image(&spec).to_string();
    let deployed_image = current.spec.labels.get(LABEL_IMAGE).map(String::as_str);

    let query_registry = match policy.resolve_image {
        ResolveImage::Always => true,
        ResolveImage::Changed if deployed_image != Some(image.as_str()) => true,
        ResolveImage::Changed => {
            reuse_resolved_image(&mut spec, current);
            false
        }
        ResolveImage::Never => {
            if deployed_image == Some(image.as_str()) {
                reuse_resolved_image(&mut spec, current);
            }
            false
        }
    };
    spec.task_template.force_update = current.spec.task_template.force_update;

    if policy.skip_unchanged && !query_registry && spec == current.spec {
        debug!(service = %spec.name, "service unchanged");
        return Ok(current.id.clone());
    }

    let options = ServiceOptions {
        encoded_registry_auth: encoded_auth(&image, policy.registries),
        query_registry,
    };

    if !policy.quiet {
        info!("Updating service {}", spec.name);
    }
    client
        .update_service(&current.id, current.version, &spec, &options)
        .await
        .map_err(|e| e.for_service(&spec.name))?;
    Ok(current.id.clone())
}

/// Keep the image the orchestrator resolved last time, and the platforms
/// that came with it
fn reuse_resolved_image(spec: &mut ServiceSpec, current: &Service) {
    if let (Some(container), Some(image)) =
        (spec.task_template.container_spec.as_mut(), current.image())
    {
        container.image = image.to_string();
    }

    let platforms = current
        .spec
        .task_template
        .placement
        .as_ref()
        .map(|p| p.platforms.clone())
        .unwrap_or_default();
    if !platforms.is_empty() {
        spec.task_template
            .placement
            .get_or_insert_with(Default::default)
            .platforms = platforms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::Call;
    use crate::cluster::MemoryCluster;
    use crate::convert::add_stack_label;
    use crate::deploy::registry::RegistryAuth;
    use crate::swarm::service::{ContainerSpec, TaskSpec};

    fn spec(name: &str, image: &str) -> ServiceSpec {
        let mut labels = add_stack_label("demo", BTreeMap::new());
        labels.insert(LABEL_IMAGE.to_string(), image.to_string());
        ServiceSpec {
            name: name.to_string(),
            labels,
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

    fn desired(name: &str, image: &str) -> BTreeMap<String, ServiceSpec> {
        let mut services = BTreeMap::new();
        services.insert(name.to_string(), spec(name, image));
        services
    }

    fn policy(resolve_image: ResolveImage, registries: &Registries) -> ServicePolicy<'_> {
        ServicePolicy {
            resolve_image,
            registries,
            skip_unchanged: false,
            quiet: true,
        }
    }

    fn last_update(cluster: &MemoryCluster) -> (ServiceSpec, ServiceOptions) {
        match cluster.calls().unwrap().pop() {
            Some(Call::UpdateService { spec, options }) => (spec, options),
            other => panic!("expected a service update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_changed_policy_reuses_resolved_image() {
        let cluster = MemoryCluster::new();
        let registries = Registries::new();
        let p = policy(ResolveImage::Changed, &registries);

        deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), p).await.unwrap();
        let resolved = cluster.service("demo_web").unwrap().unwrap();
        let pinned = resolved.image().unwrap().to_string();
        assert!(pinned.starts_with("app:v1@sha256:"));

        // same logical image: no registry query, pinned image kept
        deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), p).await.unwrap();
        let (spec, options) = last_update(&cluster);
        assert!(!options.query_registry);
        assert_eq!(spec.task_template.container_spec.unwrap().image, pinned);

        // new logical image: resolve again
        deploy_services(&cluster, "demo", desired("demo_web", "app:v2"), p).await.unwrap();
        let (spec, options) = last_update(&cluster);
        assert!(options.query_registry);
        assert_eq!(spec.task_template.container_spec.unwrap().image, "app:v2");
    }

    #[tokio::test]
    async fn test_changed_policy_queries_registry_on_create() {
        let cluster = MemoryCluster::new();
        let registries = Registries::new();

        deploy_services(
            &cluster,
            "demo",
            desired("demo_web", "app:v1"),
            policy(ResolveImage::Changed, &registries),
        )
        .await
        .unwrap();

        match cluster.calls().unwrap().pop() {
            Some(Call::CreateService { options, .. }) => assert!(options.query_registry),
            other => panic!("expected a service create, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_never_policy_drops_pin_when_image_changes() {
        let cluster = MemoryCluster::new();
        let registries = Registries::new();

        // resolved once, so the live service carries a pinned digest
        deploy_services(
            &cluster,
            "demo",
            desired("demo_web", "app:v1"),
            policy(ResolveImage::Always, &registries),
        )
        .await
        .unwrap();
        let pinned = cluster.service("demo_web").unwrap().unwrap().image().unwrap().to_string();

        let never = policy(ResolveImage::Never, &registries);

        deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), never).await.unwrap();
        let (spec, options) = last_update(&cluster);
        assert!(!options.query_registry);
        assert_eq!(spec.task_template.container_spec.unwrap().image, pinned);

        deploy_services(&cluster, "demo", desired("demo_web", "app:v2"), never).await.unwrap();
        let (spec, options) = last_update(&cluster);
        assert!(!options.query_registry);
        assert_eq!(spec.task_template.container_spec.unwrap().image, "app:v2");
    }

    #[tokio::test]
    async fn test_always_policy_queries_registry() {
        let cluster = MemoryCluster::new();
        let registries = Registries::new();
        let p = policy(ResolveImage::Always, &registries);

        deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), p).await.unwrap();
        deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), p).await.unwrap();
        let (spec, options) = last_update(&cluster);
        assert!(options.query_registry);
        assert_eq!(spec.task_template.container_spec.unwrap().image, "app:v1");
    }

    #[tokio::test]
    async fn test_force_update_carried_forward() {
        let cluster = MemoryCluster::new();
        let registries = Registries::new();
        let p = policy(ResolveImage::Never, &registries);

        let mut bumped = spec("demo_web", "app:v1");
        bumped.task_template.force_update = 7;
        cluster
            .create_service(&bumped, &ServiceOptions::default())
            .await
            .unwrap();

        deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), p).await.unwrap();
        let (spec, _) = last_update(&cluster);
        assert_eq!(spec.task_template.force_update, 7);
    }

    #[tokio::test]
    async fn test_skip_unchanged() {
        let cluster = MemoryCluster::new();
        let registries = Registries::new();
        let p = ServicePolicy {
            skip_unchanged: true,
            ..policy(ResolveImage::Changed, &registries)
        };

        let first = deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), p).await.unwrap();
        cluster.clear_calls().unwrap();

        let second = deploy_services(&cluster, "demo", desired("demo_web", "app:v1"), p).await.unwrap();
        assert_eq!(first, second);
        assert!(cluster.calls().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_auth_attached() {
        let cluster = MemoryCluster::new();
        let mut registries = Registries::new();
        registries.insert(
            "ghcr.io".to_string(),
            RegistryAuth {
                username: "bot".to_string(),
                ..Default::default()
            },
        );

        deploy_services(
            &cluster,
            "demo",
            desired("demo_web", "ghcr.io/acme/app:v1"),
            policy(ResolveImage::Never, &registries),
        )
        .await
        .unwrap();

        match cluster.calls().unwrap().pop() {
            Some(Call::CreateService { options, .. }) => {
                assert!(options.encoded_registry_auth.is_some());
                assert!(!options.query_registry);
            }
            other => panic!("expected a service create, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prune_collects_failures() {
        let cluster = MemoryCluster::new();
        let options = ServiceOptions::default();
        for name in ["demo_web", "demo_old", "demo_stuck", "demo_broken"] {
            cluster.create_service(&spec(name, "app:v1"), &options).await.unwrap();
        }
        cluster.fail_removal("demo_stuck").unwrap();
        cluster.fail_removal("demo_broken").unwrap();

        let desired: BTreeSet<String> = ["demo_web".to_string()].into_iter().collect();
        let err = prune_services(&cluster, "demo", &desired, true).await.unwrap_err();

        match err {
            StackError::Prune(errors) => {
                assert_eq!(errors.len(), 2);
                let message = errors.to_string();
                assert!(message.contains("demo_stuck"));
                assert!(message.contains("demo_broken"));
            }
            other => panic!("expected prune error, got {:?}", other),
        }
        // the healthy orphan was still removed
        assert!(cluster.service("demo_old").unwrap().is_none());
        assert!(cluster.service("demo_web").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_external_network_checks() {
        let cluster = MemoryCluster::new();
        cluster.add_network("edge", "swarm").unwrap();
        cluster.add_network("local-only", "local").unwrap();

        validate_external_networks(&cluster, &["edge".to_string(), "host".to_string()])
            .await
            .unwrap();

        let err = validate_external_networks(&cluster, &["missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::ExternalNetworkNotFound(ref n) if n == "missing"));

        let err = validate_external_networks(&cluster, &["local-only".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("\"local\" instead of \"swarm\""));
    }

    #[tokio::test]
    async fn test_secrets_created_then_updated() {
        let cluster = MemoryCluster::new();
        let mut spec = SecretSpec::new("demo_db", b"pw");
        spec.labels = add_stack_label("demo", BTreeMap::new());

        create_secrets(&cluster, &[spec.clone()], true).await.unwrap();
        spec.labels.insert("rev".to_string(), "2".to_string());
        create_secrets(&cluster, &[spec], true).await.unwrap();

        assert_eq!(
            cluster.calls().unwrap(),
            vec![
                Call::CreateSecret("demo_db".to_string()),
                Call::UpdateSecret("demo_db".to_string())
            ]
        );
        let stored = cluster.inspect_secret("demo_db").await.unwrap();
        assert_eq!(stored.version.index, 2);
    }

    #[tokio::test]
    async fn test_worker_node_rejected() {
        let err = check_manager(&MemoryCluster::worker()).await.unwrap_err();
        assert!(err.to_string().contains("not a swarm manager"));
    }
}
