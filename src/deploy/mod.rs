//! Stack deployment
//!
//! Ties the pieces together: generated secrets and configs are
//! materialized, the project is converted, the cluster is reconciled step
//! by step and, unless detached, the services are watched until they
//! converge.

pub mod reconcile;
pub mod registry;
pub mod wait;

pub use reconcile::ServicePolicy;
pub use registry::{load_registries, RegistryAuth, Registries};
pub use wait::{ConvergenceWaiter, DeployedService};

use crate::cluster::ClusterClient;
use crate::compose::Project;
use crate::convert::{self, scope_name};
use crate::error::{Result, StackError};
use crate::secrets::{self, SecretStore};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default time a single service may take to converge
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// When the orchestrator is asked to resolve image tags to digests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolveImage {
    /// On every create and update
    #[default]
    Always,
    /// On create, and on update when the image reference changed
    Changed,
    /// Never; updates keep the previously resolved image when the
    /// reference is unchanged
    Never,
}

impl FromStr for ResolveImage {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "always" => Ok(ResolveImage::Always),
            "changed" => Ok(ResolveImage::Changed),
            "never" => Ok(ResolveImage::Never),
            other => Err(StackError::InvalidConfig(format!(
                "invalid resolve-image policy {:?}: expected always, changed or never",
                other
            ))),
        }
    }
}

impl fmt::Display for ResolveImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolveImage::Always => "always",
            ResolveImage::Changed => "changed",
            ResolveImage::Never => "never",
        };
        write!(f, "{}", s)
    }
}

/// Deploy options
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Stack namespace
    pub stack: String,
    /// Remove stack services that are no longer in the project
    pub prune: bool,
    pub resolve_image: ResolveImage,
    /// Suppress progress output
    pub quiet: bool,
    /// Return without waiting for convergence
    pub detach: bool,
    /// Per-service convergence timeout; `None` waits forever
    pub timeout: Option<Duration>,
    /// Registry credentials keyed by host
    pub registries: Registries,
    /// Decrypted values for sensitive rules
    pub secrets: SecretStore,
    /// Leave services alone when their spec would not change. The final
    /// spec is compared with the live one as stored, so this only skips
    /// when the cluster keeps specs as submitted; an engine that fills in
    /// server-side defaults always sees a difference and updates.
    pub skip_unchanged: bool,
}

impl DeployOptions {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            prune: false,
            resolve_image: ResolveImage::default(),
            quiet: false,
            detach: false,
            timeout: Some(DEFAULT_TIMEOUT),
            registries: Registries::new(),
            secrets: SecretStore::new(),
            skip_unchanged: false,
        }
    }

    fn service_policy(&self) -> ServicePolicy<'_> {
        ServicePolicy {
            resolve_image: self.resolve_image,
            registries: &self.registries,
            skip_unchanged: self.skip_unchanged,
            quiet: self.quiet,
        }
    }
}

/// Resolves once cancellation has been requested. A dropped sender never
/// cancels.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Deploy `project` as stack `opts.stack`
pub async fn deploy(
    client: &dyn ClusterClient,
    project: Project,
    opts: &DeployOptions,
    mut cancel: watch::Receiver<bool>,
) -> Result<Vec<DeployedService>> {
    if opts.stack.is_empty() {
        return Err(StackError::InvalidConfig("stack name must not be empty".to_string()));
    }

    let deployed = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => {
            return Err(StackError::Cancelled(format!("deploy of stack {}", opts.stack)));
        }
        result = apply(client, project, opts) => result?,
    };

    if opts.detach {
        debug!(stack = %opts.stack, "detached, not waiting for convergence");
        return Ok(deployed);
    }

    ConvergenceWaiter::new(client)
        .with_timeout(opts.timeout)
        .quiet(opts.quiet)
        .wait_all(&deployed, &mut cancel)
        .await?;
    Ok(deployed)
}

/// Everything up to and including the service updates
async fn apply(
    client: &dyn ClusterClient,
    mut project: Project,
    opts: &DeployOptions,
) -> Result<Vec<DeployedService>> {
    let stack = opts.stack.as_str();

    secrets::materialize(&mut project, &opts.secrets)?;

    reconcile::check_manager(client).await?;

    let (networks, externals) = convert::convert_networks(stack, &project);
    let secret_specs = convert::convert_secrets(stack, &project)?;
    let config_specs = convert::convert_configs(stack, &project)?;

    reconcile::validate_external_networks(client, &externals).await?;

    if opts.prune {
        let desired: BTreeSet<String> = project
            .services
            .keys()
            .map(|name| scope_name(stack, name))
            .collect();
        let removed = reconcile::prune_services(client, stack, &desired, opts.quiet).await?;
        debug!(count = removed.len(), "pruned services");
    }

    reconcile::create_networks(client, stack, &networks, opts.quiet).await?;
    reconcile::create_secrets(client, &secret_specs, opts.quiet).await?;
    reconcile::create_configs(client, &config_specs, opts.quiet).await?;

    let services = convert::convert_services(client, stack, &project)
        .await?
        .into_values()
        .map(|spec| (spec.name.clone(), spec))
        .collect();

    let deployed =
        reconcile::deploy_services(client, stack, services, opts.service_policy()).await?;
    if !opts.quiet {
        info!("Deployed {} service(s) to stack {}", deployed.len(), stack);
    }
    Ok(deployed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::Call;
    use crate::cluster::MemoryCluster;
    use crate::compose::ComposeParser;
    use std::path::Path;

    const WEB: &str = r#"
services:
  web:
    image: app:v1
    deploy:
      replicas: 2
"#;

    fn project(yaml: &str, dir: &Path) -> Project {
        let mut project = ComposeParser::parse_str(yaml).unwrap();
        project.working_dir = dir.to_path_buf();
        project
    }

    fn options(resolve_image: ResolveImage) -> DeployOptions {
        DeployOptions {
            resolve_image,
            quiet: true,
            timeout: Some(Duration::from_secs(5)),
            ..DeployOptions::new("demo")
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // a dropped sender never cancels
        drop(tx);
        rx
    }

    #[tokio::test]
    async fn test_first_deploy_then_redeploy_reuses_image() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        let opts = options(ResolveImage::Never);

        let first = deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel())
            .await
            .unwrap();
        assert_eq!(first[0].name, "demo_web");
        assert!(cluster
            .calls()
            .unwrap()
            .contains(&Call::CreateNetwork("demo_default".to_string())));

        cluster.clear_calls().unwrap();
        let second = deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel())
            .await
            .unwrap();
        assert_eq!(first, second);

        let calls = cluster.calls().unwrap();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::UpdateService { spec, options } => {
                assert!(!options.query_registry);
                let container = spec.task_template.container_spec.as_ref().unwrap();
                assert_eq!(container.image, "app:v1");
            }
            other => panic!("expected a service update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redeploy_specs_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        let opts = options(ResolveImage::Never);

        deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel()).await.unwrap();
        let created = match cluster.calls().unwrap().pop() {
            Some(Call::CreateService { spec, .. }) => spec,
            other => panic!("expected a service create, got {:?}", other),
        };

        deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel()).await.unwrap();
        let updated = match cluster.calls().unwrap().pop() {
            Some(Call::UpdateService { spec, .. }) => spec,
            other => panic!("expected a service update, got {:?}", other),
        };
        assert_eq!(
            serde_json::to_string(&created).unwrap(),
            serde_json::to_string(&updated).unwrap()
        );
    }

    #[tokio::test]
    async fn test_skip_unchanged_issues_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        let opts = DeployOptions {
            skip_unchanged: true,
            ..options(ResolveImage::Changed)
        };

        deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel()).await.unwrap();
        cluster.clear_calls().unwrap();
        deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel()).await.unwrap();

        assert!(!cluster.calls().unwrap().iter().any(Call::is_service_update));
    }

    #[tokio::test]
    async fn test_missing_external_network_aborts_before_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        let yaml = r#"
services:
  web:
    image: app:v1
    networks: [edge]
networks:
  edge:
    external: true
secrets:
  token:
    content: abc
"#;

        let err = deploy(&cluster, project(yaml, dir.path()), &options(ResolveImage::Never), no_cancel())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("\"edge\""));
        assert!(cluster.calls().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_node_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::worker();

        let err = deploy(&cluster, project(WEB, dir.path()), &options(ResolveImage::Never), no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::NotSwarmManager));
        assert!(cluster.calls().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_removes_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        let two = r#"
services:
  web:
    image: app:v1
  worker:
    image: app:v1
"#;
        deploy(&cluster, project(two, dir.path()), &options(ResolveImage::Never), no_cancel())
            .await
            .unwrap();

        let opts = DeployOptions {
            prune: true,
            ..options(ResolveImage::Never)
        };
        deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel()).await.unwrap();

        assert!(cluster
            .calls()
            .unwrap()
            .contains(&Call::RemoveService("demo_worker".to_string())));
        assert!(cluster.service("demo_worker").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sensitive_secret_is_materialized_and_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        let yaml = r#"
services:
  web:
    image: app:v1
    sensitive:
      app:
        target: /run/secrets/app.env
        secrets:
          - source: DB_PASSWORD
"#;
        let mut opts = options(ResolveImage::Never);
        opts.secrets = [("DB_PASSWORD".to_string(), "hunter2".to_string())]
            .into_iter()
            .collect();

        deploy(&cluster, project(yaml, dir.path()), &opts, no_cancel()).await.unwrap();

        let name = secrets::hashed_name("app", b"DB_PASSWORD=hunter2\n");
        let secret = cluster.inspect_secret(&scope_name("demo", &name)).await.unwrap();

        let web = cluster.service("demo_web").unwrap().unwrap();
        let refs = &web.spec.task_template.container_spec.unwrap().secrets;
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].secret_id, secret.id);
        assert_eq!(refs[0].file.as_ref().unwrap().name, "/run/secrets/app.env");
    }

    #[tokio::test]
    async fn test_stalled_service_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        cluster.stall("demo_web").unwrap();
        let opts = DeployOptions {
            timeout: Some(Duration::from_millis(1500)),
            ..options(ResolveImage::Never)
        };

        let err = deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::ConvergenceTimeout(ref name) if name == "demo_web"));
    }

    #[tokio::test]
    async fn test_detach_skips_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        cluster.stall("demo_web").unwrap();
        let opts = DeployOptions {
            detach: true,
            ..options(ResolveImage::Never)
        };

        let deployed = deploy(&cluster, project(WEB, dir.path()), &opts, no_cancel())
            .await
            .unwrap();
        assert_eq!(deployed.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MemoryCluster::new();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = deploy(&cluster, project(WEB, dir.path()), &options(ResolveImage::Never), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, StackError::Cancelled(_)));
    }

    #[test]
    fn test_resolve_image_parse() {
        assert_eq!("changed".parse::<ResolveImage>().unwrap(), ResolveImage::Changed);
        assert_eq!(ResolveImage::Never.to_string(), "never");
        assert!("sometimes".parse::<ResolveImage>().is_err());
    }
}
