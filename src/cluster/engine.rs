//! Docker Engine API client
//!
//! Talks plain HTTP to a daemon listening on TCP (`tcp://host:2375` or an
//! `http(s)://` URL).

use super::{ClusterClient, ListFilter, ServiceOptions};
use crate::error::{Result, StackError};
use crate::swarm::service::Platform;
use crate::swarm::{
    Config, ConfigSpec, NetworkCreate, NetworkSummary, ObjectVersion, Secret, SecretSpec,
    Service, ServiceSpec,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Engine API version requests are pinned to
pub const API_VERSION: &str = "v1.41";

/// Default daemon address
pub const DEFAULT_HOST: &str = "tcp://localhost:2375";

const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct IdResponse {
    #[serde(rename = "ID", alias = "Id")]
    id: String,
    #[serde(deserialize_with = "crate::swarm::nullable")]
    warnings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct UpdateResponse {
    #[serde(deserialize_with = "crate::swarm::nullable")]
    warnings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SystemInfo {
    swarm: SwarmInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SwarmInfo {
    control_available: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DistributionInspect {
    descriptor: Descriptor,
    #[serde(deserialize_with = "crate::swarm::nullable")]
    platforms: Vec<DistributionPlatform>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DistributionPlatform {
    architecture: String,
    os: String,
}

#[derive(Debug, Serialize)]
struct Filters<'a> {
    label: &'a [String],
}

/// Which kind of object a request addressed, for not-found mapping
#[derive(Debug, Clone, Copy)]
enum Kind {
    Network,
    Secret,
    Config,
    Service,
    Other,
}

impl Kind {
    fn not_found(self, name: &str) -> StackError {
        let name = name.to_string();
        match self {
            Kind::Network => StackError::NetworkNotFound(name),
            Kind::Secret => StackError::SecretNotFound(name),
            Kind::Config => StackError::ConfigNotFound(name),
            Kind::Service => StackError::ServiceNotFound(name),
            Kind::Other => StackError::Engine(format!("not found: {}", name)),
        }
    }
}

/// Engine API client
pub struct EngineClient {
    /// Base URL including the API version
    base_url: String,
    /// HTTP client
    client: reqwest::Client,
}

impl EngineClient {
    /// Create a client for a daemon address
    pub fn new(host: &str) -> Result<Self> {
        let base = if let Some(rest) = host.strip_prefix("tcp://") {
            format!("http://{}", rest)
        } else if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            return Err(StackError::InvalidConfig(format!(
                "unsupported daemon address {:?}: expected tcp://, http:// or https://",
                host
            )));
        };

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StackError::Engine(e.to_string()))?;

        Ok(Self {
            base_url: format!("{}/{}", base.trim_end_matches('/'), API_VERSION),
            client,
        })
    }

    /// Client for `DOCKER_HOST`, falling back to the default address
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        Self::new(&host)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    fn with_auth(request: RequestBuilder, options: &ServiceOptions) -> RequestBuilder {
        match options.encoded_registry_auth.as_deref() {
            Some(auth) if !auth.is_empty() => request.header(REGISTRY_AUTH_HEADER, auth),
            _ => request,
        }
    }

    fn filters(filter: &ListFilter) -> Result<String> {
        Ok(serde_json::to_string(&Filters {
            label: &filter.label,
        })?)
    }

    /// Send a request, mapping error statuses onto error kinds
    async fn send(&self, request: RequestBuilder, kind: Kind, name: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| StackError::Engine(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_default();
        debug!(%status, %message, "engine request failed");

        Err(match status {
            StatusCode::NOT_FOUND => kind.not_found(name),
            StatusCode::CONFLICT => StackError::Conflict(message),
            _ => StackError::Engine(format!("{}: {}", status, message)),
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        kind: Kind,
        name: &str,
    ) -> Result<T> {
        self.send(request, kind, name)
            .await?
            .json()
            .await
            .map_err(|e| StackError::Engine(e.to_string()))
    }

    fn log_warnings(warnings: &[String]) {
        for warning in warnings {
            warn!("{}", warning);
        }
    }

    /// Pin the image to its digest and record its platforms, the way the
    /// CLI does before handing a spec to the orchestrator
    async fn resolve_image(&self, spec: &mut ServiceSpec, options: &ServiceOptions) -> Result<()> {
        let Some(container) = spec.task_template.container_spec.as_mut() else {
            return Ok(());
        };
        if container.image.contains('@') {
            return Ok(());
        }

        let request = Self::with_auth(
            self.request(
                Method::GET,
                &format!("/distribution/{}/json", container.image),
            ),
            options,
        );
        let inspect: DistributionInspect = match self.json(request, Kind::Other, &container.image).await {
            Ok(inspect) => inspect,
            Err(e) => {
                // The orchestrator resolves the tag itself when this fails
                warn!(image = %container.image, "image could not be accessed on a registry: {}", e);
                return Ok(());
            }
        };

        if !inspect.descriptor.digest.is_empty() {
            container.image = format!("{}@{}", container.image, inspect.descriptor.digest);
        }

        let platforms: Vec<Platform> = inspect
            .platforms
            .into_iter()
            .filter(|p| !p.os.is_empty())
            .map(|p| Platform {
                architecture: p.architecture,
                os: p.os,
            })
            .collect();
        if !platforms.is_empty() {
            spec.task_template
                .placement
                .get_or_insert_with(Default::default)
                .platforms = platforms;
        }
        Ok(())
    }

    async fn prepare(&self, spec: &ServiceSpec, options: &ServiceOptions) -> Result<ServiceSpec> {
        let mut spec = spec.clone();
        if options.query_registry {
            self.resolve_image(&mut spec, options).await?;
        }
        Ok(spec)
    }
}

#[async_trait]
impl ClusterClient for EngineClient {
    async fn is_manager(&self) -> Result<bool> {
        let info: SystemInfo = self
            .json(self.request(Method::GET, "/info"), Kind::Other, "info")
            .await?;
        Ok(info.swarm.control_available)
    }

    async fn list_networks(&self, filter: &ListFilter) -> Result<Vec<NetworkSummary>> {
        let request = self
            .request(Method::GET, "/networks")
            .query(&[("filters", Self::filters(filter)?)]);
        self.json(request, Kind::Other, "networks").await
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkSummary> {
        let request = self.request(Method::GET, &format!("/networks/{}", name));
        self.json(request, Kind::Network, name).await
    }

    async fn create_network(&self, create: &NetworkCreate) -> Result<String> {
        let request = self.request(Method::POST, "/networks/create").json(create);
        let response: IdResponse = self.json(request, Kind::Other, &create.name).await?;
        Self::log_warnings(&response.warnings);
        Ok(response.id)
    }

    async fn inspect_secret(&self, name: &str) -> Result<Secret> {
        let request = self.request(Method::GET, &format!("/secrets/{}", name));
        self.json(request, Kind::Secret, name).await
    }

    async fn create_secret(&self, spec: &SecretSpec) -> Result<String> {
        let request = self.request(Method::POST, "/secrets/create").json(spec);
        let response: IdResponse = self.json(request, Kind::Other, &spec.name).await?;
        Ok(response.id)
    }

    async fn update_secret(&self, id: &str, version: ObjectVersion, spec: &SecretSpec) -> Result<()> {
        let request = self
            .request(Method::POST, &format!("/secrets/{}/update", id))
            .query(&[("version", version.index)])
            .json(spec);
        self.send(request, Kind::Secret, id).await?;
        Ok(())
    }

    async fn inspect_config(&self, name: &str) -> Result<Config> {
        let request = self.request(Method::GET, &format!("/configs/{}", name));
        self.json(request, Kind::Config, name).await
    }

    async fn create_config(&self, spec: &ConfigSpec) -> Result<String> {
        let request = self.request(Method::POST, "/configs/create").json(spec);
        let response: IdResponse = self.json(request, Kind::Other, &spec.name).await?;
        Ok(response.id)
    }

    async fn update_config(&self, id: &str, version: ObjectVersion, spec: &ConfigSpec) -> Result<()> {
        let request = self
            .request(Method::POST, &format!("/configs/{}/update", id))
            .query(&[("version", version.index)])
            .json(spec);
        self.send(request, Kind::Config, id).await?;
        Ok(())
    }

    async fn list_services(&self, filter: &ListFilter) -> Result<Vec<Service>> {
        let request = self.request(Method::GET, "/services").query(&[
            ("filters", Self::filters(filter)?),
            ("status", "true".to_string()),
        ]);
        self.json(request, Kind::Other, "services").await
    }

    async fn inspect_service(&self, id: &str) -> Result<Service> {
        // Only the list endpoint reports task counts
        let mut filters = BTreeMap::new();
        filters.insert("id", vec![id.to_string()]);
        let request = self.request(Method::GET, "/services").query(&[
            ("filters", serde_json::to_string(&filters)?),
            ("status", "true".to_string()),
        ]);
        let services: Vec<Service> = self.json(request, Kind::Service, id).await?;

        services
            .into_iter()
            .find(|s| s.id == id || s.spec.name == id)
            .ok_or_else(|| StackError::ServiceNotFound(id.to_string()))
    }

    async fn create_service(&self, spec: &ServiceSpec, options: &ServiceOptions) -> Result<String> {
        let spec = self.prepare(spec, options).await?;
        let request = Self::with_auth(self.request(Method::POST, "/services/create"), options)
            .json(&spec);
        let response: IdResponse = self.json(request, Kind::Other, &spec.name).await?;
        Self::log_warnings(&response.warnings);
        Ok(response.id)
    }

    async fn update_service(
        &self,
        id: &str,
        version: ObjectVersion,
        spec: &ServiceSpec,
        options: &ServiceOptions,
    ) -> Result<()> {
        let spec = self.prepare(spec, options).await?;
        let request = Self::with_auth(
            self.request(Method::POST, &format!("/services/{}/update", id)),
            options,
        )
        .query(&[("version", version.index)])
        .json(&spec);
        let response: UpdateResponse = self.json(request, Kind::Service, id).await?;
        Self::log_warnings(&response.warnings);
        Ok(())
    }

    async fn remove_service(&self, id: &str) -> Result<()> {
        let request = self.request(Method::DELETE, &format!("/services/{}", id));
        self.send(request, Kind::Service, id).await?;
        Ok(())
    }
}
