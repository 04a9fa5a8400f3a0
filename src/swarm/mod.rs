//! Swarm object model
//!
//! Request and response types for the orchestrator, serialized the way the
//! Docker Engine API expects them.

pub mod config;
pub mod network;
pub mod service;

pub use config::{Config, ConfigSpec, Secret, SecretSpec};
pub use network::{NetworkCreate, NetworkSummary};
pub use service::{Service, ServiceSpec, ServiceStatus};

use serde::{Deserialize, Deserializer, Serialize};

/// Optimistic concurrency token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ObjectVersion {
    /// Index
    pub index: u64,
}

/// The engine encodes empty maps as `null`
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
