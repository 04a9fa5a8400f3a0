//! Swarm network objects

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network create request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkCreate {
    /// Network name
    pub name: String,
    /// Driver
    pub driver: String,
    /// Driver options
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Internal network
    pub internal: bool,
    /// Attachable by standalone containers
    pub attachable: bool,
    /// IPAM configuration
    #[serde(rename = "IPAM", skip_serializing_if = "Option::is_none")]
    pub ipam: Option<Ipam>,
}

/// IPAM configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Ipam {
    /// Driver
    #[serde(skip_serializing_if = "String::is_empty")]
    pub driver: String,
    /// Address pools
    pub config: Vec<IpamPool>,
}

/// IPAM address pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpamPool {
    /// Subnet
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet: String,
    /// IP range
    #[serde(rename = "IPRange", skip_serializing_if = "String::is_empty")]
    pub ip_range: String,
    /// Gateway
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    /// Auxiliary addresses
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub auxiliary_addresses: BTreeMap<String, String>,
}

/// Network as returned by list and inspect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkSummary {
    /// Network ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Scope (local, swarm)
    pub scope: String,
    /// Driver
    pub driver: String,
    /// Labels
    #[serde(deserialize_with = "super::nullable")]
    pub labels: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_engine_network() {
        let raw = r#"{"Name":"edge","Id":"n1","Scope":"swarm","Driver":"overlay","Labels":null}"#;
        let net: NetworkSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(net.id, "n1");
        assert_eq!(net.scope, "swarm");
        assert!(net.labels.is_empty());
    }

    #[test]
    fn test_create_wire_shape() {
        let create = NetworkCreate {
            name: "demo_default".to_string(),
            driver: "overlay".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&create).unwrap();
        assert_eq!(json["Driver"], "overlay");
        assert!(json.get("IPAM").is_none());
        assert!(json.get("Options").is_none());
    }
}
