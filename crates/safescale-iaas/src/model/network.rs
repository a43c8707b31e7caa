//! Abstract networks and subnets.

use super::ip::VirtualIP;
use super::property::Property;
use crate::error::{Error, Result};
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the implicit network used by single-host deployments.
pub const SINGLE_HOST_NETWORK_NAME: &str = "net-safescale";

/// CIDR of the implicit single-host network.
pub const SINGLE_HOST_NETWORK_CIDR: &str = "10.0.0.0/8";

const PRIVATE_RANGES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Parses `cidr` and checks it lies entirely in private (RFC 1918) space.
pub fn parse_private_cidr(cidr: &str) -> Result<Ipv4Net> {
    let net: IpNet = cidr
        .parse()
        .map_err(|e| Error::invalid_request(format!("'{}' is not a valid CIDR: {}", cidr, e)))?;
    let IpNet::V4(net) = net else {
        return Err(Error::invalid_request(format!(
            "'{}' is not an IPv4 CIDR",
            cidr
        )));
    };

    let private = PRIVATE_RANGES.iter().any(|range| {
        range
            .parse::<Ipv4Net>()
            .map(|range| range.contains(&net))
            .unwrap_or(false)
    });
    if !private {
        return Err(Error::invalid_request(format!(
            "cannot use a routable address range '{}'",
            cidr
        )));
    }
    Ok(net)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub properties: NetworkProperties,
}

impl Network {
    pub fn new(id: impl Into<String>, name: impl Into<String>, cidr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cidr: cidr.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkProperties {
    #[serde(default)]
    pub subnets: Property<NetworkSubnets>,
    #[serde(default)]
    pub hosts: Property<NetworkHosts>,
}

/// Subnets owned by a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSubnets {
    /// subnet name indexed by subnet ID
    #[serde(default)]
    pub by_id: HashMap<String, String>,
    /// subnet ID indexed by subnet name
    #[serde(default)]
    pub by_name: HashMap<String, String>,
}

impl NetworkSubnets {
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn adopt(&mut self, id: &str, name: &str) {
        self.by_id.insert(id.to_string(), name.to_string());
        self.by_name.insert(name.to_string(), id.to_string());
    }

    pub fn abandon(&mut self, id: &str) {
        if let Some(name) = self.by_id.remove(id) {
            self.by_name.remove(&name);
        }
    }
}

/// Hosts attached to a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkHosts {
    /// host name indexed by host ID
    #[serde(default)]
    pub by_id: HashMap<String, String>,
    /// host ID indexed by host name
    #[serde(default)]
    pub by_name: HashMap<String, String>,
}

impl NetworkHosts {
    pub fn insert(&mut self, id: &str, name: &str) {
        self.by_id.insert(id.to_string(), name.to_string());
        self.by_name.insert(name.to_string(), id.to_string());
    }

    pub fn remove(&mut self, id: &str) {
        if let Some(name) = self.by_id.remove(id) {
            self.by_name.remove(&name);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetState {
    #[default]
    Unknown,
    Creating,
    GatewayCreation,
    Ready,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    #[serde(default)]
    pub state: Property<SubnetState>,
    #[serde(default)]
    pub gateways: Property<SubnetGateways>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnetGateways {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip: Option<VirtualIP>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_cidr_accepted() {
        let net = parse_private_cidr("192.168.10.0/24").unwrap();
        assert_eq!(net.prefix_len(), 24);
        assert!(parse_private_cidr(SINGLE_HOST_NETWORK_CIDR).is_ok());
        assert!(parse_private_cidr("172.20.0.0/16").is_ok());
    }

    #[test]
    fn test_routable_cidr_rejected() {
        let err = parse_private_cidr("8.8.8.0/24").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        // straddles the 172.16.0.0/12 boundary
        assert!(parse_private_cidr("172.0.0.0/8").is_err());
        assert!(parse_private_cidr("not-a-cidr").is_err());
    }

    #[test]
    fn test_subnets_adopt_and_abandon() {
        let mut subnets = NetworkSubnets::default();
        subnets.adopt("sn-1", "front");
        subnets.adopt("sn-2", "back");
        assert_eq!(subnets.len(), 2);
        subnets.abandon("sn-1");
        assert_eq!(subnets.len(), 1);
        assert!(!subnets.by_name.contains_key("front"));
    }
}
