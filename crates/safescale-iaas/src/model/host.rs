//! Abstract host and its property groups.

use super::catalog::HostSize;
use super::property::Property;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last known state of a host, as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    #[default]
    Unknown,
    Starting,
    Started,
    Stopping,
    Stopped,
    Error,
    Deleted,
}

impl HostState {
    /// States a host passes through while converging to a stable one.
    pub fn is_transition(self) -> bool {
        matches!(self, HostState::Starting | HostState::Stopping)
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostState::Unknown => write!(f, "unknown"),
            HostState::Starting => write!(f, "starting"),
            HostState::Started => write!(f, "started"),
            HostState::Stopping => write!(f, "stopping"),
            HostState::Stopped => write!(f, "stopped"),
            HostState::Error => write!(f, "error"),
            HostState::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub last_state: Property<HostState>,
    #[serde(default)]
    pub properties: HostProperties,
}

impl Host {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn state(&self) -> HostState {
        self.last_state.snapshot()
    }

    /// Address to reach the host from outside its networks, if any.
    pub fn public_ip(&self) -> Option<String> {
        let net = self.properties.network.snapshot();
        [net.public_ipv4, net.public_ipv6]
            .into_iter()
            .find(|ip| !ip.is_empty())
    }

    /// Address of the host on its default network.
    pub fn private_ip(&self) -> Option<String> {
        let net = self.properties.network.snapshot();
        net.ipv4_addresses
            .get(&net.default_network_id)
            .or_else(|| net.ipv4_addresses.values().next())
            .cloned()
    }
}

/// Mutable property groups of a host, each independently lockable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostProperties {
    #[serde(default)]
    pub sizing: Property<HostSizing>,
    #[serde(default)]
    pub network: Property<HostNetwork>,
    #[serde(default)]
    pub description: Property<HostDescription>,
    #[serde(default)]
    pub shares: Property<HostShares>,
    #[serde(default)]
    pub volumes: Property<HostVolumes>,
    #[serde(default)]
    pub mounts: Property<HostMounts>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSizing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<HostSize>,
    #[serde(default)]
    pub effective: HostSize,
    #[serde(default)]
    pub template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostNetwork {
    #[serde(default)]
    pub is_gateway: bool,
    #[serde(default)]
    pub default_network_id: String,
    #[serde(default)]
    pub default_gateway_id: String,
    #[serde(default)]
    pub public_ipv4: String,
    #[serde(default)]
    pub public_ipv6: String,
    /// IPv4 address indexed by network ID
    #[serde(default)]
    pub ipv4_addresses: HashMap<String, String>,
    /// IPv6 address indexed by network ID
    #[serde(default)]
    pub ipv6_addresses: HashMap<String, String>,
    /// network name indexed by network ID
    #[serde(default)]
    pub networks_by_id: HashMap<String, String>,
    /// network ID indexed by network name
    #[serde(default)]
    pub networks_by_name: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub purpose: String,
}

/// A directory exported by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostShare {
    pub id: String,
    pub name: String,
    pub path: String,
    /// client host name indexed by client host ID
    #[serde(default)]
    pub clients_by_id: HashMap<String, String>,
    /// client host ID indexed by client host name
    #[serde(default)]
    pub clients_by_name: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostShares {
    #[serde(default)]
    pub by_id: HashMap<String, HostShare>,
    /// share ID indexed by share name
    #[serde(default)]
    pub by_name: HashMap<String, String>,
}

impl HostShares {
    pub fn remove(&mut self, id: &str) -> Option<HostShare> {
        let share = self.by_id.remove(id)?;
        self.by_name.remove(&share.name);
        Some(share)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostVolume {
    pub attach_id: String,
    pub device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostVolumes {
    #[serde(default)]
    pub volumes_by_id: HashMap<String, HostVolume>,
    /// volume ID indexed by volume name
    #[serde(default)]
    pub volumes_by_name: HashMap<String, String>,
    /// volume ID indexed by device
    #[serde(default)]
    pub volumes_by_device: HashMap<String, String>,
}

/// A share exported by another host and mounted on this one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRemoteMount {
    pub share_id: String,
    /// ID of the host exporting the share
    pub server_id: String,
    pub export: String,
    pub path: String,
    #[serde(default)]
    pub fs_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostLocalMount {
    pub device: String,
    pub path: String,
    #[serde(default)]
    pub fs_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMounts {
    #[serde(default)]
    pub local_mounts_by_path: HashMap<String, HostLocalMount>,
    #[serde(default)]
    pub remote_mounts_by_path: HashMap<String, HostRemoteMount>,
}
