use serde::{Deserialize, Serialize};

/// Public address that can be associated with a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIP {
    pub id: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
}

/// Address shared between several hosts of a subnet (e.g. HA gateways).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualIP {
    pub id: String,
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub subnet_id: String,
    pub private_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_ip: String,
    /// IDs of the hosts bound to this address
    #[serde(default)]
    pub hosts: Vec<String>,
}
