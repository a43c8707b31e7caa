//! Provider stack capability.
//!
//! A `ProviderStack` translates abstract resource operations into calls
//! against one cloud vendor. The lifecycle engine only ever talks to this
//! trait; implementations live in their own crates.

use crate::error::Result;
use crate::model::{
    FloatingIP, Host, HostState, HostTemplate, Image, Network, SizingRequirements, Subnet,
    VirtualIP,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Optional features a provider may offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Virtual IPs reachable from outside
    pub public_virtual_ip: bool,
    /// Virtual IPs shared inside a subnet
    pub private_virtual_ip: bool,
    /// Networks with routing between subnets
    pub layer3_networking: bool,
}

/// Parameters of a host creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostRequest {
    pub resource_name: String,
    pub template_id: String,
    pub image_id: String,
    /// Networks to attach, the first being the default one
    pub networks: Vec<NetworkRef>,
    #[serde(default)]
    pub default_gateway_id: Option<String>,
    #[serde(default)]
    pub public_ip: bool,
    #[serde(default)]
    pub is_gateway: bool,
    #[serde(default)]
    pub key_pair: Option<String>,
}

/// ID and name of a network a host joins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubnetRequest {
    pub network_id: String,
    pub name: String,
    pub cidr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualIPRequest {
    pub network_id: String,
    pub subnet_id: String,
    pub name: String,
}

/// Cloud vendor abstraction used by the lifecycle orchestrators.
///
/// Lookups return [`Error::NotFound`](crate::Error::NotFound) when the
/// provider does not know the resource; every other failure is reported
/// as an infrastructure error carrying the provider status when known.
#[async_trait]
pub trait ProviderStack: Send + Sync {
    /// Returns the stack name (e.g. "sandbox")
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    // ---- catalog ----

    async fn list_templates(&self) -> Result<Vec<HostTemplate>>;

    /// Templates matching `sizing`, best fit first. With `force`, the GPU
    /// and CPU frequency constraints are relaxed.
    async fn select_templates_by_size(
        &self,
        sizing: &SizingRequirements,
        force: bool,
    ) -> Result<Vec<HostTemplate>>;

    async fn list_images(&self) -> Result<Vec<Image>>;

    async fn search_image(&self, os_name: &str) -> Result<Image>;

    // ---- hosts ----

    /// Creates a host. Bad parameters are reported as `InvalidRequest`.
    async fn create_host(&self, request: &HostRequest) -> Result<Host>;

    async fn inspect_host(&self, id_or_name: &str) -> Result<Host>;

    async fn list_hosts(&self, details: bool) -> Result<Vec<Host>>;

    async fn delete_host(&self, id: &str) -> Result<()>;

    async fn start_host(&self, id: &str) -> Result<()>;

    async fn stop_host(&self, id: &str) -> Result<()>;

    async fn reboot_host(&self, id: &str) -> Result<()>;

    /// Waits until the host reaches `state`, or fails with `Timeout`.
    async fn wait_host_state(&self, id: &str, state: HostState, timeout: Duration) -> Result<()>;

    /// Resizes a host. `Ok(None)` means the provider returned nothing.
    async fn resize_host(&self, id: &str, sizing: &SizingRequirements) -> Result<Option<Host>>;

    // ---- networks ----

    async fn create_network(&self, request: &NetworkRequest) -> Result<Network>;

    async fn inspect_network(&self, id: &str) -> Result<Network>;

    async fn get_network_by_name(&self, name: &str) -> Result<Network>;

    async fn list_networks(&self) -> Result<Vec<Network>>;

    async fn delete_network(&self, id: &str) -> Result<()>;

    async fn create_subnet(&self, request: &SubnetRequest) -> Result<Subnet>;

    async fn inspect_subnet(&self, id: &str) -> Result<Subnet>;

    async fn delete_subnet(&self, id: &str) -> Result<()>;

    // ---- addresses ----

    async fn create_floating_ip(&self) -> Result<FloatingIP>;

    async fn delete_floating_ip(&self, id: &str) -> Result<()>;

    async fn associate_floating_ip(&self, ip_id: &str, host_id: &str) -> Result<()>;

    async fn dissociate_floating_ip(&self, ip_id: &str, host_id: &str) -> Result<()>;

    async fn create_vip(&self, request: &VirtualIPRequest) -> Result<VirtualIP>;

    async fn bind_host_to_vip(&self, vip: &VirtualIP, host_id: &str) -> Result<()>;

    async fn unbind_host_from_vip(&self, vip: &VirtualIP, host_id: &str) -> Result<()>;

    async fn delete_vip(&self, vip: &VirtualIP) -> Result<()>;
}
