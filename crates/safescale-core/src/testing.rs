//! Test doubles: an in-memory metadata folder, a provider stack recording
//! the calls it receives, and readiness probes.

use crate::readiness::{Immediate, ReadinessProbe};
use crate::service::Service;
use async_trait::async_trait;
use safescale_config::Timeouts;
use safescale_iaas::{
    BrowseCallback, Capabilities, Error, FloatingIP, Host, HostRequest, HostState, HostTemplate,
    Image, MetadataFolder, Network, NetworkRequest, ProviderStack, Result, SizingRequirements,
    Subnet, SubnetRequest, VirtualIP, VirtualIPRequest,
};
use safescale_stack_sandbox::SandboxStack;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Metadata folder kept in memory.
#[derive(Default)]
pub struct MemoryFolder {
    entries: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryFolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the entries stored under `path`.
    pub fn names(&self, path: &str) -> Vec<String> {
        lock(&self.entries)
            .keys()
            .filter(|(p, _)| p == path)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl MetadataFolder for MemoryFolder {
    async fn read(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        lock(&self.entries)
            .get(&(path.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found("metadata entry", &format!("{}/{}", path, name)))
    }

    async fn write(&self, path: &str, name: &str, content: &[u8]) -> Result<()> {
        lock(&self.entries).insert((path.to_string(), name.to_string()), content.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str, name: &str) -> Result<()> {
        lock(&self.entries).remove(&(path.to_string(), name.to_string()));
        Ok(())
    }

    async fn browse(&self, path: &str, callback: &mut BrowseCallback<'_>) -> Result<()> {
        let contents: Vec<Vec<u8>> = lock(&self.entries)
            .iter()
            .filter(|((p, _), _)| p == path)
            .map(|(_, content)| content.clone())
            .collect();
        for content in contents {
            callback(&content)?;
        }
        Ok(())
    }
}

type FailureFactory = Box<dyn Fn() -> Error + Send + Sync>;

/// Sandbox stack recording every call as `(operation, target)` and able to
/// fail chosen operations.
pub struct RecordingStack {
    inner: SandboxStack,
    calls: Mutex<Vec<(String, String)>>,
    created_hosts: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, FailureFactory>>,
}

impl RecordingStack {
    pub fn new(inner: SandboxStack) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            created_hosts: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn sandbox(&self) -> &SandboxStack {
        &self.inner
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }

    /// Targets of the recorded calls to `operation`, in order.
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, target)| target.clone())
            .collect()
    }

    /// IDs of the hosts the provider created, in order.
    pub fn created_hosts(&self) -> Vec<String> {
        lock(&self.created_hosts).clone()
    }

    /// Makes every later call to `operation` fail with the error built by
    /// `make`.
    pub fn fail_on(&self, operation: &'static str, make: impl Fn() -> Error + Send + Sync + 'static) {
        lock(&self.failures).insert(operation, Box::new(make));
    }

    pub fn clear_failure(&self, operation: &str) {
        lock(&self.failures).remove(operation);
    }

    fn record(&self, operation: &'static str, target: &str) -> Result<()> {
        lock(&self.calls).push((operation.to_string(), target.to_string()));
        match lock(&self.failures).get(operation) {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProviderStack for RecordingStack {
    fn name(&self) -> &str {
        "recording"
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn list_templates(&self) -> Result<Vec<HostTemplate>> {
        self.record("list_templates", "")?;
        self.inner.list_templates().await
    }

    async fn select_templates_by_size(
        &self,
        sizing: &SizingRequirements,
        force: bool,
    ) -> Result<Vec<HostTemplate>> {
        self.record("select_templates_by_size", "")?;
        self.inner.select_templates_by_size(sizing, force).await
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        self.record("list_images", "")?;
        self.inner.list_images().await
    }

    async fn search_image(&self, os_name: &str) -> Result<Image> {
        self.record("search_image", os_name)?;
        self.inner.search_image(os_name).await
    }

    async fn create_host(&self, request: &HostRequest) -> Result<Host> {
        self.record("create_host", &request.resource_name)?;
        let host = self.inner.create_host(request).await?;
        lock(&self.created_hosts).push(host.id.clone());
        Ok(host)
    }

    async fn inspect_host(&self, id_or_name: &str) -> Result<Host> {
        self.record("inspect_host", id_or_name)?;
        self.inner.inspect_host(id_or_name).await
    }

    async fn list_hosts(&self, details: bool) -> Result<Vec<Host>> {
        self.record("list_hosts", "")?;
        self.inner.list_hosts(details).await
    }

    async fn delete_host(&self, id: &str) -> Result<()> {
        self.record("delete_host", id)?;
        self.inner.delete_host(id).await
    }

    async fn start_host(&self, id: &str) -> Result<()> {
        self.record("start_host", id)?;
        self.inner.start_host(id).await
    }

    async fn stop_host(&self, id: &str) -> Result<()> {
        self.record("stop_host", id)?;
        self.inner.stop_host(id).await
    }

    async fn reboot_host(&self, id: &str) -> Result<()> {
        self.record("reboot_host", id)?;
        self.inner.reboot_host(id).await
    }

    async fn wait_host_state(&self, id: &str, state: HostState, timeout: Duration) -> Result<()> {
        self.record("wait_host_state", id)?;
        self.inner.wait_host_state(id, state, timeout).await
    }

    async fn resize_host(&self, id: &str, sizing: &SizingRequirements) -> Result<Option<Host>> {
        self.record("resize_host", id)?;
        self.inner.resize_host(id, sizing).await
    }

    async fn create_network(&self, request: &NetworkRequest) -> Result<Network> {
        self.record("create_network", &request.name)?;
        self.inner.create_network(request).await
    }

    async fn inspect_network(&self, id: &str) -> Result<Network> {
        self.record("inspect_network", id)?;
        self.inner.inspect_network(id).await
    }

    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        self.record("get_network_by_name", name)?;
        self.inner.get_network_by_name(name).await
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        self.record("list_networks", "")?;
        self.inner.list_networks().await
    }

    async fn delete_network(&self, id: &str) -> Result<()> {
        self.record("delete_network", id)?;
        self.inner.delete_network(id).await
    }

    async fn create_subnet(&self, request: &SubnetRequest) -> Result<Subnet> {
        self.record("create_subnet", &request.name)?;
        self.inner.create_subnet(request).await
    }

    async fn inspect_subnet(&self, id: &str) -> Result<Subnet> {
        self.record("inspect_subnet", id)?;
        self.inner.inspect_subnet(id).await
    }

    async fn delete_subnet(&self, id: &str) -> Result<()> {
        self.record("delete_subnet", id)?;
        self.inner.delete_subnet(id).await
    }

    async fn create_floating_ip(&self) -> Result<FloatingIP> {
        self.record("create_floating_ip", "")?;
        self.inner.create_floating_ip().await
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<()> {
        self.record("delete_floating_ip", id)?;
        self.inner.delete_floating_ip(id).await
    }

    async fn associate_floating_ip(&self, ip_id: &str, host_id: &str) -> Result<()> {
        self.record("associate_floating_ip", ip_id)?;
        self.inner.associate_floating_ip(ip_id, host_id).await
    }

    async fn dissociate_floating_ip(&self, ip_id: &str, host_id: &str) -> Result<()> {
        self.record("dissociate_floating_ip", ip_id)?;
        self.inner.dissociate_floating_ip(ip_id, host_id).await
    }

    async fn create_vip(&self, request: &VirtualIPRequest) -> Result<VirtualIP> {
        self.record("create_vip", &request.name)?;
        self.inner.create_vip(request).await
    }

    async fn bind_host_to_vip(&self, vip: &VirtualIP, host_id: &str) -> Result<()> {
        self.record("bind_host_to_vip", host_id)?;
        self.inner.bind_host_to_vip(vip, host_id).await
    }

    async fn unbind_host_from_vip(&self, vip: &VirtualIP, host_id: &str) -> Result<()> {
        self.record("unbind_host_from_vip", host_id)?;
        self.inner.unbind_host_from_vip(vip, host_id).await
    }

    async fn delete_vip(&self, vip: &VirtualIP) -> Result<()> {
        self.record("delete_vip", &vip.id)?;
        self.inner.delete_vip(vip).await
    }
}

/// Probe that never reports a host ready.
pub struct NeverReady;

#[async_trait]
impl ReadinessProbe for NeverReady {
    async fn check(&self, host: &Host) -> Result<()> {
        Err(Error::NotAvailable(format!("host '{}' is not reachable", host.name)))
    }
}

/// Timeouts short enough for tests running on paused time.
pub fn short_timeouts() -> Timeouts {
    Timeouts {
        host_operation_secs: 30,
        host_cleanup_secs: 10,
        metadata_secs: 5,
        ssh_connect_secs: 1,
    }
}

/// A service over a fresh recording sandbox and an in-memory folder.
pub fn recording_service() -> (Arc<Service>, Arc<RecordingStack>, Arc<MemoryFolder>) {
    recording_service_with_probe(Arc::new(Immediate))
}

pub fn recording_service_with_probe(
    probe: Arc<dyn ReadinessProbe>,
) -> (Arc<Service>, Arc<RecordingStack>, Arc<MemoryFolder>) {
    let stack = Arc::new(RecordingStack::new(SandboxStack::ephemeral()));
    let folder = Arc::new(MemoryFolder::new());
    let service =
        Service::new(stack.clone(), folder.clone(), short_timeouts()).with_probe(probe);
    (Arc::new(service), stack, folder)
}
