//! Network and subnet lifecycle, including subnet gateways.

use crate::guard::guarded;
use crate::host::{DEFAULT_IMAGE, HostCreateRequest, HostOrchestrator};
use crate::metadata::{subnet_name_key, validate_name};
use crate::service::Service;
use safescale_iaas::retry::{self, Retry};
use safescale_iaas::{
    Error, ErrorKind, Network, NetworkRequest, Result, SizingRequirements, Subnet, SubnetRequest,
    SubnetState, VirtualIP, VirtualIPRequest, parse_private_cidr,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How the gateways of a subnet are built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOptions {
    #[serde(default)]
    pub sizing: SizingRequirements,
    #[serde(default = "default_gateway_image")]
    pub image: String,
    /// Two gateways sharing a virtual IP, when the provider allows it
    #[serde(default)]
    pub ha: bool,
}

fn default_gateway_image() -> String {
    DEFAULT_IMAGE.to_string()
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            sizing: SizingRequirements::default(),
            image: default_gateway_image(),
            ha: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkCreateRequest {
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// Skip the subnet named like the network
    #[serde(default)]
    pub no_default_subnet: bool,
    #[serde(default)]
    pub gateway: GatewayOptions,
    #[serde(default)]
    pub keep_on_failure: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubnetCreateRequest {
    pub name: String,
    pub cidr: String,
    #[serde(default)]
    pub gateway: GatewayOptions,
    #[serde(default)]
    pub keep_on_failure: bool,
}

/// What a subnet creation built so far, undone in reverse on failure.
#[derive(Default)]
struct SubnetProgress {
    metadata_saved: bool,
    vip: Option<VirtualIP>,
    gateways: Vec<String>,
}

pub struct NetworkOrchestrator {
    service: Arc<Service>,
}

impl NetworkOrchestrator {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    fn hosts(&self) -> HostOrchestrator {
        HostOrchestrator::new(self.service.clone())
    }

    /// Creates a network and, unless disabled, its default subnet with
    /// gateways.
    pub async fn create(
        &self,
        request: &NetworkCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Network>> {
        guarded("network create", self.do_create(request, cancel)).await
    }

    async fn do_create(
        &self,
        request: &NetworkCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Network>> {
        let name = request.name.trim();
        validate_name(name)?;
        let cidr = parse_private_cidr(&request.cidr)?;
        tracing::debug!("creating network '{}' ({})", name, cidr);

        let store = self.service.network_store();
        let stack = self.service.stack();
        let reservation = store.reserve(name)?;
        if store.is_recorded(name).await? {
            return Err(Error::duplicate(format!("network '{}' already exists", name)));
        }
        match stack.get_network_by_name(name).await {
            Ok(_) => {
                return Err(Error::duplicate(format!(
                    "network '{}' already exists on the provider",
                    name
                )));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let network = stack
            .create_network(&NetworkRequest {
                name: name.to_string(),
                cidr: cidr.to_string(),
                dns_servers: request.dns_servers.clone(),
            })
            .await?;
        tracing::info!("network '{}' created with ID {}", name, network.id);

        if let Err(e) = store.save(&network).await {
            if request.keep_on_failure {
                return Err(e);
            }
            return Err(self.rollback_network(Arc::new(network), false, e).await);
        }
        let network = reservation.commit(network)?;

        if !request.no_default_subnet {
            let subnet_request = SubnetCreateRequest {
                name: name.to_string(),
                cidr: request.cidr.clone(),
                gateway: request.gateway.clone(),
                keep_on_failure: request.keep_on_failure,
            };
            let outcome = guarded(
                "default subnet create",
                self.create_subnet_in(&network, &subnet_request, cancel),
            )
            .await;
            if let Err(e) = outcome {
                if request.keep_on_failure {
                    return Err(e);
                }
                return Err(self.rollback_network(network, true, e).await);
            }
        }
        Ok(network)
    }

    async fn rollback_network(
        &self,
        network: Arc<Network>,
        metadata_saved: bool,
        error: Error,
    ) -> Error {
        tracing::warn!("cleaning up network '{}' after failure: {}", network.name, error);
        let service = self.service.clone();
        let cleanup = tokio::spawn(async move {
            let mut failures = Vec::new();
            if metadata_saved {
                if let Err(e) = service.network_store().delete(&network).await {
                    tracing::error!("failed to delete metadata of network '{}': {}", network.name, e);
                    failures.push(e);
                }
            }
            match service.stack().delete_network(&network.id).await {
                Ok(()) => tracing::info!("deleted network '{}'", network.name),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::error!("failed to delete network '{}': {}", network.name, e);
                    failures.push(e.annotate(format!("cleanup of network '{}'", network.name)));
                }
            }
            failures
        });

        let failures = match cleanup.await {
            Ok(failures) => failures,
            Err(e) => vec![Error::infra(format!("cleanup task failed: {}", e))],
        };
        failures.into_iter().fold(error, Error::add_consequence)
    }

    /// Deletes a network. A single subnet named like the network goes with
    /// it; any other subnet must be deleted first.
    ///
    /// Subnets the network still refers to but whose record is gone are
    /// considered deleted. What the provider holds under their IDs goes
    /// with the network, together with gateways no recorded subnet owns.
    pub async fn delete(&self, reference: &str, cancel: &CancellationToken) -> Result<()> {
        guarded("network delete", async {
            let store = self.service.network_store();
            let network = store.load(reference, cancel).await?;
            tracing::debug!("deleting network '{}' ({})", network.name, network.id);

            let (subnets, stale) = self.recorded_subnets(&network, cancel).await?;
            let what = format!("network '{}'", network.name);
            let leftover_gateways = self
                .ensure_no_user_hosts(&network, &subnets, &what, cancel)
                .await?;

            let default_subnet = match subnets.as_slice() {
                [] => None,
                [subnet] if subnet.name == network.name => Some(subnet.clone()),
                [subnet] => {
                    return Err(Error::logic(format!(
                        "network '{}' still has subnet '{}', delete it first",
                        network.name, subnet.name
                    )));
                }
                many => {
                    return Err(Error::logic(format!(
                        "network '{}' has {} subnets, delete them first",
                        network.name,
                        many.len()
                    )));
                }
            };
            if let Some(subnet) = default_subnet {
                self.delete_subnet_in(&network, subnet, cancel).await?;
            }

            let hosts = self.hosts();
            for id in &leftover_gateways {
                match hosts.delete_host(id, true, cancel).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            if !stale.is_empty() {
                self.drop_stale_subnets(&network, &stale).await?;
            }

            self.delete_provider_network(&network, cancel).await?;
            store.delete(&network).await?;
            tracing::info!("network '{}' deleted", network.name);
            Ok(())
        })
        .await
    }

    async fn delete_provider_network(
        &self,
        network: &Network,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stack = self.service.stack();
        match stack.delete_network(&network.id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!("network {} was already gone on the provider", network.id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::Timeout => {
                tracing::warn!(
                    "deletion of network '{}' timed out, waiting for it to disappear",
                    network.name
                );
                let id = network.id.as_str();
                retry::while_unsuccessful_delay_1s(
                    move || async move {
                        match stack.inspect_network(id).await {
                            Ok(_) => Err(Retry::Again(Error::NotAvailable(format!(
                                "network {} still exists",
                                id
                            )))),
                            Err(e) if e.is_not_found() => Ok(()),
                            Err(e) => Err(Retry::from_provider(e)),
                        }
                    },
                    self.service.timeouts().metadata(),
                    cancel,
                )
                .await
            }
            Err(e) => Err(e.annotate(format!("failed to delete network '{}'", network.name))),
        }
    }

    /// Subnets `network` refers to, and apart the IDs of those without a
    /// record.
    async fn recorded_subnets(
        &self,
        network: &Network,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Arc<Subnet>>, Vec<String>)> {
        let ids: Vec<String> = network
            .properties
            .subnets
            .snapshot()
            .by_id
            .into_keys()
            .collect();
        let mut subnets = Vec::with_capacity(ids.len());
        let mut stale = Vec::new();
        for id in ids {
            match self.service.subnet_store().load(&id, cancel).await {
                Ok(subnet) => subnets.push(subnet),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(
                        "network '{}' refers to subnet {} which has no metadata",
                        network.name,
                        id
                    );
                    stale.push(id);
                }
                Err(e) => return Err(e),
            }
        }
        subnets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok((subnets, stale))
    }

    /// Forgets subnet references without a record, deleting what the
    /// provider may still hold under those IDs.
    async fn drop_stale_subnets(&self, network: &Arc<Network>, stale: &[String]) -> Result<()> {
        let stack = self.service.stack();
        for id in stale {
            match stack.delete_subnet(id).await {
                Ok(()) => tracing::info!("deleted leftover subnet {} on the provider", id),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.annotate(format!("failed to delete subnet {}", id))),
            }
        }
        self.service
            .network_store()
            .alter(network, |n| {
                n.properties.subnets.alter(|s| {
                    for id in stale {
                        s.abandon(id);
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Refuses while hosts other than gateways are attached to `network`.
    ///
    /// Returns the gateways attached to `network` that none of `subnets`
    /// owns, left over by an interrupted subnet deletion.
    async fn ensure_no_user_hosts(
        &self,
        network: &Network,
        subnets: &[Arc<Subnet>],
        what: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let gateways: HashSet<String> = subnets
            .iter()
            .flat_map(|s| s.gateways.snapshot().ids)
            .collect();
        let attached = network.properties.hosts.snapshot().by_id;

        let mut users = Vec::new();
        let mut leftovers = Vec::new();
        for (id, name) in attached {
            if gateways.contains(&id) {
                continue;
            }
            match self.service.host_store().load(&id, cancel).await {
                Ok(host) => {
                    if host.properties.network.inspect(|n| Ok(n.is_gateway))? {
                        leftovers.push(id);
                    } else {
                        users.push(name);
                    }
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(
                        "host {} attached to network '{}' has no metadata",
                        id,
                        network.name
                    );
                }
                Err(e) => return Err(e),
            }
        }
        if users.is_empty() {
            return Ok(leftovers);
        }
        users.sort();
        Err(Error::logic(format!(
            "cannot delete {}: hosts still attached to network '{}': {}",
            what,
            network.name,
            users.join(", ")
        )))
    }

    pub async fn inspect(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Network>> {
        guarded(
            "network inspect",
            self.service.network_store().load(reference, cancel),
        )
        .await
    }

    /// Recorded networks, or every provider network with `all`.
    pub async fn list(&self, all: bool, cancel: &CancellationToken) -> Result<Vec<Arc<Network>>> {
        guarded("network list", async {
            let fetch = async {
                if all {
                    self.service
                        .stack()
                        .list_networks()
                        .await
                        .map(|networks| networks.into_iter().map(Arc::new).collect())
                } else {
                    self.service.network_store().list().await
                }
            };
            let mut networks: Vec<Arc<Network>> = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::aborted()),
                networks = fetch => networks?,
            };
            networks.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(networks)
        })
        .await
    }

    /// Creates a subnet with its gateways in an existing network.
    pub async fn create_subnet(
        &self,
        network_ref: &str,
        request: &SubnetCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Subnet>> {
        guarded("subnet create", async {
            let network = self.service.network_store().load(network_ref, cancel).await?;
            self.create_subnet_in(&network, request, cancel).await
        })
        .await
    }

    async fn create_subnet_in(
        &self,
        network: &Arc<Network>,
        request: &SubnetCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Subnet>> {
        let name = request.name.trim();
        validate_name(name)?;
        let parent = parse_private_cidr(&network.cidr)?;
        let wanted = parse_private_cidr(&request.cidr)?;
        if !parent.contains(&wanted) {
            return Err(Error::invalid_request(format!(
                "{} is not inside the range {} of network '{}'",
                wanted, parent, network.name
            )));
        }
        if network
            .properties
            .subnets
            .inspect(|s| Ok(s.by_name.contains_key(name)))?
        {
            return Err(Error::duplicate(format!(
                "subnet '{}' already exists in network '{}'",
                name, network.name
            )));
        }

        let store = self.service.subnet_store();
        let key = subnet_name_key(&network.id, name);
        let reservation = store.reserve(&key)?;
        if store.is_recorded(&key).await? {
            return Err(Error::duplicate(format!(
                "metadata of subnet '{}' already exist",
                name
            )));
        }

        let subnet = self
            .service
            .stack()
            .create_subnet(&SubnetRequest {
                network_id: network.id.clone(),
                name: name.to_string(),
                cidr: wanted.to_string(),
            })
            .await?;
        tracing::info!("subnet '{}' created with ID {}", name, subnet.id);

        // a panic past this point must still remove the subnet
        let mut progress = SubnetProgress::default();
        let outcome = guarded(
            "subnet setup",
            self.complete_subnet(network, &subnet, request, &mut progress, cancel),
        )
        .await;
        if let Err(e) = outcome {
            if let Err(state_error) = subnet.state.set(SubnetState::Error) {
                tracing::warn!("failed to mark subnet '{}' in error: {}", name, state_error);
            }
            if request.keep_on_failure {
                tracing::warn!("keeping subnet '{}' after failure: {}", name, e);
                return Err(e);
            }
            return Err(self.rollback_subnet(subnet, progress, e).await);
        }

        let subnet = reservation.commit(subnet)?;
        tracing::info!("subnet '{}' is ready", subnet.name);
        Ok(subnet)
    }

    async fn complete_subnet(
        &self,
        network: &Arc<Network>,
        subnet: &Subnet,
        request: &SubnetCreateRequest,
        progress: &mut SubnetProgress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stack = self.service.stack();
        let store = self.service.subnet_store();

        subnet.state.set(SubnetState::GatewayCreation)?;
        store.save(subnet).await?;
        progress.metadata_saved = true;

        let ha = request.gateway.ha && stack.capabilities().private_virtual_ip;
        if request.gateway.ha && !ha {
            tracing::warn!(
                "stack '{}' has no private virtual IP, subnet '{}' gets a single gateway",
                stack.name(),
                subnet.name
            );
        }
        if ha {
            let vip = stack
                .create_vip(&VirtualIPRequest {
                    network_id: network.id.clone(),
                    subnet_id: subnet.id.clone(),
                    name: format!("vip-{}", subnet.name),
                })
                .await?;
            progress.vip = Some(vip);
        }

        let mut names = vec![format!("gw-{}", subnet.name)];
        if ha {
            names.push(format!("gw2-{}", subnet.name));
        }
        let hosts = self.hosts();
        for gateway_name in names {
            let mut gateway_request = HostCreateRequest::new(gateway_name);
            gateway_request.networks = vec![network.id.clone()];
            gateway_request.public_ip = true;
            gateway_request.is_gateway = true;
            gateway_request.sizing = request.gateway.sizing;
            gateway_request.image = request.gateway.image.clone();
            gateway_request.keep_on_failure = request.keep_on_failure;

            let gateway = hosts.create(&gateway_request, cancel).await?;
            progress.gateways.push(gateway.id.clone());
            if let Some(vip) = progress.vip.as_mut() {
                stack.bind_host_to_vip(vip, &gateway.id).await?;
                vip.hosts.push(gateway.id.clone());
            }
        }

        subnet.gateways.alter(|g| {
            g.ids = progress.gateways.clone();
            g.vip = progress.vip.clone();
            Ok(())
        })?;
        subnet.state.set(SubnetState::Ready)?;
        store.save(subnet).await?;

        self.service
            .network_store()
            .alter(network, |n| {
                n.properties.subnets.alter(|s| {
                    s.adopt(&subnet.id, &subnet.name);
                    Ok(())
                })
            })
            .await
    }

    /// Undoes a failed subnet creation: gateways, VIP, provider subnet,
    /// then metadata.
    async fn rollback_subnet(&self, subnet: Subnet, progress: SubnetProgress, error: Error) -> Error {
        tracing::warn!("cleaning up subnet '{}' after failure: {}", subnet.name, error);
        let service = self.service.clone();
        let cleanup = tokio::spawn(async move {
            let stack = service.stack();
            let hosts = HostOrchestrator::new(service.clone());
            // cleanup runs to completion, whatever the caller does
            let never = CancellationToken::new();
            let mut failures = Vec::new();

            for id in progress.gateways.iter().rev() {
                if let Some(vip) = &progress.vip {
                    if let Err(e) = stack.unbind_host_from_vip(vip, id).await {
                        if !e.is_not_found() {
                            failures.push(e);
                        }
                    }
                }
                if let Err(e) = hosts.delete_host(id, true, &never).await {
                    if !e.is_not_found() {
                        tracing::error!("failed to delete gateway {}: {}", id, e);
                        failures.push(e);
                    }
                }
            }
            if let Some(vip) = &progress.vip {
                if let Err(e) = stack.delete_vip(vip).await {
                    if !e.is_not_found() {
                        tracing::error!("failed to delete virtual IP '{}': {}", vip.name, e);
                        failures.push(e);
                    }
                }
            }
            match stack.delete_subnet(&subnet.id).await {
                Ok(()) => tracing::info!("deleted subnet '{}'", subnet.name),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::error!("failed to delete subnet '{}': {}", subnet.name, e);
                    failures.push(e.annotate(format!("cleanup of subnet '{}'", subnet.name)));
                }
            }
            if progress.metadata_saved {
                if let Err(e) = service.subnet_store().delete(&subnet).await {
                    tracing::error!("failed to delete metadata of subnet '{}': {}", subnet.name, e);
                    failures.push(e);
                }
            }
            failures
        });

        let failures = match cleanup.await {
            Ok(failures) => failures,
            Err(e) => vec![Error::infra(format!("cleanup task failed: {}", e))],
        };
        failures.into_iter().fold(error, Error::add_consequence)
    }

    /// Deletes a subnet and its gateways.
    pub async fn delete_subnet(
        &self,
        network_ref: &str,
        subnet_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        guarded("subnet delete", async {
            let network = self.service.network_store().load(network_ref, cancel).await?;
            let subnet = self.load_subnet(&network, subnet_ref, cancel).await?;
            self.delete_subnet_in(&network, subnet, cancel).await
        })
        .await
    }

    async fn delete_subnet_in(
        &self,
        network: &Arc<Network>,
        subnet: Arc<Subnet>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::debug!("deleting subnet '{}' ({})", subnet.name, subnet.id);
        let (subnets, _) = self.recorded_subnets(network, cancel).await?;
        let what = format!("subnet '{}'", subnet.name);
        self.ensure_no_user_hosts(network, &subnets, &what, cancel)
            .await?;

        let stack = self.service.stack();
        let hosts = self.hosts();
        let gateways = subnet.gateways.snapshot();
        for id in &gateways.ids {
            if let Some(vip) = &gateways.vip {
                match stack.unbind_host_from_vip(vip, id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            match hosts.delete_host(id, true, cancel).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!("gateway {} of subnet '{}' was already gone", id, subnet.name);
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(vip) = &gateways.vip {
            match stack.delete_vip(vip).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        match stack.delete_subnet(&subnet.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("subnet {} was already gone on the provider", subnet.id);
            }
            Err(e) => return Err(e.annotate(format!("failed to delete subnet '{}'", subnet.name))),
        }

        self.service.subnet_store().delete(&subnet).await?;
        self.service
            .network_store()
            .alter(network, |n| {
                n.properties.subnets.alter(|s| {
                    s.abandon(&subnet.id);
                    Ok(())
                })
            })
            .await?;
        tracing::info!("subnet '{}' deleted", subnet.name);
        Ok(())
    }

    /// Finds a subnet of `network` by name or ID.
    async fn load_subnet(
        &self,
        network: &Network,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Subnet>> {
        let id = network.properties.subnets.inspect(|s| {
            if s.by_id.contains_key(reference) {
                return Ok(Some(reference.to_string()));
            }
            Ok(s.by_name.get(reference).cloned())
        })?;
        match id {
            Some(id) => self.service.subnet_store().load(&id, cancel).await,
            None => Err(Error::not_found("subnet", reference)),
        }
    }

    pub async fn inspect_subnet(
        &self,
        network_ref: &str,
        subnet_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Subnet>> {
        guarded("subnet inspect", async {
            let network = self.service.network_store().load(network_ref, cancel).await?;
            self.load_subnet(&network, subnet_ref, cancel).await
        })
        .await
    }

    /// Subnets of a network with a record, by name.
    pub async fn list_subnets(
        &self,
        network_ref: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Subnet>>> {
        guarded("subnet list", async {
            let network = self.service.network_store().load(network_ref, cancel).await?;
            let (subnets, _) = self.recorded_subnets(&network, cancel).await?;
            Ok(subnets)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryFolder, RecordingStack, recording_service, short_timeouts};
    use safescale_iaas::{Capabilities, HostState, ProviderStack};
    use safescale_stack_sandbox::SandboxStack;
    use std::time::Duration;

    fn network_request(name: &str, cidr: &str) -> NetworkCreateRequest {
        NetworkCreateRequest {
            name: name.to_string(),
            cidr: cidr.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_network_with_default_subnet() {
        let (service, _, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();

        let network = networks
            .create(&network_request("front", "192.168.10.0/24"), &cancel)
            .await
            .unwrap();

        let subnets = networks.list_subnets("front", &cancel).await.unwrap();
        assert_eq!(subnets.len(), 1);
        let subnet = &subnets[0];
        assert_eq!(subnet.name, "front");
        assert_eq!(subnet.state.snapshot(), SubnetState::Ready);

        let gateways = subnet.gateways.snapshot();
        assert_eq!(gateways.ids.len(), 1);
        assert!(gateways.vip.is_none());
        let gateway = service.host_store().load("gw-front", &cancel).await.unwrap();
        assert!(gateway.properties.network.snapshot().is_gateway);
        assert!(network.properties.hosts.snapshot().by_id.contains_key(&gateway.id));

        // gateways go away with their subnet only
        let err = service.hosts().delete("gw-front", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
    }

    #[tokio::test]
    async fn test_create_network_rejects_routable_range() {
        let (service, stack, _) = recording_service();
        let err = service
            .networks()
            .create(&network_request("front", "8.8.0.0/16"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(stack.calls_to("create_network").is_empty());
    }

    #[tokio::test]
    async fn test_create_network_twice_is_duplicate() {
        let (service, _, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        let mut request = network_request("front", "10.1.0.0/16");
        request.no_default_subnet = true;
        networks.create(&request, &cancel).await.unwrap();

        let err = networks.create(&request, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn test_failed_default_subnet_rolls_back_network() {
        let (service, stack, _) = recording_service();
        let cancel = CancellationToken::new();
        stack.fail_on("create_subnet", || Error::infra_status("quota exceeded", 500));

        let err = service
            .networks()
            .create(&network_request("front", "10.1.0.0/16"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infra);
        assert_eq!(stack.calls_to("delete_network").len(), 1);
        let err = service.network_store().load("front", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(stack.sandbox().list_networks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panic_in_default_subnet_rolls_back_network() {
        let (service, stack, folder) = recording_service();
        stack.fail_on("create_subnet", || panic!("subnet driver bug"));

        let err = service
            .networks()
            .create(&network_request("front", "10.1.0.0/16"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infra);
        assert!(err.to_string().contains("subnet driver bug"));
        assert_eq!(stack.calls_to("delete_network").len(), 1);
        assert!(folder.names("networks/byName").is_empty());
        assert!(stack.sandbox().list_networks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panic_during_subnet_setup_rolls_back_subnet() {
        let (service, stack, folder) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        let mut request = network_request("front", "10.1.0.0/16");
        request.no_default_subnet = true;
        networks.create(&request, &cancel).await.unwrap();

        stack.fail_on("bind_host_to_vip", || panic!("vip driver bug"));
        let mut subnet_request = SubnetCreateRequest {
            name: "web".to_string(),
            cidr: "10.1.1.0/24".to_string(),
            ..Default::default()
        };
        subnet_request.gateway.ha = true;

        let err = networks
            .create_subnet("front", &subnet_request, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Infra);
        assert!(err.to_string().contains("vip driver bug"));

        let created = stack.created_hosts();
        assert_eq!(created.len(), 1);
        assert_eq!(stack.calls_to("delete_host"), created);
        assert_eq!(stack.calls_to("delete_vip").len(), 1);
        assert_eq!(stack.calls_to("delete_subnet").len(), 1);
        assert!(folder.names("subnets/byID").is_empty());
        assert!(folder.names("hosts/byName").is_empty());
        assert!(networks.list_subnets("front", &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_like_names_are_refused() {
        let (service, stack, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();

        let err = networks
            .create(&network_request("front/back", "10.1.0.0/16"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(stack.calls_to("create_network").is_empty());

        let mut request = network_request("front", "10.1.0.0/16");
        request.no_default_subnet = true;
        networks.create(&request, &cancel).await.unwrap();
        let subnet_request = SubnetCreateRequest {
            name: "../web".to_string(),
            cidr: "10.1.1.0/24".to_string(),
            ..Default::default()
        };
        let err = networks
            .create_subnet("front", &subnet_request, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(stack.calls_to("create_subnet").is_empty());
    }

    #[tokio::test]
    async fn test_failed_gateway_rolls_back_subnet() {
        let (service, stack, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        let mut request = network_request("front", "10.1.0.0/16");
        request.no_default_subnet = true;
        networks.create(&request, &cancel).await.unwrap();

        let subnet_request = SubnetCreateRequest {
            name: "web".to_string(),
            cidr: "10.1.1.0/24".to_string(),
            ..Default::default()
        };
        stack.fail_on("search_image", || Error::invalid_request("no such image"));

        let err = networks
            .create_subnet("front", &subnet_request, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(stack.calls_to("delete_subnet").len(), 1);
        assert!(networks.list_subnets("front", &cancel).await.unwrap().is_empty());
        assert!(
            networks
                .inspect_subnet("front", "web", &cancel)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_ha_subnet_shares_a_virtual_ip() {
        let (service, stack, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        let mut request = network_request("front", "10.1.0.0/16");
        request.gateway.ha = true;
        networks.create(&request, &cancel).await.unwrap();

        let subnet = networks.inspect_subnet("front", "front", &cancel).await.unwrap();
        let gateways = subnet.gateways.snapshot();
        assert_eq!(gateways.ids.len(), 2);
        let vip = gateways.vip.unwrap();
        assert_eq!(vip.hosts, gateways.ids);
        assert_eq!(stack.calls_to("bind_host_to_vip").len(), 2);
    }

    #[tokio::test]
    async fn test_ha_without_virtual_ip_falls_back_to_single_gateway() {
        let sandbox = SandboxStack::ephemeral().with_capabilities(Capabilities::default());
        let stack = Arc::new(RecordingStack::new(sandbox));
        let service = Arc::new(Service::new(
            stack.clone(),
            Arc::new(MemoryFolder::new()),
            short_timeouts(),
        ));
        let cancel = CancellationToken::new();
        let mut request = network_request("front", "10.1.0.0/16");
        request.gateway.ha = true;

        service.networks().create(&request, &cancel).await.unwrap();
        let subnet = service
            .networks()
            .inspect_subnet("front", "front", &cancel)
            .await
            .unwrap();
        assert_eq!(subnet.gateways.snapshot().ids.len(), 1);
        assert!(stack.calls_to("create_vip").is_empty());
    }

    #[tokio::test]
    async fn test_subnet_outside_network_range() {
        let (service, stack, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        let mut request = network_request("front", "10.1.0.0/16");
        request.no_default_subnet = true;
        networks.create(&request, &cancel).await.unwrap();

        let subnet_request = SubnetCreateRequest {
            name: "web".to_string(),
            cidr: "10.2.0.0/24".to_string(),
            ..Default::default()
        };
        let err = networks
            .create_subnet("front", &subnet_request, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(stack.calls_to("create_subnet").is_empty());
    }

    #[tokio::test]
    async fn test_subnet_delete_refused_while_hosts_attached() {
        let (service, _, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        networks
            .create(&network_request("front", "10.1.0.0/16"), &cancel)
            .await
            .unwrap();

        let mut host_request = HostCreateRequest::new("app");
        host_request.networks = vec!["front".to_string()];
        let app = service.hosts().create(&host_request, &cancel).await.unwrap();
        // reached through the gateway of the default subnet
        assert!(app.public_ip().is_none());
        let gateway = service.host_store().load("gw-front", &cancel).await.unwrap();
        assert_eq!(
            app.properties.network.snapshot().default_gateway_id,
            gateway.id
        );

        let err = networks.delete_subnet("front", "front", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert!(err.to_string().contains("app"));

        service.hosts().delete("app", &cancel).await.unwrap();
        networks.delete_subnet("front", "front", &cancel).await.unwrap();
        let err = service.host_store().load("gw-front", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(networks.list_subnets("front", &cancel).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_delete_waits_for_provider_after_timeout() {
        let (service, stack, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        let mut request = network_request("front", "10.1.0.0/16");
        request.no_default_subnet = true;
        networks.create(&request, &cancel).await.unwrap();

        // the provider never confirms the deletion
        stack.fail_on("delete_network", || {
            Error::timeout("deletion pending", Duration::from_secs(30), None)
        });
        let err = networks.delete("front", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(stack.calls_to("inspect_network").len() > 1);
        // metadata stays until the network is confirmed gone
        assert!(networks.inspect("front", &cancel).await.is_ok());

        stack.clear_failure("delete_network");
        networks.delete("front", &cancel).await.unwrap();
        assert!(networks.inspect("front", &cancel).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_networks() {
        let (service, _, _) = recording_service();
        let cancel = CancellationToken::new();
        let networks = service.networks();
        for (name, cidr) in [("back", "10.2.0.0/16"), ("front", "10.1.0.0/16")] {
            let mut request = network_request(name, cidr);
            request.no_default_subnet = true;
            networks.create(&request, &cancel).await.unwrap();
        }
        // the single-host network is only visible on the provider
        service
            .hosts()
            .create(&HostCreateRequest::new("solo"), &cancel)
            .await
            .unwrap();

        let recorded: Vec<String> = networks
            .list(false, &cancel)
            .await
            .unwrap()
            .iter()
            .map(|n| n.name.clone())
            .collect();
        assert_eq!(recorded, vec!["back", "front"]);
        assert_eq!(networks.list(true, &cancel).await.unwrap().len(), 3);
        assert_eq!(
            service.hosts().inspect("solo", &cancel).await.unwrap().state(),
            HostState::Started
        );
    }
}
