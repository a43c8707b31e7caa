//! Host lifecycle: create, delete, inspect, list, power actions, resize.

use crate::guard::guarded;
use crate::metadata::validate_name;
use crate::service::Service;
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use safescale_iaas::retry::{self, Retry};
use safescale_iaas::{
    Error, Host, HostRemoteMount, HostRequest, HostState, HostTemplate, Network, NetworkRef,
    NetworkRequest, Result, SINGLE_HOST_NETWORK_CIDR, SINGLE_HOST_NETWORK_NAME,
    SizingRequirements,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Hosts refreshed at the same time by `list`
const LIST_CONCURRENCY: usize = 4;

/// Upper bound of the wait for a rebooted host to come back
const REBOOT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// OS used when the caller does not name one
pub const DEFAULT_IMAGE: &str = "Ubuntu 22.04";

const SSH_USER: &str = "safescale";
const SSH_PORT: u16 = 22;

/// Parameters of a host creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCreateRequest {
    pub name: String,
    /// Networks to join, by ID or name, the first being the default one.
    /// Empty means the implicit single-host network.
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub public_ip: bool,
    #[serde(default)]
    pub sizing: SizingRequirements,
    /// Explicit template, bypassing sizing selection
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_image")]
    pub image: String,
    /// Relax GPU and CPU frequency constraints when selecting a template
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub is_gateway: bool,
    /// Leave the resources in place when creation fails
    #[serde(default)]
    pub keep_on_failure: bool,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

impl HostCreateRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            networks: Vec::new(),
            public_ip: false,
            sizing: SizingRequirements::default(),
            template: None,
            image: default_image(),
            force: false,
            is_gateway: false,
            keep_on_failure: false,
        }
    }
}

/// How to open an SSH session on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub private_key: String,
    /// Hop to go through when the host has no public address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Box<SshConfig>>,
}

/// `user@hostname` of the local operator, recorded as creator.
fn creator() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{}", user, hostname)
}

/// Networks a new host joins.
struct Attachment {
    refs: Vec<NetworkRef>,
    tracked: Vec<Arc<Network>>,
    default_gateway_id: Option<String>,
    public_ip: bool,
}

pub struct HostOrchestrator {
    service: Arc<Service>,
}

impl HostOrchestrator {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    /// Creates a host and waits until it is ready.
    ///
    /// Any failure after the provider created the host deletes it again,
    /// together with its metadata, unless `keep_on_failure` is set.
    pub async fn create(
        &self,
        request: &HostCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Host>> {
        guarded("host create", self.do_create(request, cancel)).await
    }

    async fn do_create(
        &self,
        request: &HostCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<Host>> {
        let name = request.name.trim();
        validate_name(name)?;
        if request.image.trim().is_empty() {
            return Err(Error::invalid_parameter("image", "cannot be empty"));
        }
        tracing::debug!("creating host '{}'", name);

        let store = self.service.host_store();
        let reservation = store.reserve(name)?;

        match self.service.stack().inspect_host(name).await {
            Ok(_) => {
                return Err(Error::logic(format!(
                    "name '{}' already used by another host",
                    name
                )));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.annotate("failed to check host name")),
        }
        if store.is_recorded(name).await? {
            return Err(Error::duplicate(format!(
                "metadata of host '{}' already exist",
                name
            )));
        }

        let attachment = self.resolve_networks(request, cancel).await?;
        let template = self.select_template(request).await?;
        let image = self
            .service
            .templates()
            .resolve_image(&request.image, cancel)
            .await?;
        tracing::debug!(
            "host '{}' will use template {} and image '{}'",
            name,
            template,
            image.name
        );

        let host_request = HostRequest {
            resource_name: name.to_string(),
            template_id: template.id.clone(),
            image_id: image.id.clone(),
            networks: attachment.refs.clone(),
            default_gateway_id: attachment.default_gateway_id.clone(),
            public_ip: attachment.public_ip,
            is_gateway: request.is_gateway,
            key_pair: None,
        };
        let host = self.service.stack().create_host(&host_request).await?;
        tracing::info!("host '{}' created with ID {}", name, host.id);

        // a panic past this point must still remove the host
        let mut metadata_saved = false;
        let outcome = guarded(
            "host setup",
            self.complete_creation(
                &host,
                request,
                &template,
                &attachment,
                &mut metadata_saved,
                cancel,
            ),
        )
        .await;

        if let Err(e) = outcome {
            if request.keep_on_failure {
                tracing::warn!("keeping host '{}' ({}) after failure: {}", name, host.id, e);
                return Err(e);
            }
            return Err(self.rollback_creation(host, metadata_saved, e).await);
        }

        let host = reservation.commit(host)?;
        tracing::info!("host '{}' is ready", host.name);
        Ok(host)
    }

    async fn resolve_networks(
        &self,
        request: &HostCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<Attachment> {
        if request.networks.is_empty() {
            let network = self.single_host_network().await?;
            return Ok(Attachment {
                refs: vec![NetworkRef {
                    id: network.id,
                    name: network.name,
                }],
                tracked: Vec::new(),
                default_gateway_id: None,
                // nothing else routes to this network
                public_ip: true,
            });
        }

        let store = self.service.network_store();
        let mut attachment = Attachment {
            refs: Vec::new(),
            tracked: Vec::new(),
            default_gateway_id: None,
            public_ip: request.public_ip,
        };
        for (index, reference) in request.networks.iter().enumerate() {
            let network = store.load(reference, cancel).await?;
            if index == 0 && !request.is_gateway {
                attachment.default_gateway_id = self.network_gateway(&network, cancel).await?;
            }
            attachment.refs.push(NetworkRef {
                id: network.id.clone(),
                name: network.name.clone(),
            });
            attachment.tracked.push(network);
        }

        if attachment.default_gateway_id.is_none() && !attachment.public_ip && !request.is_gateway {
            return Err(Error::logic(format!(
                "network '{}' has no gateway, the host needs a public IP",
                attachment.refs[0].name
            )));
        }
        Ok(attachment)
    }

    /// Gateway of the network's default subnet: the one named like the
    /// network, or else the first one.
    async fn network_gateway(
        &self,
        network: &Network,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let subnets = network.properties.subnets.snapshot();
        let subnet_id = match subnets.by_name.get(&network.name) {
            Some(id) => id.clone(),
            None => match subnets.by_id.keys().min() {
                Some(id) => id.clone(),
                None => return Ok(None),
            },
        };
        let subnet = self.service.subnet_store().load(&subnet_id, cancel).await?;
        Ok(subnet.gateways.inspect(|g| Ok(g.ids.first().cloned()))?)
    }

    /// The untracked network of single-host deployments, created on first
    /// use directly on the provider.
    async fn single_host_network(&self) -> Result<Network> {
        let stack = self.service.stack();
        match stack.get_network_by_name(SINGLE_HOST_NETWORK_NAME).await {
            Ok(network) => return Ok(network),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let request = NetworkRequest {
            name: SINGLE_HOST_NETWORK_NAME.to_string(),
            cidr: SINGLE_HOST_NETWORK_CIDR.to_string(),
            dns_servers: Vec::new(),
        };
        match stack.create_network(&request).await {
            Ok(network) => {
                tracing::info!("created network '{}'", SINGLE_HOST_NETWORK_NAME);
                Ok(network)
            }
            // created concurrently
            Err(e) if e.status() == Some(409) => {
                stack.get_network_by_name(SINGLE_HOST_NETWORK_NAME).await
            }
            Err(e) => Err(e),
        }
    }

    async fn select_template(&self, request: &HostCreateRequest) -> Result<HostTemplate> {
        let templates = self.service.templates();
        if let Some(reference) = &request.template {
            return templates.find(reference).await;
        }
        templates
            .select(&request.sizing, request.force)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::logic(format!(
                    "no host template matches the requested sizing {:?}",
                    request.sizing
                ))
            })
    }

    async fn complete_creation(
        &self,
        host: &Host,
        request: &HostCreateRequest,
        template: &HostTemplate,
        attachment: &Attachment,
        metadata_saved: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        host.properties.sizing.alter(|s| {
            s.requested = Some(request.sizing.into());
            if s.template.is_empty() {
                s.template = template.id.clone();
            }
            Ok(())
        })?;
        host.properties.description.alter(|d| {
            d.created.get_or_insert_with(Utc::now);
            d.creator = creator();
            if request.is_gateway {
                d.purpose = "gateway".to_string();
            }
            Ok(())
        })?;
        host.properties.network.alter(|n| {
            n.is_gateway = request.is_gateway;
            n.default_network_id = attachment.refs[0].id.clone();
            n.default_gateway_id = attachment.default_gateway_id.clone().unwrap_or_default();
            for net in &attachment.refs {
                n.networks_by_id.insert(net.id.clone(), net.name.clone());
                n.networks_by_name.insert(net.name.clone(), net.id.clone());
            }
            Ok(())
        })?;

        self.service.host_store().save(host).await?;
        *metadata_saved = true;

        self.wait_ready(host, cancel).await?;

        for network in &attachment.tracked {
            let registered = self
                .service
                .network_store()
                .alter(network, |n| {
                    n.properties.hosts.alter(|h| {
                        h.insert(&host.id, &host.name);
                        Ok(())
                    })
                })
                .await;
            if let Err(e) = registered {
                tracing::error!(
                    "failed to register host '{}' in network '{}': {}",
                    host.name,
                    network.name,
                    e
                );
            }
        }
        Ok(())
    }

    async fn wait_ready(&self, host: &Host, cancel: &CancellationToken) -> Result<()> {
        let timeout = self.service.timeouts().readiness();
        tracing::debug!("waiting up to {:?} for host '{}' to be ready", timeout, host.name);

        let probe = self.service.probe();
        retry::while_unsuccessful(
            move || async move { probe.check(host).await.map_err(Retry::from_provider) },
            retry::DEFAULT_DELAY,
            timeout,
            cancel,
        )
        .await
        .map_err(|e| e.annotate(format!("host '{}' is not ready", host.name)))
    }

    /// Deletes what a failed creation left behind and attaches the cleanup
    /// failures to `error`. Runs on its own task so that it completes even
    /// when the caller gives up.
    async fn rollback_creation(&self, host: Host, metadata_saved: bool, error: Error) -> Error {
        tracing::warn!("cleaning up host '{}' after failure: {}", host.name, error);
        let service = self.service.clone();
        let cleanup = tokio::spawn(async move {
            let mut failures = Vec::new();
            let timeout = service.timeouts().host_cleanup();
            match tokio::time::timeout(timeout, service.stack().delete_host(&host.id)).await {
                Ok(Ok(())) => tracing::info!("deleted host '{}' ({})", host.name, host.id),
                Ok(Err(e)) if e.is_not_found() => {}
                Ok(Err(e)) => {
                    tracing::error!("failed to delete host '{}': {}", host.name, e);
                    failures.push(e.annotate(format!("cleanup of host '{}'", host.name)));
                }
                Err(_) => {
                    tracing::error!("deletion of host '{}' timed out", host.name);
                    failures.push(Error::timeout(
                        format!("cleanup of host '{}' timed out", host.name),
                        timeout,
                        None,
                    ));
                }
            }

            if metadata_saved {
                if let Err(e) = service.host_store().delete(&host).await {
                    tracing::error!("failed to delete metadata of host '{}': {}", host.name, e);
                    failures.push(e.annotate(format!("cleanup of host '{}' metadata", host.name)));
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

    /// Deletes a host. Gateways are refused; they go with their subnet.
    pub async fn delete(&self, reference: &str, cancel: &CancellationToken) -> Result<()> {
        guarded("host delete", self.delete_host(reference, false, cancel)).await
    }

    pub(crate) async fn delete_host(
        &self,
        reference: &str,
        allow_gateway: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let store = self.service.host_store();
        let host = store.load(reference, cancel).await?;
        tracing::debug!("deleting host '{}' ({})", host.name, host.id);

        host.properties.shares.inspect(|shares| {
            for share in shares.by_id.values() {
                if !share.clients_by_id.is_empty() {
                    let mut clients: Vec<&str> =
                        share.clients_by_name.keys().map(String::as_str).collect();
                    clients.sort_unstable();
                    return Err(Error::logic(format!(
                        "cannot delete host '{}': share '{}' is mounted by {}",
                        host.name,
                        share.name,
                        clients.join(", ")
                    )));
                }
            }
            Ok(())
        })?;
        host.properties.volumes.inspect(|volumes| {
            if volumes.volumes_by_id.is_empty() {
                return Ok(());
            }
            Err(Error::logic(format!(
                "cannot delete host '{}': {} volume(s) attached",
                host.name,
                volumes.volumes_by_id.len()
            )))
        })?;
        if !allow_gateway && host.properties.network.inspect(|n| Ok(n.is_gateway))? {
            return Err(Error::logic(format!(
                "cannot delete host '{}': it is a gateway, delete its subnet instead",
                host.name
            )));
        }

        let remote_mounts = host.properties.mounts.snapshot().remote_mounts_by_path;
        for (path, mount) in &remote_mounts {
            self.unmount(&host, path, mount, cancel).await?;
        }
        let exports = host.properties.shares.alter(|shares| {
            let count = shares.by_id.len();
            shares.by_id.clear();
            shares.by_name.clear();
            Ok(count)
        })?;
        if !remote_mounts.is_empty() || exports > 0 {
            store.save(&host).await?;
        }

        self.forget_in_networks(&host, cancel).await;

        match self.service.stack().delete_host(&host.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("host {} was already gone on the provider", host.id);
            }
            Err(e) => return Err(e.annotate(format!("failed to delete host '{}'", host.name))),
        }

        store.delete(&host).await?;
        tracing::info!("host '{}' deleted", host.name);
        Ok(())
    }

    /// Removes a share mounted on `host` from the exporting host's clients.
    async fn unmount(
        &self,
        host: &Host,
        path: &str,
        mount: &HostRemoteMount,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let store = self.service.host_store();
        match store.load(&mount.server_id, cancel).await {
            Ok(server) => {
                store
                    .alter(&server, |s| {
                        s.properties.shares.alter(|shares| {
                            if let Some(share) = shares.by_id.get_mut(&mount.share_id) {
                                share.clients_by_id.remove(&host.id);
                                share.clients_by_name.remove(&host.name);
                            }
                            Ok(())
                        })
                    })
                    .await?;
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(
                    "server {} of share mounted on '{}' no longer exists",
                    mount.server_id,
                    path
                );
            }
            Err(e) => return Err(e),
        }

        host.properties.mounts.alter(|m| {
            m.remote_mounts_by_path.remove(path);
            Ok(())
        })?;
        tracing::debug!("unmounted '{}' from host '{}'", path, host.name);
        Ok(())
    }

    async fn forget_in_networks(&self, host: &Host, cancel: &CancellationToken) {
        let network_ids: Vec<String> = host
            .properties
            .network
            .snapshot()
            .networks_by_id
            .into_keys()
            .collect();
        let store = self.service.network_store();
        for id in network_ids {
            let outcome = match store.load(&id, cancel).await {
                Ok(network) => {
                    store
                        .alter(&network, |n| {
                            n.properties.hosts.alter(|h| {
                                h.remove(&host.id);
                                Ok(())
                            })
                        })
                        .await
                }
                // the single-host network has no metadata
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                tracing::error!(
                    "failed to unregister host '{}' from network {}: {}",
                    host.name,
                    id,
                    e
                );
            }
        }
    }

    /// Recorded host refreshed with its provider state and sizing.
    pub async fn inspect(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Host>> {
        guarded("host inspect", async {
            let store = self.service.host_store();
            let host = store.load(reference, cancel).await?;
            let fresh = match self.service.stack().inspect_host(&host.id).await {
                Ok(fresh) => fresh,
                Err(e) if e.is_not_found() => {
                    return Err(Error::NotFound(format!(
                        "host '{}' has metadata but no longer exists on the provider",
                        host.name
                    )));
                }
                Err(e) => return Err(e),
            };

            let sizing = fresh.properties.sizing.snapshot();
            store
                .alter(&host, |h| {
                    h.last_state.set(fresh.state())?;
                    h.properties.sizing.alter(|s| {
                        s.effective = sizing.effective;
                        if !sizing.template.is_empty() {
                            s.template = sizing.template;
                        }
                        Ok(())
                    })
                })
                .await?;
            Ok(host)
        })
        .await
    }

    /// Lists hosts. With `all`, every host the provider knows; otherwise
    /// copies of the recorded ones carrying the state the provider reports.
    /// The records themselves are left as they are.
    pub async fn list(&self, all: bool, cancel: &CancellationToken) -> Result<Vec<Arc<Host>>> {
        guarded("host list", async {
            let stack = self.service.stack();
            if all {
                let hosts = stack.list_hosts(true).await?;
                return Ok(hosts.into_iter().map(Arc::new).collect());
            }

            let recorded = self.service.host_store().list().await?;
            let refresh = futures_util::stream::iter(recorded)
                .map(move |host| async move {
                    let state = match stack.inspect_host(&host.id).await {
                        Ok(fresh) => fresh.state(),
                        Err(e) if e.is_not_found() => HostState::Deleted,
                        Err(e) => {
                            tracing::warn!("failed to refresh host '{}': {}", host.name, e);
                            HostState::Unknown
                        }
                    };
                    let listed = Host::clone(&host);
                    listed.last_state.set(state)?;
                    Ok::<_, Error>(Arc::new(listed))
                })
                .buffer_unordered(LIST_CONCURRENCY)
                .try_collect::<Vec<_>>();

            let mut hosts = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::aborted()),
                hosts = refresh => hosts?,
            };
            hosts.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(hosts)
        })
        .await
    }

    pub async fn start(&self, reference: &str, cancel: &CancellationToken) -> Result<()> {
        guarded("host start", self.change_state(reference, HostState::Started, cancel)).await
    }

    pub async fn stop(&self, reference: &str, cancel: &CancellationToken) -> Result<()> {
        guarded("host stop", self.change_state(reference, HostState::Stopped, cancel)).await
    }

    async fn change_state(
        &self,
        reference: &str,
        target: HostState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let store = self.service.host_store();
        let stack = self.service.stack();
        let host = store.load(reference, cancel).await?;

        match target {
            HostState::Started => stack.start_host(&host.id).await?,
            HostState::Stopped => stack.stop_host(&host.id).await?,
            other => return Err(Error::logic(format!("cannot request state {}", other))),
        }

        let timeout = self.service.timeouts().host_operation();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::aborted()),
            outcome = stack.wait_host_state(&host.id, target, timeout) => outcome?,
        }

        store.alter(&host, |h| h.last_state.set(target)).await?;
        tracing::info!("host '{}' is {}", host.name, target);
        Ok(())
    }

    pub async fn reboot(&self, reference: &str, cancel: &CancellationToken) -> Result<()> {
        guarded("host reboot", async {
            let store = self.service.host_store();
            let stack = self.service.stack();
            let host = store.load(reference, cancel).await?;
            stack.reboot_host(&host.id).await?;

            let (id, name) = (host.id.as_str(), host.name.as_str());
            retry::while_unsuccessful_delay_5s(
                move || async move {
                    let fresh = stack.inspect_host(id).await.map_err(Retry::from_provider)?;
                    match fresh.state() {
                        HostState::Started => Ok(()),
                        HostState::Error => Err(Retry::Stop(Error::infra(format!(
                            "host '{}' went into error state while rebooting",
                            name
                        )))),
                        other => Err(Retry::Again(Error::NotAvailable(format!(
                            "host '{}' is {}",
                            name, other
                        )))),
                    }
                },
                REBOOT_TIMEOUT,
                cancel,
            )
            .await
            .map_err(|e| e.annotate(format!("host '{}' did not come back after reboot", name)))?;

            store.alter(&host, |h| h.last_state.set(HostState::Started)).await?;
            tracing::info!("host '{}' rebooted", host.name);
            Ok(())
        })
        .await
    }

    /// Resizes a host. Shrinking is reported but not prevented.
    pub async fn resize(
        &self,
        reference: &str,
        sizing: SizingRequirements,
        cancel: &CancellationToken,
    ) -> Result<Arc<Host>> {
        guarded("host resize", async {
            let store = self.service.host_store();
            let host = store.load(reference, cancel).await?;

            let recorded = host.properties.sizing.inspect(|s| Ok(s.requested))?;
            if let Some(recorded) = recorded {
                if sizing.is_strictly_below(&recorded) {
                    tracing::warn!(
                        "requested sizing of host '{}' is smaller than the current one in every dimension",
                        host.name
                    );
                }
            }

            let resized = self
                .service
                .stack()
                .resize_host(&host.id, &sizing)
                .await?
                .ok_or_else(|| {
                    Error::inconsistent(format!(
                        "provider returned nothing after resizing host '{}'",
                        host.name
                    ))
                })?;

            let effective = resized.properties.sizing.snapshot();
            store
                .alter(&host, |h| {
                    h.properties.sizing.alter(|s| {
                        s.requested = Some(sizing.into());
                        s.effective = effective.effective;
                        s.template = effective.template;
                        Ok(())
                    })
                })
                .await?;
            tracing::info!("host '{}' resized", host.name);
            Ok(host)
        })
        .await
    }

    /// SSH access to a host, through its gateway when it has no public IP.
    pub async fn ssh_config(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<SshConfig> {
        guarded("host ssh", async {
            let store = self.service.host_store();
            let host = store.load(reference, cancel).await?;

            if let Some(address) = host.public_ip() {
                return Ok(SshConfig {
                    user: SSH_USER.to_string(),
                    host: address,
                    port: SSH_PORT,
                    private_key: host.private_key.clone(),
                    gateway: None,
                });
            }

            let address = host.private_ip().ok_or_else(|| {
                Error::inconsistent(format!("host '{}' has no IP address", host.name))
            })?;
            let gateway_id = host.properties.network.inspect(|n| Ok(n.default_gateway_id.clone()))?;
            if gateway_id.is_empty() {
                return Err(Error::logic(format!(
                    "host '{}' has neither a public IP nor a gateway",
                    host.name
                )));
            }
            let gateway = store.load(&gateway_id, cancel).await?;
            let gateway_address = gateway.public_ip().ok_or_else(|| {
                Error::inconsistent(format!("gateway '{}' has no public IP", gateway.name))
            })?;

            Ok(SshConfig {
                user: SSH_USER.to_string(),
                host: address,
                port: SSH_PORT,
                private_key: host.private_key.clone(),
                gateway: Some(Box::new(SshConfig {
                    user: SSH_USER.to_string(),
                    host: gateway_address,
                    port: SSH_PORT,
                    private_key: gateway.private_key.clone(),
                    gateway: None,
                })),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::recording_service;
    use safescale_iaas::{ErrorKind, HostShare, HostVolume, MetadataFolder, ProviderStack};

    #[tokio::test]
    async fn test_create_on_single_host_network() {
        let (service, stack, _) = recording_service();
        let cancel = CancellationToken::new();

        let host = service
            .hosts()
            .create(&HostCreateRequest::new("web"), &cancel)
            .await
            .unwrap();

        assert_eq!(host.state(), HostState::Started);
        assert!(host.public_ip().is_some());
        let network = host.properties.network.snapshot();
        assert_eq!(network.networks_by_name.len(), 1);
        assert!(network.networks_by_name.contains_key(SINGLE_HOST_NETWORK_NAME));
        // the single-host network is not tracked
        assert!(
            service
                .network_store()
                .load(SINGLE_HOST_NETWORK_NAME, &cancel)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert_eq!(stack.calls_to("create_network").len(), 1);

        let sizing = host.properties.sizing.snapshot();
        assert!(sizing.requested.is_some());
        assert_eq!(sizing.template, "tpl-s1.tiny");
        assert!(host.properties.description.snapshot().creator.contains('@'));

        // reachable by name once committed
        let loaded = service.host_store().load("web", &cancel).await.unwrap();
        assert!(Arc::ptr_eq(&loaded, &host));
    }

    #[tokio::test]
    async fn test_create_twice_is_refused() {
        let (service, _, _) = recording_service();
        let cancel = CancellationToken::new();
        let hosts = service.hosts();
        hosts
            .create(&HostCreateRequest::new("web"), &cancel)
            .await
            .unwrap();

        let err = hosts
            .create(&HostCreateRequest::new("web"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
    }

    #[tokio::test]
    async fn test_create_without_matching_template() {
        let (service, stack, _) = recording_service();
        let mut request = HostCreateRequest::new("big");
        request.sizing.min_cores = 512;

        let err = service
            .hosts()
            .create(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert!(stack.calls_to("create_host").is_empty());
        // the name is usable again
        assert!(!service.host_store().cache().is_reserved("big"));
    }

    #[tokio::test]
    async fn test_create_with_explicit_template() {
        let (service, _, _) = recording_service();
        let mut request = HostCreateRequest::new("gpu");
        request.template = Some("g4.large".to_string());

        let host = service
            .hosts()
            .create(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(host.properties.sizing.snapshot().effective.gpu_number, 1);
    }

    #[tokio::test]
    async fn test_delete_refuses_exported_share_in_use() {
        let (service, stack, _) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        let host = hosts
            .create(&HostCreateRequest::new("nfs"), &cancel)
            .await
            .unwrap();
        service
            .host_store()
            .alter(&host, |h| {
                h.properties.shares.alter(|s| {
                    let mut share = HostShare {
                        id: "share-1".into(),
                        name: "data".into(),
                        path: "/data".into(),
                        ..Default::default()
                    };
                    share.clients_by_id.insert("srv-2".into(), "client".into());
                    share.clients_by_name.insert("client".into(), "srv-2".into());
                    s.by_name.insert("data".into(), "share-1".into());
                    s.by_id.insert("share-1".into(), share);
                    Ok(())
                })
            })
            .await
            .unwrap();

        let err = hosts.delete("nfs", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert!(err.to_string().contains("client"));
        assert!(stack.calls_to("delete_host").is_empty());
    }

    #[tokio::test]
    async fn test_delete_releases_mounted_shares() {
        let (service, _, _) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        let server = hosts
            .create(&HostCreateRequest::new("nfs"), &cancel)
            .await
            .unwrap();
        let client = hosts
            .create(&HostCreateRequest::new("client"), &cancel)
            .await
            .unwrap();

        let store = service.host_store();
        store
            .alter(&server, |h| {
                h.properties.shares.alter(|s| {
                    let mut share = HostShare {
                        id: "share-1".into(),
                        name: "data".into(),
                        path: "/data".into(),
                        ..Default::default()
                    };
                    share.clients_by_id.insert(client.id.clone(), client.name.clone());
                    share.clients_by_name.insert(client.name.clone(), client.id.clone());
                    s.by_id.insert("share-1".into(), share);
                    Ok(())
                })
            })
            .await
            .unwrap();
        store
            .alter(&client, |h| {
                h.properties.mounts.alter(|m| {
                    m.remote_mounts_by_path.insert(
                        "/mnt/data".into(),
                        HostRemoteMount {
                            share_id: "share-1".into(),
                            server_id: server.id.clone(),
                            export: "/data".into(),
                            path: "/mnt/data".into(),
                            fs_type: "nfs".into(),
                        },
                    );
                    Ok(())
                })
            })
            .await
            .unwrap();

        hosts.delete("client", &cancel).await.unwrap();
        let share = server.properties.shares.snapshot().by_id["share-1"].clone();
        assert!(share.clients_by_id.is_empty());

        // nobody mounts the share anymore
        hosts.delete("nfs", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_refuses_attached_volume() {
        let (service, stack, _) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        let host = hosts
            .create(&HostCreateRequest::new("db"), &cancel)
            .await
            .unwrap();
        service
            .host_store()
            .alter(&host, |h| {
                h.properties.volumes.alter(|v| {
                    v.volumes_by_id.insert(
                        "vol-1".into(),
                        HostVolume {
                            attach_id: "att-1".into(),
                            device: "/dev/vdb".into(),
                        },
                    );
                    Ok(())
                })
            })
            .await
            .unwrap();

        let err = hosts.delete("db", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert!(stack.calls_to("delete_host").is_empty());
        assert!(service.host_store().load("db", &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_stale_metadata() {
        let (service, stack, _) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        let host = hosts
            .create(&HostCreateRequest::new("ghost"), &cancel)
            .await
            .unwrap();
        stack.sandbox().delete_host(&host.id).await.unwrap();

        let err = hosts.inspect("ghost", &cancel).await.unwrap_err();
        assert!(err.is_not_found());

        let listed = hosts.list(false, &cancel).await.unwrap();
        assert_eq!(listed[0].state(), HostState::Deleted);

        hosts.delete("ghost", &cancel).await.unwrap();
        let err = service.host_store().load("ghost", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_leaves_records_untouched() {
        let (service, stack, folder) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        let host = hosts
            .create(&HostCreateRequest::new("web"), &cancel)
            .await
            .unwrap();
        stack.sandbox().delete_host(&host.id).await.unwrap();

        let listed = hosts.list(false, &cancel).await.unwrap();
        assert_eq!(listed[0].state(), HostState::Deleted);
        assert!(!Arc::ptr_eq(&listed[0], &host));

        // an unrelated save does not persist the listed state
        assert_eq!(host.state(), HostState::Started);
        service.host_store().save(&host).await.unwrap();
        let bytes = folder.read("hosts/byName", "web").await.unwrap();
        let recorded: Host = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(recorded.state(), HostState::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waiting_on_reserved_name_is_aborted() {
        let (service, stack, _) = recording_service();
        let _in_flight = service.host_store().reserve("web").unwrap();
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            });
        }

        let start = tokio::time::Instant::now();
        let err = service.hosts().delete("web", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(stack.calls_to("delete_host").is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_path_like_name() {
        let (service, stack, folder) = recording_service();
        for name in ["web/01", "..", "back\\slash"] {
            let err = service
                .hosts()
                .create(&HostCreateRequest::new(name), &CancellationToken::new())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter, "{}", name);
        }
        assert!(stack.calls_to("inspect_host").is_empty());
        assert!(stack.calls_to("create_host").is_empty());
        assert!(folder.names("hosts/byName").is_empty());
    }

    #[tokio::test]
    async fn test_stop_then_start() {
        let (service, _, _) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        hosts
            .create(&HostCreateRequest::new("web"), &cancel)
            .await
            .unwrap();

        hosts.stop("web", &cancel).await.unwrap();
        let host = hosts.inspect("web", &cancel).await.unwrap();
        assert_eq!(host.state(), HostState::Stopped);

        hosts.start("web", &cancel).await.unwrap();
        let host = hosts.inspect("web", &cancel).await.unwrap();
        assert_eq!(host.state(), HostState::Started);

        hosts.reboot("web", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_reboot_failure_is_reported() {
        let (service, stack, _) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        hosts
            .create(&HostCreateRequest::new("web"), &cancel)
            .await
            .unwrap();
        stack.fail_on("reboot_host", || Error::infra_status("busy", 503));

        let err = hosts.reboot("web", &cancel).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(stack.calls_to("inspect_host").len() <= 1);
    }

    #[tokio::test]
    async fn test_ssh_config_through_gateway() {
        let (service, _, _) = recording_service();
        let hosts = service.hosts();
        let cancel = CancellationToken::new();
        let gateway = hosts
            .create(&HostCreateRequest::new("gw"), &cancel)
            .await
            .unwrap();

        let direct = hosts.ssh_config("gw", &cancel).await.unwrap();
        assert_eq!(Some(direct.host.clone()), gateway.public_ip());
        assert!(direct.gateway.is_none());

        // a host without public address goes through its gateway
        let inner = Host::new("srv-inner", "inner");
        inner
            .properties
            .network
            .alter(|n| {
                n.default_network_id = "net-1".into();
                n.default_gateway_id = gateway.id.clone();
                n.ipv4_addresses.insert("net-1".into(), "10.0.0.7".into());
                Ok(())
            })
            .unwrap();
        service.host_store().save(&inner).await.unwrap();

        let config = hosts.ssh_config("inner", &cancel).await.unwrap();
        assert_eq!(config.host, "10.0.0.7");
        assert_eq!(config.user, "safescale");
        assert_eq!(config.gateway.unwrap().host, direct.host);
    }
}
