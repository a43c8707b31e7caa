//! Dependencies shared by the orchestrators of one tenant.

use crate::host::HostOrchestrator;
use crate::metadata::MetadataStore;
use crate::network::NetworkOrchestrator;
use crate::readiness::{Immediate, ReadinessProbe};
use crate::templates::TemplateRepository;
use safescale_config::Timeouts;
use safescale_iaas::{Host, MetadataFolder, Network, ProviderStack, Subnet};
use std::sync::Arc;

/// Provider stack, metadata stores and settings of a tenant.
///
/// Built once at startup and shared behind an `Arc`; every orchestrator
/// borrows it instead of reaching for process-wide state.
pub struct Service {
    stack: Arc<dyn ProviderStack>,
    hosts: MetadataStore<Host>,
    networks: MetadataStore<Network>,
    subnets: MetadataStore<Subnet>,
    templates: TemplateRepository,
    probe: Arc<dyn ReadinessProbe>,
    timeouts: Timeouts,
}

impl Service {
    pub fn new(
        stack: Arc<dyn ProviderStack>,
        folder: Arc<dyn MetadataFolder>,
        timeouts: Timeouts,
    ) -> Self {
        let metadata_timeout = timeouts.metadata();
        Self {
            templates: TemplateRepository::new(stack.clone()),
            hosts: MetadataStore::new(folder.clone(), metadata_timeout),
            networks: MetadataStore::new(folder.clone(), metadata_timeout),
            subnets: MetadataStore::new(folder, metadata_timeout),
            probe: Arc::new(Immediate),
            stack,
            timeouts,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn stack(&self) -> &Arc<dyn ProviderStack> {
        &self.stack
    }

    pub fn host_store(&self) -> &MetadataStore<Host> {
        &self.hosts
    }

    pub fn network_store(&self) -> &MetadataStore<Network> {
        &self.networks
    }

    pub fn subnet_store(&self) -> &MetadataStore<Subnet> {
        &self.subnets
    }

    pub fn templates(&self) -> &TemplateRepository {
        &self.templates
    }

    pub fn probe(&self) -> &Arc<dyn ReadinessProbe> {
        &self.probe
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn hosts(self: &Arc<Self>) -> HostOrchestrator {
        HostOrchestrator::new(self.clone())
    }

    pub fn networks(self: &Arc<Self>) -> NetworkOrchestrator {
        NetworkOrchestrator::new(self.clone())
    }
}
