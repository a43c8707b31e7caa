//! SafeScale lifecycle engine
//!
//! Keeps one [`ResourceCache`] per resource kind in front of the persisted
//! metadata, and drives multi-step provider operations with compensating
//! rollback.
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │           Service            │
//!            │ stack · stores · templates   │
//!            └──────┬───────────────┬───────┘
//!                   │               │
//!      ┌────────────▼─────┐   ┌─────▼──────────────┐
//!      │ HostOrchestrator │◄──┤ NetworkOrchestrator│
//!      └────────┬─────────┘   └─────────┬──────────┘
//!               │                       │
//!      ┌────────▼───────────────────────▼──────────┐
//!      │     MetadataStore<T>  ──►  ResourceCache  │
//!      └────────────────────┬──────────────────────┘
//!                           │
//!                  MetadataFolder / ProviderStack
//! ```

pub mod cache;
pub mod guard;
pub mod host;
pub mod metadata;
pub mod network;
pub mod readiness;
pub mod service;
pub mod templates;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cache::{Cacheable, Reservation, ResourceCache};
pub use host::{HostCreateRequest, HostOrchestrator, SshConfig};
pub use metadata::{MetadataStore, Resource};
pub use network::{GatewayOptions, NetworkCreateRequest, NetworkOrchestrator, SubnetCreateRequest};
pub use readiness::{Immediate, ReadinessProbe, TcpProbe};
pub use service::Service;
pub use templates::TemplateRepository;
