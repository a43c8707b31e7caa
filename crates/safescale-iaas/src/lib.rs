//! SafeScale IaaS abstraction
//!
//! Provider-independent resource model and the capabilities the lifecycle
//! engine consumes: a [`ProviderStack`] per cloud vendor and a
//! [`MetadataFolder`] holding serialized resource records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 safescale-core                   │
//! │       (cache, metadata, host/network ops)        │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 safescale-iaas                   │
//! │  ┌──────────────────┐  ┌────────────────────┐   │
//! │  │  ProviderStack   │  │   MetadataFolder   │   │
//! │  └──────────────────┘  └────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────┐  ┌──────────┐   │
//! │  │ Host/Network │  │  Errors  │  │  Retry   │   │
//! │  └──────────────┘  └──────────┘  └──────────┘   │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │    sandbox    │ │  LocalFolder  │
//! │     stack     │ │  (files)      │
//! └───────────────┘ └───────────────┘
//! ```

pub mod error;
pub mod folder;
pub mod model;
pub mod retry;
pub mod stack;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use folder::{BrowseCallback, LocalFolder, MetadataFolder};
pub use model::*;
pub use retry::Retry;
pub use stack::{
    Capabilities, HostRequest, NetworkRef, NetworkRequest, ProviderStack, SubnetRequest,
    VirtualIPRequest,
};
