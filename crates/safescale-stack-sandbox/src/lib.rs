//! Sandbox provider stack for SafeScale
//!
//! This crate implements the ProviderStack trait without any cloud behind
//! it: hosts, networks, subnets and addresses live in memory and can be
//! persisted to a JSON state file, so the CLI can be used locally and the
//! lifecycle engine can be tested end to end.
//!
//! # Features
//!
//! - Static template and image catalog
//! - Address allocation inside network ranges
//! - Immediate state transitions, with hooks to force a host state
//! - Provider-like errors (not found, conflict, bad request)
//!
//! # Example
//!
//! ```ignore
//! use safescale_iaas::ProviderStack;
//! use safescale_stack_sandbox::SandboxStack;
//!
//! let stack = SandboxStack::open("/tmp/sandbox.json").await?;
//! let templates = stack.list_templates().await?;
//! ```

pub mod catalog;
pub mod error;
pub mod provider;
pub mod state;

pub use error::{Result, SandboxError};
pub use provider::SandboxStack;
pub use state::{SandboxState, StateFile};
