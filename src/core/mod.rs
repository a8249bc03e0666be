//! Core domain models for provisioning
//!
//! This module defines the steps, the shared run context, the installer
//! configuration, and the two pure building blocks every run relies on:
//! directive patching and device identity.

pub mod config;
pub mod context;
pub mod directive;
pub mod error;
pub mod identity;
pub mod state;
pub mod step;

pub use config::InstallerConfig;
pub use context::*;
pub use directive::{ConfigDirective, LinePatcher, MutationOutcome};
pub use error::ProvisionError;
pub use identity::{DeviceIdentity, IdentityDeriver};
pub use state::*;
pub use step::*;
