//! gwas-launch - deployment orchestrator for multi-party secure GWAS
//!
//! Three computing parties and any number of data parties each run on their
//! own cloud machine. gwas-launch keeps per-machine study configuration,
//! derives every role's parameter file, provisions the network peerings the
//! parties need, and drives the two protocol phases while streaming their
//! output.
//!
//! # Architecture
//!
//! - **config**: per-machine configuration store, shared-file loading, validation
//! - **plan**: role parameter sets and the port allocation scheme
//! - **remote**: shell transports, parameter-file writer, input upload
//! - **peering**: network peering reconciliation
//! - **orchestrator**: remote process lifecycle and the two-phase driver
//! - **coordinator**: the operator-facing pipeline tying the above together

pub mod config;
pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod peering;
pub mod plan;
pub mod remote;

// Re-export commonly used types
pub use config::{DeploymentTarget, GwasConfig, Role, RoleSet};
pub use coordinator::Coordinator;
pub use error::{LaunchError, LaunchResult, ValidationError};

/// Result type used throughout gwas-launch
pub type Result<T> = anyhow::Result<T>;
