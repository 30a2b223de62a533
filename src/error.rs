//! Error taxonomy
//!
//! Validation problems never touch remote state. Remote-side failures carry the
//! deployment target they happened on so the operator knows what to re-run.

use crate::config::{DeploymentTarget, Role};
use crate::orchestrator::Phase;
use std::path::PathBuf;

/// Malformed or out-of-range configuration, raised before any remote mutation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("sRole {s_role} out of range: must be below numS ({num_s})")]
    DataPartyOutOfRange { s_role: u32, num_s: u32 },

    #[error("cpRole {0} out of range: must be 0, 1 or 2")]
    ComputingPartyOutOfRange(u32),

    #[error("numS must be positive")]
    NoDatasets,

    #[error("numInds has {actual} entries but numS is {expected}")]
    DatasetCountMismatch { expected: usize, actual: usize },

    #[error("{0} must be positive")]
    ZeroThreads(&'static str),

    #[error("port {port} is assigned to more than one channel/dataset pair")]
    PortCollision { port: u64 },

    #[error("port {port} for {channel} dataset {dataset} exceeds 65535")]
    PortOutOfRange { channel: &'static str, dataset: usize, port: u64 },

    #[error("address of P{0} is required by this machine's roles but is empty")]
    MissingAddress(usize),

    #[error("project of {0} is required for peering but is empty")]
    MissingProject(String),

    #[error("no configuration stored for {0}")]
    UnknownTarget(DeploymentTarget),

    #[error("machine enacts no role: set cpRole and/or sRole")]
    NoRoles,

    #[error("invalid value {token:?} for {field}")]
    InvalidToken { field: &'static str, token: String },

    #[error("unknown role {0:?}: expected CP0, CP1, CP2, S or 0-3")]
    UnknownRole(String),

    #[error("shared config line {line}: {reason}")]
    MalformedSharedConfig { line: usize, reason: String },

    #[error("invalid deployment target {0:?}: expected project/zone/instance")]
    MalformedTarget(String),

    #[error("input file not found: {}", .0.display())]
    MissingInputFile(PathBuf),
}

/// Errors surfaced by remote operations
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Parameter substitution batch could not be delivered. Re-running the
    /// writer is safe.
    #[error("failed to write {role} parameters on {target}: {reason}")]
    RemoteWrite {
        target: DeploymentTarget,
        role: Role,
        reason: String,
    },

    /// A remote process stream closed before the completion sentinel.
    #[error("{phase} process for {role} on {target} stopped before completion")]
    ProcessStream {
        target: DeploymentTarget,
        phase: Phase,
        role: Role,
    },

    /// Cloud network/peering operation rejected. Reconciliation can be re-run.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// The remote execution channel itself failed (spawn, copy, non-zero exit).
    #[error("remote execution on {target} failed: {reason}")]
    Transport {
        target: DeploymentTarget,
        reason: String,
    },
}

/// Result alias for operations that surface the typed taxonomy
pub type LaunchResult<T> = std::result::Result<T, LaunchError>;
