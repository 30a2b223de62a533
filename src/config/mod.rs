//! Configuration module
//!
//! Handles the per-target GWAS configuration, the shared configuration file,
//! the launcher settings file, CLI parsing, and validation.

pub mod cli;
pub mod field;
pub mod shared;
pub mod store;
pub mod toml;
pub mod validator;

use crate::error::ValidationError;
use crate::plan::ports::PortBases;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Machine a configuration is deployed to
///
/// Identified by the cloud project, zone and instance name. Parsed from and
/// displayed as `project/zone/instance`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub project: String,
    pub zone: String,
    pub instance: String,
}

impl DeploymentTarget {
    pub fn new(project: impl Into<String>, zone: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            instance: instance.into(),
        }
    }
}

impl FromStr for DeploymentTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [project, zone, instance]
                if !project.is_empty() && !zone.is_empty() && !instance.is_empty() =>
            {
                Ok(Self::new(*project, *zone, *instance))
            }
            _ => Err(ValidationError::MalformedTarget(s.to_string())),
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.instance)
    }
}

/// Protocol role enacted by a machine
///
/// The three computing parties have ids 0-2; every data party shares id 3 on
/// its own machine (its dataset index is `sRole`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Cp0,
    Cp1,
    Cp2,
    DataParty,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Cp0, Role::Cp1, Role::Cp2, Role::DataParty];

    /// Numeric id used in parameter file names and protocol binaries
    pub fn id(self) -> u32 {
        match self {
            Role::Cp0 => 0,
            Role::Cp1 => 1,
            Role::Cp2 => 2,
            Role::DataParty => 3,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Role::Cp0),
            1 => Some(Role::Cp1),
            2 => Some(Role::Cp2),
            3 => Some(Role::DataParty),
            _ => None,
        }
    }

    /// Computing-party role for a `cpRole` value
    pub fn computing(cp_role: u32) -> Option<Self> {
        match cp_role {
            0..=2 => Self::from_id(cp_role),
            _ => None,
        }
    }

    pub fn is_computing(self) -> bool {
        self != Role::DataParty
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CP0" | "0" => Ok(Role::Cp0),
            "CP1" | "1" => Ok(Role::Cp1),
            "CP2" | "2" => Ok(Role::Cp2),
            "S" | "3" => Ok(Role::DataParty),
            _ => Err(ValidationError::UnknownRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Cp0 => write!(f, "CP0"),
            Role::Cp1 => write!(f, "CP1"),
            Role::Cp2 => write!(f, "CP2"),
            Role::DataParty => write!(f, "S"),
        }
    }
}

/// Roles a single machine enacts, in ascending id order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleSet(Vec<Role>);

impl RoleSet {
    /// `{cpRole?, S if sRole set}`
    pub fn from_parts(cp_role: Option<Role>, data_party: bool) -> Self {
        let mut roles = Vec::with_capacity(2);
        if let Some(cp) = cp_role {
            roles.push(cp);
        }
        if data_party {
            roles.push(Role::DataParty);
        }
        Self(roles)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// The computing-party role, if any
    pub fn computing(&self) -> Option<Role> {
        self.0.iter().copied().find(|r| r.is_computing())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(|r| r.to_string()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Mutable GWAS configuration for one deployment target
///
/// Scalar integer fields are optional so that a field can be cleared by an
/// empty submission; consumption-time validation reports them as missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GwasConfig {
    /// Network address of CP0..CP2
    pub ip_addr: [String; 3],
    /// Computing-party role this machine enacts (0-2)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_role: Option<u32>,
    /// Dataset index of the data party this machine enacts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s_role: Option<u32>,
    /// Cloud projects owning CP0..CP2
    pub proj: [String; 3],
    /// Cloud projects owning each data party
    pub proj3: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_s: Option<u32>,
    /// Individual count per dataset
    pub num_inds: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_snps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_covs: Option<u64>,
    pub num_chunks: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntl_num_threads: Option<u32>,
    /// Per-channel starting ports
    pub port_bases: PortBases,
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

fn joined<T: fmt::Display>(values: &[T]) -> String {
    if values.is_empty() {
        return "-".to_string();
    }
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

impl fmt::Display for GwasConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Roles: cpRole={}, sRole={}", opt(&self.cp_role), opt(&self.s_role))?;
        for (i, addr) in self.ip_addr.iter().enumerate() {
            writeln!(f, "  P{} address: {}", i, if addr.is_empty() { "-" } else { addr })?;
        }
        for (i, proj) in self.proj.iter().enumerate() {
            writeln!(f, "  P{} project: {}", i, if proj.is_empty() { "-" } else { proj })?;
        }
        writeln!(f, "  Data party projects: {}", joined(&self.proj3))?;
        writeln!(f, "  Datasets: numS={}, numInds={}", opt(&self.num_s), joined(&self.num_inds))?;
        writeln!(
            f,
            "  Study: numSnps={}, numCovs={}, numChunks={}",
            opt(&self.num_snps),
            opt(&self.num_covs),
            joined(&self.num_chunks)
        )?;
        writeln!(
            f,
            "  Threads: numThreads={}, ntlNumThreads={}",
            opt(&self.num_threads),
            opt(&self.ntl_num_threads)
        )?;
        write!(f, "  Port bases: {}", self.port_bases)
    }
}
