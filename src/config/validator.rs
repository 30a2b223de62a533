//! Configuration validation
//!
//! Runs when a configuration is consumed (planning, pushing, peering, running)
//! and before any remote state is touched.

use super::{GwasConfig, Role, RoleSet};
use crate::error::ValidationError;
use crate::plan::ports::PortAllocator;

/// Configuration that passed [`validate_config`]
///
/// All required scalars are present and the machine enacts at least one role.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    config: GwasConfig,
    roles: RoleSet,
    data_party: Option<usize>,
    num_datasets: usize,
    num_snps: u64,
    num_covs: u64,
    num_threads: u32,
    ntl_num_threads: u32,
}

impl ValidatedConfig {
    pub fn config(&self) -> &GwasConfig {
        &self.config
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Dataset index of the data party on this machine
    pub fn data_party(&self) -> Option<usize> {
        self.data_party
    }

    pub fn num_datasets(&self) -> usize {
        self.num_datasets
    }

    pub fn num_snps(&self) -> u64 {
        self.num_snps
    }

    pub fn num_covs(&self) -> u64 {
        self.num_covs
    }

    pub fn num_threads(&self) -> u32 {
        self.num_threads
    }

    pub fn ntl_num_threads(&self) -> u32 {
        self.ntl_num_threads
    }

    pub fn allocator(&self) -> PortAllocator {
        PortAllocator::new(self.config.port_bases, self.num_threads)
    }

    /// Address of computing party `party`
    pub fn address(&self, party: usize) -> &str {
        &self.config.ip_addr[party]
    }
}

fn required<T: Copy>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField(field))
}

/// Computing-party addresses a role's parameter file needs
pub fn required_addresses(role: Role) -> &'static [usize] {
    match role {
        Role::Cp0 => &[],
        Role::Cp1 => &[0],
        Role::Cp2 => &[0, 1],
        Role::DataParty => &[1, 2],
    }
}

/// Validate complete configuration
pub fn validate_config(config: &GwasConfig) -> Result<ValidatedConfig, ValidationError> {
    let num_s = required(config.num_s, "numS")?;
    if num_s == 0 {
        return Err(ValidationError::NoDatasets);
    }

    let cp_role = match config.cp_role {
        Some(cp) => Some(Role::computing(cp).ok_or(ValidationError::ComputingPartyOutOfRange(cp))?),
        None => None,
    };

    if let Some(s_role) = config.s_role {
        if s_role >= num_s {
            return Err(ValidationError::DataPartyOutOfRange { s_role, num_s });
        }
    }

    let roles = RoleSet::from_parts(cp_role, config.s_role.is_some());
    if roles.is_empty() {
        return Err(ValidationError::NoRoles);
    }

    let num_datasets = num_s as usize;
    if config.num_inds.len() != num_datasets {
        return Err(ValidationError::DatasetCountMismatch {
            expected: num_datasets,
            actual: config.num_inds.len(),
        });
    }

    let num_snps = required(config.num_snps, "numSnps")?;
    let num_covs = required(config.num_covs, "numCovs")?;
    if config.num_chunks.is_empty() {
        return Err(ValidationError::MissingField("numChunks"));
    }

    let num_threads = required(config.num_threads, "numThreads")?;
    if num_threads == 0 {
        return Err(ValidationError::ZeroThreads("numThreads"));
    }
    let ntl_num_threads = required(config.ntl_num_threads, "ntlNumThreads")?;
    if ntl_num_threads == 0 {
        return Err(ValidationError::ZeroThreads("ntlNumThreads"));
    }

    for role in roles.iter() {
        for &party in required_addresses(role) {
            if config.ip_addr[party].trim().is_empty() {
                return Err(ValidationError::MissingAddress(party));
            }
        }
    }

    PortAllocator::new(config.port_bases, num_threads).check(num_datasets)?;

    Ok(ValidatedConfig {
        config: config.clone(),
        roles,
        data_party: config.s_role.map(|s| s as usize),
        num_datasets,
        num_snps,
        num_covs,
        num_threads,
        ntl_num_threads,
    })
}
