//! Role parameter planning
//!
//! Maps a validated configuration and one role to the exact key/value lines
//! that role's parameter file must contain. No remote IO happens here.

pub mod ports;

use crate::config::validator::ValidatedConfig;
use crate::config::Role;
use ports::{cache_prefix, Channel, SNP_POS_FILE};
use std::fmt;

/// Parameter file keys
pub mod keys {
    pub const NUM_INDS: &str = "NUM_INDS";
    pub const NUM_SNPS: &str = "NUM_SNPS";
    pub const NUM_COVS: &str = "NUM_COVS";
    pub const NUM_CHUNKS: &str = "NUM_CHUNKS";
    pub const NUM_THREADS: &str = "NUM_THREADS";
    pub const NTL_NUM_THREADS: &str = "NTL_NUM_THREADS";
    pub const IP_ADDR: [&str; 3] = ["IP_ADDR_P0", "IP_ADDR_P1", "IP_ADDR_P2"];
    pub const SNP_POS_FILE: &str = "SNP_POS_FILE";
    pub const CACHE_FILE_PREFIX: &str = "CACHE_FILE_PREFIX";
}

/// Ordered key/value lines for one role's parameter file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleParameterSet {
    role: Role,
    entries: Vec<(String, String)>,
}

impl RoleParameterSet {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            entries: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for RoleParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{} {}", key, value)?;
        }
        Ok(())
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

/// Channels whose ports a role's parameter file carries
pub fn role_channels(role: Role) -> &'static [Channel] {
    match role {
        Role::Cp0 => &[Channel::P0P1, Channel::P0P2],
        Role::Cp1 => &[Channel::P0P1, Channel::P1P2, Channel::P1P3],
        Role::Cp2 => &[Channel::P0P2, Channel::P1P2, Channel::P2P3],
        // The data party rendezvouses on the P1-P2 listening ports
        Role::DataParty => &[Channel::P1P2, Channel::P2P3],
    }
}

/// Plan the parameter lines for `role`
pub fn plan(config: &ValidatedConfig, role: Role) -> RoleParameterSet {
    let raw = config.config();
    let mut set = RoleParameterSet::new(role);

    set.push(keys::NUM_INDS, join(&raw.num_inds));
    set.push(keys::NUM_SNPS, config.num_snps().to_string());
    set.push(keys::NUM_COVS, config.num_covs().to_string());
    set.push(keys::NUM_CHUNKS, join(&raw.num_chunks));
    set.push(keys::NUM_THREADS, config.num_threads().to_string());
    set.push(keys::NTL_NUM_THREADS, config.ntl_num_threads().to_string());

    let allocator = config.allocator();
    for channel in role_channels(role) {
        set.push(
            channel.key(),
            join(&allocator.channel_ports(*channel, config.num_datasets())),
        );
    }

    for &party in crate::config::validator::required_addresses(role) {
        set.push(keys::IP_ADDR[party], config.address(party));
    }

    if role.is_computing() {
        set.push(keys::SNP_POS_FILE, SNP_POS_FILE);
        let prefixes: Vec<String> = (0..config.num_datasets())
            .map(|i| cache_prefix(i, role))
            .collect();
        set.push(keys::CACHE_FILE_PREFIX, prefixes.join(" "));
    }

    set
}

/// Plan every role the machine enacts
pub fn plan_machine(config: &ValidatedConfig) -> Vec<RoleParameterSet> {
    config.roles().iter().map(|role| plan(config, role)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validator::tests::study_config;
    use crate::config::validator::validate_config;
    use std::collections::BTreeSet;

    const SHARED: [&str; 6] = [
        "NUM_INDS",
        "NUM_SNPS",
        "NUM_COVS",
        "NUM_CHUNKS",
        "NUM_THREADS",
        "NTL_NUM_THREADS",
    ];

    fn key_set(set: &RoleParameterSet) -> BTreeSet<String> {
        set.keys().map(String::from).collect()
    }

    fn expected(extra: &[&str]) -> BTreeSet<String> {
        SHARED.iter().chain(extra).map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cp1_scenario() {
        let validated = validate_config(&study_config()).unwrap();
        let set = plan(&validated, Role::Cp1);

        assert_eq!(set.get("PORT_P0_P1"), Some("8000 8040"));
        assert_eq!(set.get("PORT_P1_P2"), Some("8001 8041"));
        assert_eq!(set.get("PORT_P1_P3"), Some("8002 8042"));
        assert_eq!(set.get("IP_ADDR_P0"), Some("10.0.0.2"));
        assert_eq!(set.get("NUM_INDS"), Some("1000 1200"));
        assert_eq!(set.get("NUM_CHUNKS"), Some("10 12"));
        assert_eq!(set.get("CACHE_FILE_PREFIX"), Some("../cache/ds0_p1 ../cache/ds1_p1"));
    }

    #[test]
    fn test_exact_key_sets() {
        let validated = validate_config(&study_config()).unwrap();

        assert_eq!(
            key_set(&plan(&validated, Role::Cp0)),
            expected(&["PORT_P0_P1", "PORT_P0_P2", "SNP_POS_FILE", "CACHE_FILE_PREFIX"])
        );
        assert_eq!(
            key_set(&plan(&validated, Role::Cp1)),
            expected(&[
                "PORT_P0_P1",
                "PORT_P1_P2",
                "PORT_P1_P3",
                "IP_ADDR_P0",
                "SNP_POS_FILE",
                "CACHE_FILE_PREFIX",
            ])
        );
        assert_eq!(
            key_set(&plan(&validated, Role::Cp2)),
            expected(&[
                "PORT_P0_P2",
                "PORT_P1_P2",
                "PORT_P2_P3",
                "IP_ADDR_P0",
                "IP_ADDR_P1",
                "SNP_POS_FILE",
                "CACHE_FILE_PREFIX",
            ])
        );
        assert_eq!(
            key_set(&plan(&validated, Role::DataParty)),
            expected(&["PORT_P1_P2", "PORT_P2_P3", "IP_ADDR_P1", "IP_ADDR_P2"])
        );
    }

    #[test]
    fn test_no_duplicate_keys() {
        let validated = validate_config(&study_config()).unwrap();
        for role in Role::ALL {
            let set = plan(&validated, role);
            assert_eq!(key_set(&set).len(), set.len());
        }
    }

    #[test]
    fn test_plan_machine_follows_roles() {
        let mut config = study_config();
        config.cp_role = Some(2);
        config.s_role = Some(0);
        let validated = validate_config(&config).unwrap();

        let sets = plan_machine(&validated);
        let roles: Vec<Role> = sets.iter().map(|s| s.role()).collect();
        assert_eq!(roles, vec![Role::Cp2, Role::DataParty]);
    }

    #[test]
    fn test_overridden_bases() {
        let mut config = study_config();
        config.port_bases = ports::PortBases::starting_at(9100);
        config.num_threads = Some(1);
        let validated = validate_config(&config).unwrap();

        let set = plan(&validated, Role::Cp0);
        assert_eq!(set.get("PORT_P0_P1"), Some("9100 9110"));
        assert_eq!(set.get("PORT_P0_P2"), Some("9103 9113"));
    }

    #[test]
    fn test_planning_leaves_config_untouched() {
        let config = study_config();
        let validated = validate_config(&config).unwrap();
        let _ = plan_machine(&validated);
        assert_eq!(validated.config(), &config);
    }
}
