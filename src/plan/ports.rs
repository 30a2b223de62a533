//! Port and path allocation
//!
//! Every inter-party channel gets a fixed offset from a common starting port.
//! Each dataset then shifts all five channels by a stride wide enough that the
//! `numThreads` parallel sockets a protocol run opens per channel never reach
//! the next dataset's ports.

use crate::config::Role;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default first port of the P0-P1 channel
pub const DEFAULT_START_PORT: u32 = 8000;

/// Number of logical channels between parties
pub const CHANNEL_COUNT: u32 = 5;

/// Highest usable TCP port
pub const MAX_PORT: u32 = 65_535;

/// Directory holding protocol cache files, relative to the code directory
pub const CACHE_DIR: &str = "../cache";

/// SNP position file shared by all computing parties, relative to the code directory
pub const SNP_POS_FILE: &str = "../gwas_data/pos.txt";

/// Inter-party network channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    P0P1,
    P1P2,
    P1P3,
    P0P2,
    P2P3,
}

impl Channel {
    /// All channels in base-offset order
    pub const ALL: [Channel; 5] = [
        Channel::P0P1,
        Channel::P1P2,
        Channel::P1P3,
        Channel::P0P2,
        Channel::P2P3,
    ];

    /// Offset of this channel from the common starting port
    pub fn offset(self) -> u32 {
        match self {
            Channel::P0P1 => 0,
            Channel::P1P2 => 1,
            Channel::P1P3 => 2,
            Channel::P0P2 => 3,
            Channel::P2P3 => 4,
        }
    }

    /// Short name as used in the shared configuration file
    pub fn name(self) -> &'static str {
        match self {
            Channel::P0P1 => "P0_P1",
            Channel::P1P2 => "P1_P2",
            Channel::P1P3 => "P1_P3",
            Channel::P0P2 => "P0_P2",
            Channel::P2P3 => "P2_P3",
        }
    }

    /// Parameter file key
    pub fn key(self) -> &'static str {
        match self {
            Channel::P0P1 => "PORT_P0_P1",
            Channel::P1P2 => "PORT_P1_P2",
            Channel::P1P3 => "PORT_P1_P3",
            Channel::P0P2 => "PORT_P0_P2",
            Channel::P2P3 => "PORT_P2_P3",
        }
    }

    /// Accepts either the short name (`P0_P1`) or the parameter key (`PORT_P0_P1`)
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let short = upper.strip_prefix("PORT_").unwrap_or(&upper);
        Self::ALL.into_iter().find(|c| c.name() == short)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Port distance between consecutive datasets
///
/// Two ports per channel per thread: `2 * 5 * numThreads`. Computed in
/// `u64` so any `numThreads` the store accepts fits.
pub fn dataset_stride(num_threads: u32) -> u64 {
    2 * u64::from(CHANNEL_COUNT) * u64::from(num_threads)
}

/// Port of `channel` for dataset `dataset` using the default bases
pub fn ports(channel: Channel, dataset: usize, num_threads: u32) -> u64 {
    PortAllocator::new(PortBases::default(), num_threads).port(channel, dataset)
}

/// Cache file prefix unique per (dataset, role)
pub fn cache_prefix(dataset: usize, role: Role) -> String {
    format!("{}/ds{}_p{}", CACHE_DIR, dataset, role.id())
}

/// Per-channel starting ports
///
/// Defaults to `DEFAULT_START_PORT + offset`; the shared configuration file
/// may override individual channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortBases {
    pub p0_p1: u32,
    pub p1_p2: u32,
    pub p1_p3: u32,
    pub p0_p2: u32,
    pub p2_p3: u32,
}

impl Default for PortBases {
    fn default() -> Self {
        Self::starting_at(DEFAULT_START_PORT)
    }
}

impl PortBases {
    /// Five consecutive bases from `start`
    pub fn starting_at(start: u32) -> Self {
        Self {
            p0_p1: start + Channel::P0P1.offset(),
            p1_p2: start + Channel::P1P2.offset(),
            p1_p3: start + Channel::P1P3.offset(),
            p0_p2: start + Channel::P0P2.offset(),
            p2_p3: start + Channel::P2P3.offset(),
        }
    }

    pub fn get(&self, channel: Channel) -> u32 {
        match channel {
            Channel::P0P1 => self.p0_p1,
            Channel::P1P2 => self.p1_p2,
            Channel::P1P3 => self.p1_p3,
            Channel::P0P2 => self.p0_p2,
            Channel::P2P3 => self.p2_p3,
        }
    }

    pub fn set(&mut self, channel: Channel, port: u32) {
        match channel {
            Channel::P0P1 => self.p0_p1 = port,
            Channel::P1P2 => self.p1_p2 = port,
            Channel::P1P3 => self.p1_p3 = port,
            Channel::P0P2 => self.p0_p2 = port,
            Channel::P2P3 => self.p2_p3 = port,
        }
    }
}

impl fmt::Display for PortBases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Channel::ALL
            .iter()
            .map(|c| format!("{}={}", c.name(), self.get(*c)))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Port allocator for one study
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    bases: PortBases,
    num_threads: u32,
}

impl PortAllocator {
    pub fn new(bases: PortBases, num_threads: u32) -> Self {
        Self { bases, num_threads }
    }

    /// Unchecked against the TCP range; saturates instead of wrapping
    pub fn port(&self, channel: Channel, dataset: usize) -> u64 {
        let shift = dataset_stride(self.num_threads).saturating_mul(dataset as u64);
        u64::from(self.bases.get(channel)).saturating_add(shift)
    }

    /// Ports of `channel` for datasets `0..num_datasets`
    pub fn channel_ports(&self, channel: Channel, num_datasets: usize) -> Vec<u64> {
        (0..num_datasets).map(|i| self.port(channel, i)).collect()
    }

    /// Reject allocations whose ports collide or leave the TCP range
    ///
    /// Default bases can never collide; overridden bases from a shared
    /// configuration file can.
    pub fn check(&self, num_datasets: usize) -> Result<(), ValidationError> {
        let mut seen: HashMap<u64, (Channel, usize)> = HashMap::new();
        for dataset in 0..num_datasets {
            for channel in Channel::ALL {
                let port = self.port(channel, dataset);
                if port > u64::from(MAX_PORT) {
                    return Err(ValidationError::PortOutOfRange {
                        channel: channel.name(),
                        dataset,
                        port,
                    });
                }
                if seen.insert(port, (channel, dataset)).is_some() {
                    return Err(ValidationError::PortCollision { port });
                }
            }
        }
        Ok(())
    }
}
