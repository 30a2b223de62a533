//! Shared configuration file parsing
//!
//! The file is produced out-of-band and handed to every party. Fixed schema:
//!
//! ```text
//! P0 10.0.0.2            # 4 address lines
//! P1 10.0.1.2
//! P2 10.0.2.2
//! P3 10.0.3.2
//! P0_P1 8000             # 5 port lines
//! P0_P2 8003
//! P1_P2 8001
//! P1_P3 8002
//! P2_P3 8004
//! P0 proj-cp0            # 4 project lines, P3 lists every data-party project
//! P1 proj-cp1
//! P2 proj-cp2
//! P3 proj-s0 proj-s1
//! NUM_INDS 1000 1200     # free-form KEY VALUE... lines
//! ```
//!
//! Blank lines and `#` comments are skipped everywhere.

use super::field::ConfigField;
use super::GwasConfig;
use crate::error::ValidationError;
use crate::plan::ports::Channel;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

const ADDRESS_LINES: usize = 4;
const PORT_LINES: usize = 5;
const PROJECT_LINES: usize = 4;

/// Parsed shared configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedConfig {
    /// Party index and address
    pub addresses: Vec<(usize, String)>,
    /// Channel starting ports
    pub ports: Vec<(Channel, u32)>,
    /// Party index and owning project(s)
    pub projects: Vec<(usize, Vec<String>)>,
    /// Free-form parameter lines
    pub parameters: Vec<(String, Vec<String>)>,
}

struct Line<'a> {
    number: usize,
    name: &'a str,
    values: Vec<&'a str>,
}

fn malformed(line: usize, reason: impl Into<String>) -> ValidationError {
    ValidationError::MalformedSharedConfig {
        line,
        reason: reason.into(),
    }
}

/// `P0`..`P3` (also accepts `IP_ADDR_P0` and `PROJ_P0` style prefixes)
fn party_index(name: &str) -> Option<usize> {
    let upper = name.to_ascii_uppercase();
    let short = upper.rsplit('_').next().unwrap_or(&upper);
    match short {
        "P0" => Some(0),
        "P1" => Some(1),
        "P2" => Some(2),
        "P3" => Some(3),
        _ => None,
    }
}

/// Parse shared configuration file
pub fn parse_shared_config_file(path: &Path) -> Result<SharedConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read shared config file: {}", path.display()))?;

    parse_shared_config(&contents)
        .with_context(|| format!("Failed to parse shared config file: {}", path.display()))
}

/// Parse shared configuration from string
pub fn parse_shared_config(contents: &str) -> Result<SharedConfig, ValidationError> {
    let mut lines = contents.lines().enumerate().filter_map(|(i, raw)| {
        let content = raw.split('#').next().unwrap_or("").trim();
        let mut tokens = content.split_whitespace();
        tokens.next().map(|name| Line {
            number: i + 1,
            name,
            values: tokens.collect(),
        })
    });

    let mut shared = SharedConfig::default();

    for expected in 0..ADDRESS_LINES {
        let line = lines
            .next()
            .ok_or_else(|| malformed(0, format!("expected {} address lines", ADDRESS_LINES)))?;
        let party = party_index(line.name)
            .ok_or_else(|| malformed(line.number, format!("unknown party {:?}", line.name)))?;
        if party != expected {
            debug!(line = line.number, party, expected, "address lines out of order");
        }
        let addr = line
            .values
            .first()
            .ok_or_else(|| malformed(line.number, "missing address"))?;
        shared.addresses.push((party, addr.to_string()));
    }

    for _ in 0..PORT_LINES {
        let line = lines
            .next()
            .ok_or_else(|| malformed(0, format!("expected {} port lines", PORT_LINES)))?;
        let channel = Channel::from_name(line.name)
            .ok_or_else(|| malformed(line.number, format!("unknown channel {:?}", line.name)))?;
        let port = line
            .values
            .first()
            .ok_or_else(|| malformed(line.number, "missing port"))?
            .parse::<u32>()
            .map_err(|_| malformed(line.number, "port is not a number"))?;
        shared.ports.push((channel, port));
    }

    for _ in 0..PROJECT_LINES {
        let line = lines
            .next()
            .ok_or_else(|| malformed(0, format!("expected {} project lines", PROJECT_LINES)))?;
        let party = party_index(line.name)
            .ok_or_else(|| malformed(line.number, format!("unknown party {:?}", line.name)))?;
        if line.values.is_empty() {
            return Err(malformed(line.number, "missing project id"));
        }
        shared
            .projects
            .push((party, line.values.iter().map(|v| v.to_string()).collect()));
    }

    for line in lines {
        shared.parameters.push((
            line.name.to_string(),
            line.values.iter().map(|v| v.to_string()).collect(),
        ));
    }

    Ok(shared)
}

impl SharedConfig {
    /// Apply every section to `config`
    ///
    /// The data-party address is not used by any parameter file and is
    /// skipped. Unknown parameter names are ignored.
    pub fn apply_to(&self, config: &mut GwasConfig) -> Result<(), ValidationError> {
        for (party, addr) in &self.addresses {
            if *party < config.ip_addr.len() {
                config.ip_addr[*party] = addr.clone();
            }
        }

        for (channel, port) in &self.ports {
            config.port_bases.set(*channel, *port);
        }

        for (party, projects) in &self.projects {
            match *party {
                0..=2 => config.proj[*party] = projects.first().cloned().unwrap_or_default(),
                _ => config.proj3 = projects.clone(),
            }
        }

        for (name, values) in &self.parameters {
            match ConfigField::parse(name) {
                Some(field) => field.apply(config, values)?,
                None => debug!(parameter = %name, "ignoring unrecognised shared config parameter"),
            }
        }

        Ok(())
    }
}
