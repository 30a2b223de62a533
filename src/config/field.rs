//! Typed field updates
//!
//! Operator input arrives as a field name plus whitespace-separated tokens.
//! Each known field maps to a [`ConfigField`] whose [`FieldKind`] decides how
//! the tokens are parsed.

use super::GwasConfig;
use crate::error::ValidationError;
use std::fmt;
use std::str::FromStr;

/// How raw tokens are turned into a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// First token
    ScalarString,
    /// First token parsed as integer; no token clears the field
    ScalarInt,
    /// All tokens verbatim
    ListString,
    /// Every token parsed as integer
    ListInt,
}

/// Updatable configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    IpAddr(usize),
    CpRole,
    SRole,
    Proj(usize),
    Proj3,
    NumS,
    NumInds,
    NumSnps,
    NumCovs,
    NumChunks,
    NumThreads,
    NtlNumThreads,
}

/// Accepted spellings, normalised (lowercase, no separators)
///
/// Covers both the form names (`numInds`, `sRole`) and the parameter file
/// keys (`NUM_INDS`, `IP_ADDR_P0`).
const FIELD_NAMES: &[(&str, ConfigField)] = &[
    ("ipaddr0", ConfigField::IpAddr(0)),
    ("ipaddrp0", ConfigField::IpAddr(0)),
    ("ipaddr1", ConfigField::IpAddr(1)),
    ("ipaddrp1", ConfigField::IpAddr(1)),
    ("ipaddr2", ConfigField::IpAddr(2)),
    ("ipaddrp2", ConfigField::IpAddr(2)),
    ("cprole", ConfigField::CpRole),
    ("srole", ConfigField::SRole),
    ("proj0", ConfigField::Proj(0)),
    ("projp0", ConfigField::Proj(0)),
    ("proj1", ConfigField::Proj(1)),
    ("projp1", ConfigField::Proj(1)),
    ("proj2", ConfigField::Proj(2)),
    ("projp2", ConfigField::Proj(2)),
    ("proj3", ConfigField::Proj3),
    ("projp3", ConfigField::Proj3),
    ("nums", ConfigField::NumS),
    ("numinds", ConfigField::NumInds),
    ("numsnps", ConfigField::NumSnps),
    ("numcovs", ConfigField::NumCovs),
    ("numchunks", ConfigField::NumChunks),
    ("numthreads", ConfigField::NumThreads),
    ("ntlnumthreads", ConfigField::NtlNumThreads),
];

fn normalise(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl ConfigField {
    /// Look up a field by any accepted spelling
    pub fn parse(name: &str) -> Option<Self> {
        let key = normalise(name);
        FIELD_NAMES
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(_, field)| *field)
    }

    pub fn kind(self) -> FieldKind {
        match self {
            ConfigField::IpAddr(_) | ConfigField::Proj(_) => FieldKind::ScalarString,
            ConfigField::CpRole
            | ConfigField::SRole
            | ConfigField::NumS
            | ConfigField::NumSnps
            | ConfigField::NumCovs
            | ConfigField::NumThreads
            | ConfigField::NtlNumThreads => FieldKind::ScalarInt,
            ConfigField::Proj3 => FieldKind::ListString,
            ConfigField::NumInds | ConfigField::NumChunks => FieldKind::ListInt,
        }
    }

    /// Canonical form name
    pub fn name(self) -> &'static str {
        match self {
            ConfigField::IpAddr(0) => "ipAddr0",
            ConfigField::IpAddr(1) => "ipAddr1",
            ConfigField::IpAddr(_) => "ipAddr2",
            ConfigField::CpRole => "cpRole",
            ConfigField::SRole => "sRole",
            ConfigField::Proj(0) => "proj0",
            ConfigField::Proj(1) => "proj1",
            ConfigField::Proj(_) => "proj2",
            ConfigField::Proj3 => "proj3",
            ConfigField::NumS => "numS",
            ConfigField::NumInds => "numInds",
            ConfigField::NumSnps => "numSnps",
            ConfigField::NumCovs => "numCovs",
            ConfigField::NumChunks => "numChunks",
            ConfigField::NumThreads => "numThreads",
            ConfigField::NtlNumThreads => "ntlNumThreads",
        }
    }

    /// Write the parsed tokens into `config`
    ///
    /// Nothing is written if any token fails to parse.
    pub fn apply<S: AsRef<str>>(self, config: &mut GwasConfig, tokens: &[S]) -> Result<(), ValidationError> {
        let first = tokens.first().map(|t| t.as_ref().to_string());
        match self {
            ConfigField::IpAddr(i) => config.ip_addr[i] = first.unwrap_or_default(),
            ConfigField::Proj(i) => config.proj[i] = first.unwrap_or_default(),
            ConfigField::Proj3 => {
                config.proj3 = tokens.iter().map(|t| t.as_ref().to_string()).collect();
            }
            ConfigField::CpRole => config.cp_role = self.scalar(tokens)?,
            ConfigField::SRole => config.s_role = self.scalar(tokens)?,
            ConfigField::NumS => config.num_s = self.scalar(tokens)?,
            ConfigField::NumSnps => config.num_snps = self.scalar(tokens)?,
            ConfigField::NumCovs => config.num_covs = self.scalar(tokens)?,
            ConfigField::NumThreads => config.num_threads = self.scalar(tokens)?,
            ConfigField::NtlNumThreads => config.ntl_num_threads = self.scalar(tokens)?,
            ConfigField::NumInds => config.num_inds = self.list(tokens)?,
            ConfigField::NumChunks => config.num_chunks = self.list(tokens)?,
        }
        Ok(())
    }

    fn parse_token<T: FromStr, S: AsRef<str>>(self, token: &S) -> Result<T, ValidationError> {
        token.as_ref().parse().map_err(|_| ValidationError::InvalidToken {
            field: self.name(),
            token: token.as_ref().to_string(),
        })
    }

    fn scalar<T: FromStr, S: AsRef<str>>(self, tokens: &[S]) -> Result<Option<T>, ValidationError> {
        tokens.first().map(|t| self.parse_token(t)).transpose()
    }

    fn list<T: FromStr, S: AsRef<str>>(self, tokens: &[S]) -> Result<Vec<T>, ValidationError> {
        tokens.iter().map(|t| self.parse_token(t)).collect()
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
