//! Network peering reconciliation
//!
//! Each party owns one VPC network (`net-p0`..`net-p3`) in its own project.
//! A role must be peered with the networks of the parties it talks to:
//!
//! - CP0 with CP1 and CP2
//! - CP1 with CP0, CP2 and every data party
//! - CP2 with CP0, CP1 and every data party
//! - a data party with CP1 and CP2
//!
//! Reconciliation reads the live peering state and only requests what is
//! missing, so it can be re-run after a partial failure.

pub mod gcloud;

use crate::config::validator::ValidatedConfig;
use crate::config::{GwasConfig, Role};
use crate::error::{LaunchResult, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

/// Provisioning tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeeringOptions {
    /// Prefix of per-party network names; the role id is appended
    pub network_prefix: String,
    /// Wait after creating peerings; the provider API is eventually consistent
    pub settle_delay_secs: u64,
}

impl Default for PeeringOptions {
    fn default() -> Self {
        Self {
            network_prefix: "net-p".to_string(),
            settle_delay_secs: 30,
        }
    }
}

impl PeeringOptions {
    pub fn network(&self, role: Role) -> String {
        format!("{}{}", self.network_prefix, role.id())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Remote side of a required peering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTarget {
    pub role: Role,
    /// Dataset index when `role` is the data party
    pub dataset: Option<usize>,
    pub project: String,
}

impl PeerTarget {
    /// Peering name as seen from `source`
    pub fn peering_name(&self, source: Role) -> String {
        match self.dataset {
            Some(i) => format!("peer-p{}-s{}", source.id(), i),
            None => format!("peer-p{}-p{}", source.id(), self.role.id()),
        }
    }
}

/// One peering to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeringRequest {
    pub name: String,
    pub project: String,
    pub network: String,
    pub peer_project: String,
    pub peer_network: String,
}

/// Cloud network peering operations
#[async_trait]
pub trait PeeringApi: Send + Sync {
    /// Projects `network` in `project` is already peered with
    async fn peered_projects(&self, project: &str, network: &str) -> LaunchResult<BTreeSet<String>>;

    async fn create_peering(&self, request: &PeeringRequest) -> LaunchResult<()>;
}

/// Result of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub source_project: String,
    /// Names of the peerings created
    pub created: Vec<String>,
    /// Projects that were already peered
    pub already_peered: Vec<String>,
}

const COMPUTING_PARTIES: [Role; 3] = [Role::Cp0, Role::Cp1, Role::Cp2];

fn cp_project(config: &GwasConfig, party: usize) -> Result<PeerTarget, ValidationError> {
    let project = config.proj[party].trim();
    if project.is_empty() {
        return Err(ValidationError::MissingProject(format!("proj{}", party)));
    }
    Ok(PeerTarget {
        role: COMPUTING_PARTIES[party],
        dataset: None,
        project: project.to_string(),
    })
}

fn data_party_projects(config: &GwasConfig) -> Result<Vec<PeerTarget>, ValidationError> {
    if config.proj3.is_empty() {
        return Err(ValidationError::MissingProject("proj3".to_string()));
    }
    Ok(config
        .proj3
        .iter()
        .enumerate()
        .map(|(i, project)| PeerTarget {
            role: Role::DataParty,
            dataset: Some(i),
            project: project.clone(),
        })
        .collect())
}

/// Project owning `role` on this machine
pub fn source_project(config: &GwasConfig, role: Role) -> Result<String, ValidationError> {
    match role {
        Role::DataParty => {
            let index = config.s_role.unwrap_or(0) as usize;
            config
                .proj3
                .get(index)
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .ok_or_else(|| ValidationError::MissingProject(format!("proj3[{}]", index)))
        }
        cp => Ok(cp_project(config, cp.id() as usize)?.project),
    }
}

/// Parties `role` must be peered with
pub fn required_peers(config: &GwasConfig, role: Role) -> Result<Vec<PeerTarget>, ValidationError> {
    let mut peers = match role {
        Role::Cp0 => vec![cp_project(config, 1)?, cp_project(config, 2)?],
        Role::Cp1 => vec![cp_project(config, 0)?, cp_project(config, 2)?],
        Role::Cp2 => vec![cp_project(config, 0)?, cp_project(config, 1)?],
        Role::DataParty => vec![cp_project(config, 1)?, cp_project(config, 2)?],
    };
    if matches!(role, Role::Cp1 | Role::Cp2) {
        peers.extend(data_party_projects(config)?);
    }
    Ok(peers)
}

/// Issue the peerings of `source` that do not exist yet
///
/// Peers in the source project itself, and projects listed twice, are
/// skipped. Waits the settle delay if anything was created.
pub async fn reconcile(
    api: &dyn PeeringApi,
    options: &PeeringOptions,
    source: Role,
    source_project: &str,
    required: &[PeerTarget],
) -> LaunchResult<ReconcileReport> {
    let network = options.network(source);
    let existing = api.peered_projects(source_project, &network).await?;
    debug!(project = source_project, %network, existing = ?existing, "current peerings");

    let mut report = ReconcileReport {
        source_project: source_project.to_string(),
        ..Default::default()
    };
    let mut seen = BTreeSet::new();

    for peer in required {
        if peer.project == source_project || !seen.insert(peer.project.clone()) {
            continue;
        }
        if existing.contains(&peer.project) {
            report.already_peered.push(peer.project.clone());
            continue;
        }

        let request = PeeringRequest {
            name: peer.peering_name(source),
            project: source_project.to_string(),
            network: network.clone(),
            peer_project: peer.project.clone(),
            peer_network: options.network(peer.role),
        };
        api.create_peering(&request).await?;
        info!(project = source_project, peer = %request.peer_project, name = %request.name, "peering created");
        report.created.push(request.name);
    }

    if !report.created.is_empty() && options.settle_delay_secs > 0 {
        info!(secs = options.settle_delay_secs, "waiting for peerings to settle");
        tokio::time::sleep(options.settle_delay()).await;
    }

    Ok(report)
}

/// Reconcile every role the machine enacts
pub async fn reconcile_machine(
    api: &dyn PeeringApi,
    options: &PeeringOptions,
    config: &ValidatedConfig,
) -> LaunchResult<Vec<ReconcileReport>> {
    let raw = config.config();
    let mut reports = Vec::new();
    for role in config.roles().iter() {
        let project = source_project(raw, role)?;
        let required = required_peers(raw, role)?;
        reports.push(reconcile(api, options, role, &project, &required).await?);
    }
    Ok(reports)
}
