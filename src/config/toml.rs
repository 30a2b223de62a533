//! TOML settings and state files
//!
//! The settings file tunes the launcher itself (remote layout, transport,
//! orchestration and provisioning). The state file persists the configuration
//! store between invocations as a `[[deployment]]` array.

use super::store::ConfigStore;
use super::{DeploymentTarget, GwasConfig};
use crate::orchestrator::OrchestratorOptions;
use crate::peering::PeeringOptions;
use crate::remote::RemoteLayout;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of the state file
pub const DEFAULT_STATE_PATH: &str = ".gwas-launch/state.toml";

/// Remote execution channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `gcloud compute ssh` / `scp`
    #[default]
    Gcloud,
    /// `sh` on this host
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub gcloud_binary: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Gcloud,
            gcloud_binary: "gcloud".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    pub path: PathBuf,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_PATH),
        }
    }
}

/// Launcher settings; every section and key is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub remote: RemoteLayout,
    pub transport: TransportSettings,
    pub orchestrator: OrchestratorOptions,
    pub provisioning: PeeringOptions,
    pub state: StateSettings,
}

/// Parse TOML settings file
pub fn parse_settings_file(path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

    parse_settings_string(&contents)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}

/// Parse TOML settings from string
pub fn parse_settings_string(contents: &str) -> Result<Settings> {
    let settings: Settings = ::toml::from_str(contents)
        .context("Failed to parse TOML settings")?;

    Ok(settings)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeploymentEntry {
    project: String,
    zone: String,
    instance: String,
    #[serde(default)]
    config: GwasConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    deployment: Vec<DeploymentEntry>,
}

/// Load the configuration store; a missing file yields an empty store
pub fn load_state(path: &Path) -> Result<ConfigStore> {
    if !path.exists() {
        debug!(path = %path.display(), "no state file; starting empty");
        return Ok(ConfigStore::new());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    let state: StateFile = ::toml::from_str(&contents)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

    Ok(ConfigStore::from_entries(state.deployment.into_iter().map(|entry| {
        (
            DeploymentTarget::new(entry.project, entry.zone, entry.instance),
            entry.config,
        )
    })))
}

/// Write the configuration store to `path`
pub fn save_state(path: &Path, store: &ConfigStore) -> Result<()> {
    let state = StateFile {
        deployment: store
            .entries()
            .into_iter()
            .map(|(target, config)| DeploymentEntry {
                project: target.project,
                zone: target.zone,
                instance: target.instance,
                config,
            })
            .collect(),
    };

    let contents = ::toml::to_string(&state).context("Failed to serialize state")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
    }
    fs::write(path, contents)
        .with_context(|| format!("Failed to write state file: {}", path.display()))?;
    debug!(path = %path.display(), "state saved");
    Ok(())
}
