//! gcloud-backed peering operations

use super::{PeeringApi, PeeringRequest};
use crate::error::{LaunchError, LaunchResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GcloudPeering {
    binary: String,
}

impl Default for GcloudPeering {
    fn default() -> Self {
        Self::new("gcloud")
    }
}

/// Project id from a network URL such as
/// `https://www.googleapis.com/compute/v1/projects/PROJ/global/networks/NET`
fn project_of_network(url: &str) -> Option<&str> {
    let mut parts = url.split('/');
    parts.find(|p| *p == "projects")?;
    parts.next().filter(|p| !p.is_empty())
}

/// Peer projects listed in `gcloud compute networks peerings list --format=json`
///
/// The output is a list of networks, each with a `peerings` array.
pub fn parse_peered_projects(json: &str) -> Result<BTreeSet<String>, serde_json::Error> {
    let value: Value = serde_json::from_str(json)?;
    let mut projects = BTreeSet::new();
    for network in value.as_array().into_iter().flatten() {
        let peerings = network.get("peerings").and_then(Value::as_array);
        for peering in peerings.into_iter().flatten() {
            if let Some(project) = peering
                .get("network")
                .and_then(Value::as_str)
                .and_then(project_of_network)
            {
                projects.insert(project.to_string());
            }
        }
    }
    Ok(projects)
}

impl GcloudPeering {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str]) -> LaunchResult<String> {
        debug!(binary = %self.binary, args = ?args, "running gcloud");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| LaunchError::Provisioning(format!("failed to start {}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(LaunchError::Provisioning(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PeeringApi for GcloudPeering {
    async fn peered_projects(&self, project: &str, network: &str) -> LaunchResult<BTreeSet<String>> {
        let stdout = self
            .run(&[
                "compute",
                "networks",
                "peerings",
                "list",
                "--project",
                project,
                "--network",
                network,
                "--format=json",
            ])
            .await?;
        parse_peered_projects(&stdout)
            .map_err(|e| LaunchError::Provisioning(format!("unreadable peering list: {}", e)))
    }

    async fn create_peering(&self, request: &PeeringRequest) -> LaunchResult<()> {
        self.run(&[
            "compute",
            "networks",
            "peerings",
            "create",
            &request.name,
            "--project",
            &request.project,
            "--network",
            &request.network,
            "--peer-project",
            &request.peer_project,
            "--peer-network",
            &request.peer_network,
        ])
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peering_list() {
        let json = r#"[
          {
            "name": "net-p1",
            "peerings": [
              {
                "name": "peer-p1-p0",
                "network": "https://www.googleapis.com/compute/v1/projects/proj-cp0/global/networks/net-p0",
                "state": "ACTIVE"
              },
              {
                "name": "peer-p1-s0",
                "network": "https://www.googleapis.com/compute/v1/projects/proj-s0/global/networks/net-p3",
                "state": "INACTIVE"
              }
            ]
          }
        ]"#;
        let projects = parse_peered_projects(json).unwrap();
        assert_eq!(
            projects.into_iter().collect::<Vec<_>>(),
            vec!["proj-cp0".to_string(), "proj-s0".to_string()]
        );
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_peered_projects("[]").unwrap().is_empty());
        assert!(parse_peered_projects(r#"[{"name": "net-p0"}]"#).unwrap().is_empty());
        assert!(parse_peered_projects("not json").is_err());
    }

    #[test]
    fn test_project_of_network() {
        assert_eq!(
            project_of_network("projects/proj-a/global/networks/net-p2"),
            Some("proj-a")
        );
        assert_eq!(project_of_network("global/networks/net-p2"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_provisioning_error() {
        let api = GcloudPeering::new("/nonexistent/gcloud");
        let err = api.peered_projects("p", "net-p0").await.unwrap_err();
        assert!(matches!(err, LaunchError::Provisioning(_)));
    }
}
