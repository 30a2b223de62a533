//! gcloud transport
//!
//! `gcloud compute ssh` for scripts and `gcloud compute scp` for copies.

use super::RemoteShell;
use crate::config::DeploymentTarget;
use crate::error::{LaunchError, LaunchResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GcloudShell {
    binary: String,
}

impl Default for GcloudShell {
    fn default() -> Self {
        Self::new("gcloud")
    }
}

impl GcloudShell {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn scoped(&self, subcommand: &str, target: &DeploymentTarget) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["compute", subcommand])
            .arg("--project")
            .arg(&target.project)
            .arg("--zone")
            .arg(&target.zone)
            .arg("--quiet");
        cmd
    }
}

/// scp destinations are relative to the remote home directory
fn scp_destination(target: &DeploymentTarget, remote_path: &str) -> String {
    let path = remote_path.strip_prefix("~/").unwrap_or(remote_path);
    format!("{}:{}", target.instance, path)
}

#[async_trait]
impl RemoteShell for GcloudShell {
    fn name(&self) -> &'static str {
        "gcloud compute ssh"
    }

    fn command(&self, target: &DeploymentTarget, script: &str) -> Command {
        let mut cmd = self.scoped("ssh", target);
        cmd.arg(&target.instance).arg("--command").arg(script);
        cmd
    }

    async fn copy_to(&self, target: &DeploymentTarget, local: &Path, remote_path: &str) -> LaunchResult<()> {
        let dest = scp_destination(target, remote_path);
        debug!(%target, local = %local.display(), %dest, "gcloud compute scp");

        let output = self
            .scoped("scp", target)
            .arg(local)
            .arg(&dest)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| LaunchError::Transport {
                target: target.clone(),
                reason: format!("failed to start gcloud compute scp: {}", e),
            })?;

        if !output.status.success() {
            return Err(LaunchError::Transport {
                target: target.clone(),
                reason: format!(
                    "scp of {} failed: {}",
                    local.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("proj-cp1", "us-central1-a", "cp1")
    }

    #[test]
    fn test_ssh_arguments() {
        let shell = GcloudShell::default();
        let cmd = shell.command(&target(), "echo hi");
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "gcloud");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "compute",
                "ssh",
                "--project",
                "proj-cp1",
                "--zone",
                "us-central1-a",
                "--quiet",
                "cp1",
                "--command",
                "echo hi",
            ]
        );
    }

    #[test]
    fn test_scp_destination() {
        assert_eq!(
            scp_destination(&target(), "~/secure-gwas/gwas_data/geno.txt"),
            "cp1:secure-gwas/gwas_data/geno.txt"
        );
        assert_eq!(scp_destination(&target(), "/data/pos.txt"), "cp1:/data/pos.txt");
    }
}
