//! Local transport
//!
//! Runs scripts with `sh -c` on this host. Used for single-host trials and to
//! exercise the writer and orchestrator without a cloud account.

use super::RemoteShell;
use crate::config::DeploymentTarget;
use crate::error::{LaunchError, LaunchResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct LocalShell;

impl LocalShell {
    pub fn new() -> Self {
        Self
    }
}

/// Expand a leading `~/` against `$HOME`
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    fn name(&self) -> &'static str {
        "sh"
    }

    fn command(&self, _target: &DeploymentTarget, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    async fn copy_to(&self, target: &DeploymentTarget, local: &Path, remote_path: &str) -> LaunchResult<()> {
        let dest = expand_home(remote_path);
        let transport = |reason: String| LaunchError::Transport {
            target: target.clone(),
            reason,
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| transport(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::copy(local, &dest).await.map_err(|e| {
            transport(format!(
                "failed to copy {} to {}: {}",
                local.display(),
                dest.display(),
                e
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> DeploymentTarget {
        DeploymentTarget::new("local", "none", "localhost")
    }

    #[tokio::test]
    async fn test_execute_captures_output() {
        let shell = LocalShell::new();
        let output = shell.execute(&target(), "echo out; echo err >&2; exit 3").await.unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_copy_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, "1 2 3\n").unwrap();

        let dest = dir.path().join("nested/data/dest.txt");
        LocalShell::new()
            .copy_to(&target(), &src, dest.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "1 2 3\n");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/x"), Path::new(&home).join("x"));
        }
    }
}
