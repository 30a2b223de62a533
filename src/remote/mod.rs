//! Remote execution
//!
//! Everything that touches a deployment target goes through [`RemoteShell`]:
//! one-shot scripts, long-running streamed scripts, and file copies. The gcloud
//! transport talks to real instances; the local transport runs the same
//! scripts with `sh` on this host.

pub mod gcloud;
pub mod local;
pub mod transfer;
pub mod writer;

use crate::config::{DeploymentTarget, Role};
use crate::error::{LaunchError, LaunchResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Directory layout of the protocol installation on every machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLayout {
    /// Installation root; a leading `~/` is expanded by the remote shell
    pub root: String,
    /// Directory holding pid files of launched processes
    pub pid_dir: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            root: "~/secure-gwas".to_string(),
            pid_dir: "/tmp".to_string(),
        }
    }
}

impl RemoteLayout {
    pub fn new(root: impl Into<String>, pid_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            pid_dir: pid_dir.into(),
        }
    }

    pub fn par_dir(&self) -> String {
        format!("{}/par", self.root)
    }

    pub fn data_dir(&self) -> String {
        format!("{}/gwas_data", self.root)
    }

    /// Working directory of the protocol binaries
    pub fn code_dir(&self) -> String {
        format!("{}/code", self.root)
    }

    /// Parameter file of `role`
    pub fn par_file(&self, role: Role) -> String {
        format!("{}/test.par.{}.txt", self.par_dir(), role.id())
    }

    /// Parameter file of `role` relative to the code directory
    pub fn relative_par_file(role: Role) -> String {
        format!("../par/test.par.{}.txt", role.id())
    }

    pub fn pid_file(&self, phase: &str, role: Role) -> String {
        format!("{}/gwas-launch.{}.{}.pid", self.pid_dir, phase, role.id())
    }
}

/// Quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote a path, leaving a leading `~/` outside the quotes so it still expands
pub fn shell_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}

/// Captured result of a one-shot remote script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short failure description for error messages
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.code, stderr.is_empty()) {
            (Some(code), true) => format!("exit status {}", code),
            (Some(code), false) => format!("exit status {}: {}", code, stderr),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {}", stderr),
        }
    }
}

/// Execution channel to deployment targets
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Short transport name for logs
    fn name(&self) -> &'static str;

    /// Command that runs `script` under a POSIX shell on `target`
    fn command(&self, target: &DeploymentTarget, script: &str) -> Command;

    /// Copy a local file to `remote_path` on `target`
    async fn copy_to(&self, target: &DeploymentTarget, local: &Path, remote_path: &str) -> LaunchResult<()>;

    /// Run `script` to completion and capture its output
    async fn execute(&self, target: &DeploymentTarget, script: &str) -> LaunchResult<CommandOutput> {
        let mut cmd = self.command(target, script);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| LaunchError::Transport {
            target: target.clone(),
            reason: format!("failed to start {}: {}", self.name(), e),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Start `script` with piped output in its own process group
    fn spawn(&self, target: &DeploymentTarget, script: &str) -> LaunchResult<Child> {
        let mut cmd = self.command(target, script);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| LaunchError::Transport {
            target: target.clone(),
            reason: format!("failed to start {}: {}", self.name(), e),
        })
    }
}
