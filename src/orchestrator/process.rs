//! Live remote process handle
//!
//! A [`RemoteProcess`] owns the local transport child (the ssh session, or
//! the shell itself for the local transport). Termination is two-sided: a
//! separate remote invocation kills the process tree recorded in the pid
//! file, then the local process group is killed and reaped.

use super::phase::{kill_script, Phase, ProcessSpec};
use super::OrchestratorOptions;
use crate::config::{DeploymentTarget, Role};
use crate::error::LaunchResult;
use crate::remote::{RemoteLayout, RemoteShell};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tracing::{debug, warn};

/// Time the remote kill may take beyond its pid wait and grace period
const KILL_SLACK: Duration = Duration::from_secs(30);

/// Upper bound on reaping the local child after it was killed
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

fn kill_timeout(wait_secs: u64, grace_secs: u64) -> Duration {
    Duration::from_secs(wait_secs.saturating_add(grace_secs)) + KILL_SLACK
}

pub struct RemoteProcess {
    role: Role,
    target: DeploymentTarget,
    pid_file: String,
    grace_secs: u64,
    pid_wait_secs: u64,
    shell: Arc<dyn RemoteShell>,
    child: Child,
    terminated: bool,
}

impl RemoteProcess {
    /// Start `spec` on `target`
    pub fn spawn(
        shell: Arc<dyn RemoteShell>,
        layout: &RemoteLayout,
        target: &DeploymentTarget,
        phase: Phase,
        spec: &ProcessSpec,
        options: &OrchestratorOptions,
    ) -> LaunchResult<Self> {
        let script = spec.script(layout, phase);
        let child = shell.spawn(target, &script)?;
        debug!(%target, %phase, role = %spec.role, pid = ?child.id(), "remote process started");

        Ok(Self {
            role: spec.role,
            target: target.clone(),
            pid_file: layout.pid_file(phase.name(), spec.role),
            grace_secs: options.teardown_grace_secs,
            pid_wait_secs: options.pid_wait_secs,
            shell,
            child,
            terminated: false,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Kill the remote process tree and the local transport; idempotent
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        // A transport that already exited can no longer start the wrapper
        let wait_secs = match self.child.try_wait() {
            Ok(Some(_)) => 0,
            _ => self.pid_wait_secs,
        };
        let script = kill_script(&self.pid_file, self.grace_secs, wait_secs);
        let limit = kill_timeout(wait_secs, self.grace_secs);
        match tokio::time::timeout(limit, self.shell.execute(&self.target, &script)).await {
            Ok(Ok(output)) if output.success() => {}
            Ok(Ok(output)) => {
                warn!(target = %self.target, role = %self.role, reason = %output.failure_reason(), "remote kill reported failure")
            }
            Ok(Err(e)) => warn!(target = %self.target, role = %self.role, error = %e, "remote kill failed"),
            Err(_) => warn!(target = %self.target, role = %self.role, "remote kill timed out"),
        }

        self.kill_local();
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(target = %self.target, role = %self.role, %status, "transport process reaped"),
            Ok(Err(e)) => warn!(target = %self.target, role = %self.role, error = %e, "failed to reap transport process"),
            Err(_) => warn!(target = %self.target, role = %self.role, "timed out reaping transport process"),
        }
    }

    /// Kill the local process group synchronously
    fn kill_local(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: killpg only sends a signal. `id()` is Some until the
            // child is reaped, so the group led by it is still ours.
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    debug!(target = %self.target, role = %self.role, error = %err, "failed to kill transport process group");
                }
            }
        }
        if let Err(e) = self.child.start_kill() {
            debug!(target = %self.target, role = %self.role, error = %e, "transport process already exited");
        }
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        warn!(target = %self.target, role = %self.role, "remote process dropped without termination; killing");
        self.kill_local();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let shell = Arc::clone(&self.shell);
            let target = self.target.clone();
            let script = kill_script(&self.pid_file, self.grace_secs, self.pid_wait_secs);
            let limit = kill_timeout(self.pid_wait_secs, self.grace_secs);
            runtime.spawn(async move {
                let _ = tokio::time::timeout(limit, shell.execute(&target, &script)).await;
            });
        }
    }
}
