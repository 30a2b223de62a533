//! Protocol phases and the remote commands they run

use crate::config::{Role, RoleSet};
use crate::remote::{shell_path, shell_quote, RemoteLayout};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directory, relative to the code directory, holding a data party's inputs
pub const DATA_PARTY_INPUT_DIR: &str = "../gwas_data/";

/// Protocol stage driven on a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Secret-shares the raw inputs among the computing parties
    DataSharing,
    /// Computes the association statistics
    Gwas,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::DataSharing => "data-sharing",
            Phase::Gwas => "gwas",
        }
    }

    /// Protocol binary, relative to the code directory
    pub fn binary(self) -> &'static str {
        match self {
            Phase::DataSharing => "bin/DataSharingClient",
            Phase::Gwas => "bin/GwasClient",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One process to launch for a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub role: Role,
    /// Shell command run from the code directory
    pub command: String,
}

impl ProcessSpec {
    pub fn new(role: Role, command: impl Into<String>) -> Self {
        Self {
            role,
            command: command.into(),
        }
    }

    /// Protocol invocation for `role` in `phase`
    pub fn protocol(phase: Phase, role: Role) -> Self {
        let mut command = format!(
            "{} {} {}",
            phase.binary(),
            role.id(),
            shell_quote(&RemoteLayout::relative_par_file(role))
        );
        if phase == Phase::DataSharing && role == Role::DataParty {
            command.push(' ');
            command.push_str(DATA_PARTY_INPUT_DIR);
        }
        Self::new(role, command)
    }

    /// Wrapper script: records the shell's pid, then runs the command
    ///
    /// The pid file lets a separate invocation find and kill the process tree
    /// when the launching connection is already gone. It is renamed into place
    /// so a reader never sees it half written.
    pub fn script(&self, layout: &RemoteLayout, phase: Phase) -> String {
        let pid_file = layout.pid_file(phase.name(), self.role);
        format!(
            "mkdir -p {pid_dir}\necho $$ > {tmp_file}\nmv {tmp_file} {pid_file}\ncd {code_dir}\n{command}\n",
            pid_dir = shell_path(&layout.pid_dir),
            tmp_file = shell_path(&format!("{}.tmp", pid_file)),
            pid_file = shell_path(&pid_file),
            code_dir = shell_path(&layout.code_dir()),
            command = self.command,
        )
    }
}

/// Processes `phase` needs on a machine enacting `roles`
///
/// Data sharing runs one process per role. The GWAS phase runs only for the
/// computing-party role.
pub fn phase_processes(phase: Phase, roles: &RoleSet) -> Vec<ProcessSpec> {
    match phase {
        Phase::DataSharing => roles.iter().map(|r| ProcessSpec::protocol(phase, r)).collect(),
        Phase::Gwas => roles
            .computing()
            .map(|cp| ProcessSpec::protocol(phase, cp))
            .into_iter()
            .collect(),
    }
}

/// Remote script terminating the process tree recorded in `pid_file`
///
/// A process launched over another connection may not have recorded its pid
/// yet; the script polls for the file up to `wait_secs` before giving up.
pub fn kill_script(pid_file: &str, grace_secs: u64, wait_secs: u64) -> String {
    format!(
        "F={pid_file}\n\
         W=0\n\
         while [ ! -f \"$F\" ] && [ \"$W\" -lt {wait_secs} ]; do sleep 1; W=$((W + 1)); done\n\
         [ -f \"$F\" ] || exit 0\n\
         PID=$(cat \"$F\")\n\
         pkill -TERM -P \"$PID\" 2>/dev/null || true\n\
         kill -TERM \"$PID\" 2>/dev/null || true\n\
         sleep {grace_secs}\n\
         pkill -KILL -P \"$PID\" 2>/dev/null || true\n\
         kill -KILL \"$PID\" 2>/dev/null || true\n\
         rm -f \"$F\"\n",
        pid_file = shell_path(pid_file),
        grace_secs = grace_secs,
        wait_secs = wait_secs,
    )
}
