//! CLI argument parsing using clap

use super::DeploymentTarget;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// gwas-launch - deploy and run a secure multi-party GWAS across cloud machines
#[derive(Parser, Debug)]
#[command(name = "gwas-launch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Launcher settings file (TOML)
    #[arg(long, global = true, env = "GWAS_LAUNCH_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// State file holding per-machine configuration (overrides the settings file)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Machine selected by project, zone and instance name
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Cloud project of the machine
    #[arg(long)]
    pub project: String,

    /// Zone of the machine
    #[arg(long)]
    pub zone: String,

    /// Instance name of the machine
    #[arg(long)]
    pub instance: String,
}

impl TargetArgs {
    pub fn target(&self) -> DeploymentTarget {
        DeploymentTarget::new(&self.project, &self.zone, &self.instance)
    }
}

/// Machines for commands that can drive several at once
#[derive(Args, Debug, Clone)]
pub struct MachineArgs {
    /// Machine as project/zone/instance (repeatable)
    #[arg(long = "machine", value_name = "PROJECT/ZONE/INSTANCE", required = true)]
    pub machines: Vec<DeploymentTarget>,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub json_output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a shared configuration file into a machine's configuration
    LoadConfig {
        #[command(flatten)]
        target: TargetArgs,

        /// Shared configuration file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Computing-party role of this machine (0-2)
        #[arg(long)]
        cp_role: Option<u32>,

        /// Data-party index of this machine
        #[arg(long)]
        s_role: Option<u32>,
    },

    /// Set one configuration field (e.g. `numInds 1000 1200`)
    Set {
        #[command(flatten)]
        target: TargetArgs,

        /// Field name (form name such as numInds, or key such as NUM_INDS)
        field: String,

        /// Values; none clears a scalar field
        values: Vec<String>,
    },

    /// Show a machine's configuration
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print the parameter lines each role on the machine receives
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Write the planned parameters into the machine's parameter files
    Push {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Create the network peerings the machine's roles need
    Peer {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Copy prepared input files to the machine
    Upload {
        #[command(flatten)]
        target: TargetArgs,

        /// Directory holding geno.txt, pheno.txt, pos.txt and optional cov.txt
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Run data sharing then GWAS on one or more machines
    Run {
        #[command(flatten)]
        machines: MachineArgs,
    },

    /// Push, peer and run on one or more machines
    Deploy {
        #[command(flatten)]
        machines: MachineArgs,

        /// Skip peering reconciliation
        #[arg(long)]
        skip_peering: bool,
    },

    /// Drop a torn-down machine's configuration
    Forget {
        #[command(flatten)]
        target: TargetArgs,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.command {
            Command::LoadConfig { cp_role: Some(cp), .. } if *cp > 2 => {
                anyhow::bail!("cp_role must be 0, 1 or 2");
            }
            Command::Set { field, .. } if field.trim().is_empty() => {
                anyhow::bail!("field name must not be empty");
            }
            Command::Run { machines } | Command::Deploy { machines, .. } => {
                let mut seen = std::collections::HashSet::new();
                for machine in &machines.machines {
                    if !seen.insert(machine) {
                        anyhow::bail!("machine {} listed more than once", machine);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}
