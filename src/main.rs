//! gwas-launch CLI entry point

use anyhow::{Context, Result};
use chrono::Utc;
use gwas_launch::config::cli::{Cli, Command, MachineArgs};
use gwas_launch::config::store::UpdateOutcome;
use gwas_launch::config::toml::{load_state, parse_settings_file, save_state, Settings};
use gwas_launch::orchestrator::driver::{MachineReport, ProgressSink};
use gwas_launch::output::json::{write_json_report, RunReport};
use gwas_launch::output::text::{self, ConsolePrinter};
use gwas_launch::Coordinator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;
    init_logging(cli.debug);

    let settings = match &cli.settings {
        Some(path) => parse_settings_file(path)?,
        None => Settings::default(),
    };
    let state_path = cli.state.clone().unwrap_or_else(|| settings.state.path.clone());
    let store = load_state(&state_path)?;
    let coordinator = Coordinator::from_settings(settings, store);

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    let mutated = runtime.block_on(dispatch(&coordinator, cli.command))?;
    if mutated {
        save_state(&state_path, coordinator.store())?;
    }
    Ok(())
}

/// `RUST_LOG` wins over `--debug`
fn init_logging(debug: bool) {
    let default = if debug { "gwas_launch=debug" } else { "gwas_launch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancellation token tripped by Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; tearing down remote processes");
            trigger.cancel();
        }
    });
    token
}

/// Runs one subcommand; returns whether the configuration store changed
async fn dispatch(coordinator: &Coordinator, command: Command) -> Result<bool> {
    match command {
        Command::LoadConfig { target, file, cp_role, s_role } => {
            let target = target.target();
            coordinator.load_config(&target, &file, cp_role, s_role)?;
            println!("Loaded {} into {}", file.display(), target);
            Ok(true)
        }

        Command::Set { target, field, values } => {
            let target = target.target();
            match coordinator.set(&target, &field, values.as_slice())? {
                UpdateOutcome::Applied(field) => println!("{}: {} updated", target, field),
                UpdateOutcome::Ignored => println!("{}: unknown field {} ignored", target, field),
            }
            Ok(true)
        }

        Command::Show { target } => {
            let target = target.target();
            match coordinator.store().peek(&target) {
                Some(config) => text::print_config(&target, &config),
                None => println!("No configuration stored for {}", target),
            }
            Ok(false)
        }

        Command::Plan { target } => {
            let target = target.target();
            let sets = coordinator.plan(&target)?;
            text::print_plan(&target, &sets);
            Ok(false)
        }

        Command::Push { target } => {
            let target = target.target();
            let reports = coordinator.push(&target).await?;
            text::print_write_reports(&target, &reports);
            Ok(false)
        }

        Command::Peer { target } => {
            let target = target.target();
            let reports = coordinator.peer(&target).await?;
            text::print_peering_reports(&target, &reports);
            Ok(false)
        }

        Command::Upload { target, dir } => {
            let target = target.target();
            let count = coordinator.upload(&target, &dir).await?;
            println!("{}: uploaded {} file(s) from {}", target, count, dir.display());
            Ok(false)
        }

        Command::Run { machines } => {
            let started_at = Utc::now();
            let sink: Arc<dyn ProgressSink> = Arc::new(ConsolePrinter);
            let reports = coordinator
                .run(&machines.machines, sink, interrupt_token())
                .await?;
            finish_run(&machines, started_at, reports)?;
            Ok(false)
        }

        Command::Deploy { machines, skip_peering } => {
            let started_at = Utc::now();
            let sink: Arc<dyn ProgressSink> = Arc::new(ConsolePrinter);
            let outcome = coordinator
                .deploy(&machines.machines, skip_peering, sink, interrupt_token())
                .await?;
            for (target, reports) in &outcome.writes {
                text::print_write_reports(target, reports);
            }
            for (target, reports) in &outcome.peerings {
                text::print_peering_reports(target, reports);
            }
            finish_run(&machines, started_at, outcome.machines)?;
            Ok(false)
        }

        Command::Forget { target } => {
            let target = target.target();
            if coordinator.forget(&target) {
                println!("Forgot {}", target);
            } else {
                println!("No configuration stored for {}", target);
            }
            Ok(true)
        }
    }
}

/// Print the summary, write the JSON report, and fail if any machine failed
fn finish_run(
    machines: &MachineArgs,
    started_at: chrono::DateTime<Utc>,
    reports: Vec<MachineReport>,
) -> Result<()> {
    println!();
    text::print_run_summary(&reports);

    let report = RunReport::new(started_at, reports);
    if let Some(path) = &machines.json_output {
        write_json_report(path, &report, true)?;
        println!("Report written to {}", path.display());
    }

    if !report.succeeded {
        anyhow::bail!("run did not complete on every machine");
    }
    Ok(())
}
