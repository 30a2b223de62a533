//! Human-readable console output

use crate::config::{DeploymentTarget, GwasConfig};
use crate::orchestrator::driver::{MachineReport, ProgressSink};
use crate::orchestrator::{Phase, PhaseEvent, PhaseState};
use crate::peering::ReconcileReport;
use crate::plan::RoleParameterSet;
use crate::remote::writer::WriteReport;

const RULE: &str = "═══════════════════════════════════════════════════════════";

/// Print a machine's stored configuration
pub fn print_config(target: &DeploymentTarget, config: &GwasConfig) {
    println!("{}", target);
    println!("{}", config);
}

/// Print the parameter lines each role receives
pub fn print_plan(target: &DeploymentTarget, sets: &[RoleParameterSet]) {
    for set in sets {
        println!("# {} on {}", set.role(), target);
        print!("{}", set);
        println!();
    }
}

pub fn print_write_reports(target: &DeploymentTarget, reports: &[WriteReport]) {
    for report in reports {
        println!(
            "{}: wrote {} keys to {} ({})",
            target, report.keys_written, report.file, report.role
        );
        if !report.missing_keys.is_empty() {
            println!("  Warning: no line for {} in {}", report.missing_keys.join(", "), report.file);
        }
    }
}

pub fn print_peering_reports(target: &DeploymentTarget, reports: &[ReconcileReport]) {
    for report in reports {
        if report.created.is_empty() {
            println!("{}: {} fully peered", target, report.source_project);
        } else {
            println!(
                "{}: created {} in {}",
                target,
                report.created.join(", "),
                report.source_project
            );
        }
    }
}

/// Elapsed seconds as `1m 05.2s` or `4.1s`
fn format_elapsed(secs: f64) -> String {
    if secs >= 60.0 {
        let minutes = (secs / 60.0).floor();
        format!("{}m {:04.1}s", minutes as u64, secs - minutes * 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}

/// Print the outcome of every phase on every machine
pub fn print_run_summary(reports: &[MachineReport]) {
    println!("{}", RULE);
    println!("                    RUN SUMMARY");
    println!("{}", RULE);
    println!();

    for report in reports {
        println!("{} {}", report.target, report.roles);
        for phase in &report.phases {
            println!(
                "  {:<13} {:<10} {:>6} lines  {}",
                phase.phase.name(),
                phase.state,
                phase.lines,
                format_elapsed(phase.elapsed_secs)
            );
            if let Some(error) = &phase.error {
                println!("    Error: {}", error);
            }
        }
        println!();
    }

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed == 0 {
        println!("All {} machine(s) completed", reports.len());
    } else {
        println!("{} of {} machine(s) did not complete", failed, reports.len());
    }
    println!("{}", RULE);
}

fn format_event(target: &DeploymentTarget, phase: Phase, event: &PhaseEvent) -> Option<String> {
    match event {
        PhaseEvent::Line { role, line } => Some(format!("[{} {}] {}", target.instance, role, line)),
        PhaseEvent::State(PhaseState::Streaming) => None,
        PhaseEvent::State(state) => Some(format!("[{}] {} {}", target.instance, phase, state)),
    }
}

/// Streams process output and phase transitions to stdout
pub struct ConsolePrinter;

impl ProgressSink for ConsolePrinter {
    fn on_event(&self, target: &DeploymentTarget, phase: Phase, event: &PhaseEvent) {
        if let Some(text) = format_event(target, phase, event) {
            println!("{}", text);
        }
    }
}
