//! JSON run reports
//!
//! One document per `run`/`deploy` invocation with the outcome of every phase
//! on every machine, for archiving alongside the study results.

use crate::orchestrator::driver::MachineReport;
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tool: &'static str,
    pub version: &'static str,
    /// Host the launcher ran on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub machines: Vec<MachineReport>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, machines: Vec<MachineReport>) -> Self {
        let hostname = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned());
        Self {
            tool: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            hostname,
            started_at,
            finished_at: Utc::now(),
            succeeded: !machines.is_empty() && machines.iter().all(MachineReport::succeeded),
            machines,
        }
    }
}

/// Write the report to `path`
pub fn write_json_report(path: &Path, report: &RunReport, pretty: bool) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(writer, report)?;
    } else {
        serde_json::to_writer(writer, report)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentTarget, Role};
    use crate::orchestrator::{Phase, PhaseReport, PhaseState};
    use serde_json::Value;

    fn machine(state: PhaseState) -> MachineReport {
        let target = DeploymentTarget::new("proj-cp1", "us-central1-a", "cp1");
        MachineReport {
            target: target.clone(),
            roles: "{CP1}".to_string(),
            phases: vec![PhaseReport {
                target,
                phase: Phase::DataSharing,
                state,
                roles: vec![Role::Cp1],
                lines: 12,
                elapsed_secs: 3.5,
                failed_role: None,
                error: None,
            }],
        }
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = RunReport::new(Utc::now(), vec![machine(PhaseState::Completed)]);

        write_json_report(&path, &report, true).unwrap();

        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["tool"], "gwas-launch");
        assert_eq!(value["succeeded"], true);
        assert_eq!(value["machines"][0]["target"]["instance"], "cp1");
        assert_eq!(value["machines"][0]["phases"][0]["phase"], "data-sharing");
        assert_eq!(value["machines"][0]["phases"][0]["lines"], 12);
    }

    #[test]
    fn test_failed_machine_marks_report() {
        let report = RunReport::new(Utc::now(), vec![machine(PhaseState::Failed)]);
        assert!(!report.succeeded);
        assert!(!RunReport::new(Utc::now(), Vec::new()).succeeded);
    }
}
