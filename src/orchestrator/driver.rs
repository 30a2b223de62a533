//! Two-phase driving policy
//!
//! On one machine the GWAS phase starts only after data sharing completed.
//! Machines are independent: each runs on its own task with no barrier
//! between them.

use super::{phase_processes, Orchestrator, Phase, PhaseEvent, PhaseReport, PhaseState};
use crate::config::validator::ValidatedConfig;
use crate::config::DeploymentTarget;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A machine and the configuration it runs with
#[derive(Debug, Clone)]
pub struct MachinePlan {
    pub target: DeploymentTarget,
    pub config: ValidatedConfig,
}

/// Outcome of every phase run on one machine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineReport {
    pub target: DeploymentTarget,
    pub roles: String,
    pub phases: Vec<PhaseReport>,
}

impl MachineReport {
    /// Every phase the machine needed completed
    pub fn succeeded(&self) -> bool {
        !self.phases.is_empty() && self.phases.iter().all(|p| p.state == PhaseState::Completed)
    }
}

/// Receives the events of every running phase
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, target: &DeploymentTarget, phase: Phase, event: &PhaseEvent);
}

/// Sink that discards events
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_event(&self, _target: &DeploymentTarget, _phase: Phase, _event: &PhaseEvent) {}
}

async fn run_one(
    orchestrator: &Orchestrator,
    plan: &MachinePlan,
    phase: Phase,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> PhaseReport {
    let specs = phase_processes(phase, plan.config.roles());
    let mut handle = orchestrator.launch(&plan.target, phase, specs);

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => sink.on_event(&plan.target, phase, &event),
                None => break,
            },
            _ = cancel.cancelled() => {
                handle.cancel();
                while let Some(event) = handle.next_event().await {
                    sink.on_event(&plan.target, phase, &event);
                }
                break;
            }
        }
    }

    handle.wait().await
}

/// Data sharing, then GWAS if data sharing completed and the machine has a
/// computing-party role
pub async fn drive_machine(
    orchestrator: &Orchestrator,
    plan: &MachinePlan,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> MachineReport {
    let roles = plan.config.roles();
    let mut report = MachineReport {
        target: plan.target.clone(),
        roles: roles.to_string(),
        phases: Vec::with_capacity(2),
    };

    let sharing = run_one(orchestrator, plan, Phase::DataSharing, sink, cancel).await;
    let shared = sharing.state == PhaseState::Completed;
    report.phases.push(sharing);

    if !shared {
        error!(target = %plan.target, "data sharing did not complete; skipping GWAS phase");
        return report;
    }
    if roles.computing().is_none() {
        info!(target = %plan.target, "data party only; no GWAS phase on this machine");
        return report;
    }

    report
        .phases
        .push(run_one(orchestrator, plan, Phase::Gwas, sink, cancel).await);
    report
}

/// Drive every machine concurrently; reports come back in target order
pub async fn drive_all(
    orchestrator: &Orchestrator,
    plans: Vec<MachinePlan>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> Vec<MachineReport> {
    let mut tasks = JoinSet::new();
    for plan in plans {
        let orchestrator = orchestrator.clone();
        let sink = Arc::clone(&sink);
        let cancel = cancel.clone();
        tasks.spawn(async move { drive_machine(&orchestrator, &plan, sink.as_ref(), &cancel).await });
    }

    let mut reports = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => error!(error = %e, "machine task panicked"),
        }
    }
    reports.sort_by(|a, b| a.target.cmp(&b.target));
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validator::tests::study_config;
    use crate::config::validator::validate_config;
    use crate::config::Role;
    use crate::orchestrator::OrchestratorOptions;
    use crate::remote::local::LocalShell;
    use crate::remote::RemoteLayout;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Phase, PhaseEvent)>>,
    }

    impl ProgressSink for Recorder {
        fn on_event(&self, _target: &DeploymentTarget, phase: Phase, event: &PhaseEvent) {
            self.events.lock().unwrap().push((phase, event.clone()));
        }
    }

    /// Installation whose protocol binaries are shell scripts
    fn install(root: &Path, data_sharing: &str, gwas: &str) {
        let bin = root.join("code/bin");
        fs::create_dir_all(&bin).unwrap();
        for (name, body) in [("DataSharingClient", data_sharing), ("GwasClient", gwas)] {
            let path = bin.join(name);
            fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }
    }

    fn orchestrator(root: &Path) -> Orchestrator {
        let root = root.to_str().unwrap();
        Orchestrator::new(
            Arc::new(LocalShell::new()),
            RemoteLayout::new(root, root),
            OrchestratorOptions {
                teardown_grace_secs: 0,
                ..Default::default()
            },
        )
    }

    fn plan(cp_role: Option<u32>, s_role: Option<u32>) -> MachinePlan {
        let mut config = study_config();
        config.cp_role = cp_role;
        config.s_role = s_role;
        MachinePlan {
            target: DeploymentTarget::new("local", "none", "localhost"),
            config: validate_config(&config).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_both_phases_in_order() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "echo sharing $1; echo completed", "echo gwas $1; echo completed");
        let recorder = Recorder::default();

        let report = drive_machine(
            &orchestrator(dir.path()),
            &plan(Some(1), None),
            &recorder,
            &CancellationToken::new(),
        )
        .await;

        assert!(report.succeeded());
        assert_eq!(report.phases.len(), 2);
        let lines: Vec<(Phase, String)> = recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(phase, event)| match event {
                PhaseEvent::Line { line, .. } => Some((*phase, line.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec![
                (Phase::DataSharing, "sharing 1".to_string()),
                (Phase::Gwas, "gwas 1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_sharing_skips_gwas() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "echo oops; exit 1", "echo completed");

        let report = drive_machine(
            &orchestrator(dir.path()),
            &plan(Some(0), None),
            &NullSink,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.phases[0].state, PhaseState::Failed);
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn test_data_party_runs_sharing_only() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "echo input $3; echo completed", "exit 1");

        let report = drive_machine(
            &orchestrator(dir.path()),
            &plan(None, Some(0)),
            &NullSink,
            &CancellationToken::new(),
        )
        .await;

        assert!(report.succeeded());
        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.phases[0].roles, vec![Role::DataParty]);
    }

    #[tokio::test]
    async fn test_cancel_stops_machine() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), "echo waiting; sleep 30", "echo completed");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let reports = drive_all(
            &orchestrator(dir.path()),
            vec![plan(Some(2), None)],
            Arc::new(NullSink),
            cancel,
        )
        .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].phases.len(), 1);
        assert_eq!(reports[0].phases[0].state, PhaseState::Terminated);
    }
}
