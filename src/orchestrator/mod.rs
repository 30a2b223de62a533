//! Remote process orchestrator
//!
//! Launches the processes of one phase on one machine, streams their output
//! back line by line, and drives the phase through
//! `Idle -> Launching -> Streaming -> {Completed | Terminated | Failed}`.
//!
//! A process is logically done when it prints the sentinel line, whether or
//! not it exits; it is terminated right away. A stream that closes before its
//! sentinel fails the phase. Every process is terminated before the phase
//! task finishes, on every path.

pub mod driver;
pub mod phase;
pub mod process;

pub use phase::{phase_processes, Phase, ProcessSpec};

use crate::config::{DeploymentTarget, Role};
use crate::error::{LaunchError, LaunchResult};
use crate::remote::{RemoteLayout, RemoteShell};
use process::RemoteProcess;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

/// Line a protocol process prints when its logical work is done
pub const DEFAULT_SENTINEL: &str = "completed";

/// Lifecycle state of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    Idle,
    Launching,
    Streaming,
    Completed,
    Terminated,
    Failed,
}

impl PhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseState::Completed | PhaseState::Terminated | PhaseState::Failed)
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseState::Idle => "idle",
            PhaseState::Launching => "launching",
            PhaseState::Streaming => "streaming",
            PhaseState::Completed => "completed",
            PhaseState::Terminated => "terminated",
            PhaseState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Event delivered to the caller of a running phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    State(PhaseState),
    /// Non-empty output line of one process
    Line { role: Role, line: String },
}

/// Final outcome of a phase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
    pub target: DeploymentTarget,
    pub phase: Phase,
    pub state: PhaseState,
    pub roles: Vec<Role>,
    /// Output lines forwarded to the caller
    pub lines: usize,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseReport {
    /// `Ok` for a completed phase, the matching error otherwise
    pub fn into_result(self) -> LaunchResult<PhaseReport> {
        match (self.state, self.failed_role) {
            (PhaseState::Completed, _) => Ok(self),
            (_, Some(role)) => Err(LaunchError::ProcessStream {
                target: self.target,
                phase: self.phase,
                role,
            }),
            (state, None) => Err(LaunchError::Transport {
                target: self.target,
                reason: self
                    .error
                    .unwrap_or_else(|| format!("{} phase ended {}", self.phase, state)),
            }),
        }
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorOptions {
    pub sentinel: String,
    /// Seconds between the polite and the forced kill
    pub teardown_grace_secs: u64,
    /// Seconds a teardown waits for a just-launched process to record its pid
    pub pid_wait_secs: u64,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            teardown_grace_secs: 2,
            pid_wait_secs: 15,
        }
    }
}

/// Launches phases on deployment targets
#[derive(Clone)]
pub struct Orchestrator {
    shell: Arc<dyn RemoteShell>,
    layout: RemoteLayout,
    options: OrchestratorOptions,
}

/// Handle to a launched phase
///
/// Dropping the handle cancels the phase; its processes are terminated in the
/// background.
pub struct PhaseHandle {
    target: DeploymentTarget,
    phase: Phase,
    events: mpsc::UnboundedReceiver<PhaseEvent>,
    cancel: CancellationToken,
    guard: Option<DropGuard>,
    task: JoinHandle<PhaseReport>,
}

impl PhaseHandle {
    pub fn target(&self) -> &DeploymentTarget {
        &self.target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Next event; `None` once the phase task has finished
    pub async fn next_event(&mut self) -> Option<PhaseEvent> {
        self.events.recv().await
    }

    /// Request termination of every process of the phase
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Discard remaining events and wait for the final report
    pub async fn wait(mut self) -> PhaseReport {
        while self.events.recv().await.is_some() {}
        let result = (&mut self.task).await;
        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
        match result {
            Ok(report) => report,
            Err(e) => PhaseReport {
                target: self.target.clone(),
                phase: self.phase,
                state: PhaseState::Failed,
                roles: Vec::new(),
                lines: 0,
                elapsed_secs: 0.0,
                failed_role: None,
                error: Some(format!("phase task aborted: {}", e)),
            },
        }
    }
}

enum StreamMessage {
    Line(usize, String),
    Sentinel(usize),
    Closed(usize),
}

/// Forward the non-empty lines of one stream; stop reading at the sentinel
async fn read_stream<R>(index: usize, stream: R, sentinel: String, tx: mpsc::UnboundedSender<StreamMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if line.trim() == sentinel {
                    let _ = tx.send(StreamMessage::Sentinel(index));
                    return;
                }
                if !line.trim().is_empty() && tx.send(StreamMessage::Line(index, line.to_string())).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(index, error = %e, "output stream read failed");
                break;
            }
        }
    }
    let _ = tx.send(StreamMessage::Closed(index));
}

/// Log stderr of a process at debug level
async fn drain_stderr<R>(target: DeploymentTarget, role: Role, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%target, %role, stderr = %line);
    }
}

impl Orchestrator {
    pub fn new(shell: Arc<dyn RemoteShell>, layout: RemoteLayout, options: OrchestratorOptions) -> Self {
        Self { shell, layout, options }
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Start `specs` for `phase` on `target`; returns immediately
    pub fn launch(&self, target: &DeploymentTarget, phase: Phase, specs: Vec<ProcessSpec>) -> PhaseHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        let task = tokio::spawn(self.clone().run_phase(target.clone(), phase, specs, tx, cancel.clone()));

        PhaseHandle {
            target: target.clone(),
            phase,
            events: rx,
            cancel,
            guard: Some(guard),
            task,
        }
    }

    async fn run_phase(
        self,
        target: DeploymentTarget,
        phase: Phase,
        specs: Vec<ProcessSpec>,
        events: mpsc::UnboundedSender<PhaseEvent>,
        cancel: CancellationToken,
    ) -> PhaseReport {
        let started = Instant::now();
        let roles: Vec<Role> = specs.iter().map(|s| s.role).collect();
        let mut report = PhaseReport {
            target: target.clone(),
            phase,
            state: PhaseState::Idle,
            roles: roles.clone(),
            lines: 0,
            elapsed_secs: 0.0,
            failed_role: None,
            error: None,
        };

        let set_state = |report: &mut PhaseReport, state: PhaseState| {
            report.state = state;
            // The caller may have stopped listening; the phase still runs to the end
            let _ = events.send(PhaseEvent::State(state));
        };

        set_state(&mut report, PhaseState::Launching);
        info!(%target, %phase, roles = ?roles, "launching phase");

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let mut processes: Vec<RemoteProcess> = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let spawned = RemoteProcess::spawn(
                Arc::clone(&self.shell),
                &self.layout,
                &target,
                phase,
                spec,
                &self.options,
            );
            let mut process = match spawned {
                Ok(process) => process,
                Err(e) => {
                    warn!(%target, %phase, role = %spec.role, error = %e, "failed to launch process");
                    report.failed_role = Some(spec.role);
                    report.error = Some(e.to_string());
                    terminate_all(&mut processes).await;
                    set_state(&mut report, PhaseState::Failed);
                    report.elapsed_secs = started.elapsed().as_secs_f64();
                    return report;
                }
            };
            if let Some(stdout) = process.take_stdout() {
                tokio::spawn(read_stream(index, stdout, self.options.sentinel.clone(), line_tx.clone()));
            }
            if let Some(stderr) = process.take_stderr() {
                tokio::spawn(drain_stderr(target.clone(), spec.role, stderr));
            }
            processes.push(process);
        }
        drop(line_tx);

        if processes.is_empty() {
            info!(%target, %phase, "no processes to run");
            set_state(&mut report, PhaseState::Completed);
            return report;
        }

        set_state(&mut report, PhaseState::Streaming);
        let mut done = vec![false; processes.len()];

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(%target, %phase, "phase cancelled");
                    break PhaseState::Terminated;
                }
                message = line_rx.recv() => match message {
                    Some(StreamMessage::Line(index, line)) => {
                        report.lines += 1;
                        let _ = events.send(PhaseEvent::Line { role: roles[index], line });
                    }
                    Some(StreamMessage::Sentinel(index)) => {
                        info!(%target, %phase, role = %roles[index], "completion sentinel received");
                        done[index] = true;
                        processes[index].terminate().await;
                        if done.iter().all(|d| *d) {
                            break PhaseState::Completed;
                        }
                    }
                    Some(StreamMessage::Closed(index)) => {
                        warn!(%target, %phase, role = %roles[index], "output stream closed before completion");
                        report.failed_role = Some(roles[index]);
                        report.error = Some(format!("{} process for {} stopped before completion", phase, roles[index]));
                        break PhaseState::Failed;
                    }
                    None => {
                        report.error = Some("all output streams closed".to_string());
                        break PhaseState::Failed;
                    }
                },
            }
        };

        terminate_all(&mut processes).await;
        report.elapsed_secs = started.elapsed().as_secs_f64();
        set_state(&mut report, outcome);
        info!(%target, %phase, state = %outcome, lines = report.lines, "phase finished");
        report
    }
}

async fn terminate_all(processes: &mut [RemoteProcess]) {
    for process in processes.iter_mut() {
        process.terminate().await;
    }
}
