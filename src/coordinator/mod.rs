//! Deployment coordinator
//!
//! Runs the operator-facing pipeline over the configuration store:
//! load and edit configuration, validate, push parameters, reconcile peering,
//! upload inputs, and drive both protocol phases. Every remote step validates
//! first, so a bad configuration never reaches a machine.

use crate::config::shared::parse_shared_config_file;
use crate::config::store::{ConfigStore, UpdateOutcome};
use crate::config::toml::{Settings, TransportKind};
use crate::config::validator::{validate_config, ValidatedConfig};
use crate::config::DeploymentTarget;
use crate::error::{LaunchResult, ValidationError};
use crate::orchestrator::driver::{drive_all, MachinePlan, MachineReport, ProgressSink};
use crate::orchestrator::Orchestrator;
use crate::peering::gcloud::GcloudPeering;
use crate::peering::{reconcile_machine, PeeringApi, ReconcileReport};
use crate::plan::{plan_machine, RoleParameterSet};
use crate::remote::gcloud::GcloudShell;
use crate::remote::local::LocalShell;
use crate::remote::transfer::{self, InputFiles};
use crate::remote::writer::{self, WriteReport};
use crate::remote::RemoteShell;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything `deploy` did, per machine
#[derive(Debug, Default)]
pub struct DeployOutcome {
    pub writes: Vec<(DeploymentTarget, Vec<WriteReport>)>,
    pub peerings: Vec<(DeploymentTarget, Vec<ReconcileReport>)>,
    pub machines: Vec<MachineReport>,
}

pub struct Coordinator {
    settings: Settings,
    store: ConfigStore,
    shell: Arc<dyn RemoteShell>,
    peering: Arc<dyn PeeringApi>,
}

impl Coordinator {
    pub fn new(
        settings: Settings,
        store: ConfigStore,
        shell: Arc<dyn RemoteShell>,
        peering: Arc<dyn PeeringApi>,
    ) -> Self {
        Self {
            settings,
            store,
            shell,
            peering,
        }
    }

    /// Coordinator using the transport named in `settings`
    pub fn from_settings(settings: Settings, store: ConfigStore) -> Self {
        let binary = settings.transport.gcloud_binary.clone();
        let shell: Arc<dyn RemoteShell> = match settings.transport.kind {
            TransportKind::Gcloud => Arc::new(GcloudShell::new(binary.clone())),
            TransportKind::Local => Arc::new(LocalShell::new()),
        };
        Self::new(settings, store, shell, Arc::new(GcloudPeering::new(binary)))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Load a shared configuration file, optionally assigning this machine's roles
    pub fn load_config(
        &self,
        target: &DeploymentTarget,
        path: &Path,
        cp_role: Option<u32>,
        s_role: Option<u32>,
    ) -> Result<()> {
        let mut shared = parse_shared_config_file(path)?;
        if let Some(cp) = cp_role {
            shared.parameters.push(("cpRole".to_string(), vec![cp.to_string()]));
        }
        if let Some(s) = s_role {
            shared.parameters.push(("sRole".to_string(), vec![s.to_string()]));
        }

        self.store
            .load_shared(target, &shared)
            .with_context(|| format!("Failed to load {} for {}", path.display(), target))?;
        info!(%target, file = %path.display(), "shared configuration loaded");
        Ok(())
    }

    /// Update one field from raw tokens
    pub fn set<S: AsRef<str>>(&self, target: &DeploymentTarget, field: &str, values: &[S]) -> LaunchResult<UpdateOutcome> {
        Ok(self.store.update(target, field, values)?)
    }

    /// Validated configuration of `target`; never creates a store entry
    pub fn validated(&self, target: &DeploymentTarget) -> LaunchResult<ValidatedConfig> {
        let config = self
            .store
            .peek(target)
            .ok_or_else(|| ValidationError::UnknownTarget(target.clone()))?;
        Ok(validate_config(&config)?)
    }

    pub fn plan(&self, target: &DeploymentTarget) -> LaunchResult<Vec<RoleParameterSet>> {
        Ok(plan_machine(&self.validated(target)?))
    }

    /// Write every role's parameters on `target`
    pub async fn push(&self, target: &DeploymentTarget) -> LaunchResult<Vec<WriteReport>> {
        let sets = self.plan(target)?;
        writer::apply_all(self.shell.as_ref(), &self.settings.remote, target, &sets).await
    }

    /// Create the peerings `target`'s roles still miss
    pub async fn peer(&self, target: &DeploymentTarget) -> LaunchResult<Vec<ReconcileReport>> {
        let config = self.validated(target)?;
        reconcile_machine(self.peering.as_ref(), &self.settings.provisioning, &config).await
    }

    /// Copy the input files `target`'s roles need from `dir`
    pub async fn upload(&self, target: &DeploymentTarget, dir: &Path) -> LaunchResult<usize> {
        let config = self.validated(target)?;
        let inputs = InputFiles::from_dir(dir, config.roles())?;
        transfer::upload(self.shell.as_ref(), &self.settings.remote, target, &inputs).await
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.shell),
            self.settings.remote.clone(),
            self.settings.orchestrator.clone(),
        )
    }

    /// Validate every target before anything remote happens
    fn machine_plans(&self, targets: &[DeploymentTarget]) -> LaunchResult<Vec<MachinePlan>> {
        targets
            .iter()
            .map(|target| {
                Ok(MachinePlan {
                    target: target.clone(),
                    config: self.validated(target)?,
                })
            })
            .collect()
    }

    /// Drive both phases on every target concurrently
    pub async fn run(
        &self,
        targets: &[DeploymentTarget],
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> LaunchResult<Vec<MachineReport>> {
        let plans = self.machine_plans(targets)?;
        Ok(drive_all(&self.orchestrator(), plans, sink, cancel).await)
    }

    /// Push, peer, then run on every target
    ///
    /// Parameter writes for all machines finish before any process starts.
    pub async fn deploy(
        &self,
        targets: &[DeploymentTarget],
        skip_peering: bool,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> LaunchResult<DeployOutcome> {
        let plans = self.machine_plans(targets)?;
        let mut outcome = DeployOutcome::default();

        for plan in &plans {
            let sets = plan_machine(&plan.config);
            let reports = writer::apply_all(self.shell.as_ref(), &self.settings.remote, &plan.target, &sets).await?;
            outcome.writes.push((plan.target.clone(), reports));
        }

        if !skip_peering {
            for plan in &plans {
                let reports =
                    reconcile_machine(self.peering.as_ref(), &self.settings.provisioning, &plan.config).await?;
                outcome.peerings.push((plan.target.clone(), reports));
            }
        }

        outcome.machines = drive_all(&self.orchestrator(), plans, sink, cancel).await;
        Ok(outcome)
    }

    /// Forget a torn-down machine
    pub fn forget(&self, target: &DeploymentTarget) -> bool {
        let removed = self.store.remove(target);
        if removed {
            info!(%target, "configuration removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use crate::orchestrator::driver::NullSink;
    use crate::orchestrator::PhaseState;
    use crate::peering::PeeringRequest;
    use crate::remote::RemoteLayout;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        requests: Mutex<Vec<PeeringRequest>>,
    }

    #[async_trait]
    impl PeeringApi for RecordingApi {
        async fn peered_projects(&self, _project: &str, _network: &str) -> LaunchResult<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }

        async fn create_peering(&self, request: &PeeringRequest) -> LaunchResult<()> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    const SHARED: &str = "\
P0 10.0.0.2
P1 10.0.1.2
P2 10.0.2.2
P3 10.0.3.2
P0_P1 8000
P0_P2 8003
P1_P2 8001
P1_P3 8002
P2_P3 8004
P0 proj-cp0
P1 proj-cp1
P2 proj-cp2
P3 proj-s0 proj-s1
numS 2
NUM_INDS 1000 1200
NUM_SNPS 50000
NUM_COVS 3
NUM_CHUNKS 10 12
NUM_THREADS 4
NTL_NUM_THREADS 2
";

    const SEEDED_PAR: &str = "\
NUM_INDS 0
NUM_SNPS 0
NUM_COVS 0
NUM_CHUNKS 0
NUM_THREADS 0
NTL_NUM_THREADS 0
PORT_P0_P1 0
PORT_P1_P2 0
PORT_P1_P3 0
IP_ADDR_P0 0
SNP_POS_FILE x
CACHE_FILE_PREFIX x
";

    struct Fixture {
        dir: tempfile::TempDir,
        coordinator: Coordinator,
        peering: Arc<RecordingApi>,
        target: DeploymentTarget,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let mut settings = Settings::default();
        settings.remote = RemoteLayout::new(root, root);
        settings.transport.kind = TransportKind::Local;
        settings.orchestrator.teardown_grace_secs = 0;
        settings.provisioning.settle_delay_secs = 0;

        let layout = settings.remote.clone();
        fs::create_dir_all(layout.par_dir()).unwrap();
        fs::write(layout.par_file(crate::config::Role::Cp1), SEEDED_PAR).unwrap();
        let bin = dir.path().join("code/bin");
        fs::create_dir_all(&bin).unwrap();
        for name in ["DataSharingClient", "GwasClient"] {
            let path = bin.join(name);
            fs::write(&path, "#!/bin/sh\necho running $1\necho completed\n").unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }
        fs::write(dir.path().join("shared.txt"), SHARED).unwrap();

        let peering = Arc::new(RecordingApi::default());
        let coordinator = Coordinator::new(
            settings,
            ConfigStore::new(),
            Arc::new(LocalShell::new()),
            Arc::clone(&peering) as Arc<dyn PeeringApi>,
        );
        Fixture {
            dir,
            coordinator,
            peering,
            target: DeploymentTarget::new("proj-cp1", "us-central1-a", "cp1"),
        }
    }

    #[test]
    fn test_load_config_with_roles() {
        let f = fixture();
        f.coordinator
            .load_config(&f.target, &f.dir.path().join("shared.txt"), Some(1), None)
            .unwrap();

        let config = f.coordinator.store().get(&f.target);
        assert_eq!(config.cp_role, Some(1));
        assert_eq!(config.num_inds, vec![1000, 1200]);

        let sets = f.coordinator.plan(&f.target).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].get("PORT_P1_P3"), Some("8002 8042"));
    }

    #[test]
    fn test_load_config_rejects_bad_s_role() {
        let f = fixture();
        let err = f
            .coordinator
            .load_config(&f.target, &f.dir.path().join("shared.txt"), None, Some(5))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load"));
        assert_eq!(f.coordinator.store().peek(&f.target), None);
    }

    #[tokio::test]
    async fn test_push_before_validation_fails_cleanly() {
        let f = fixture();
        f.coordinator.set(&f.target, "cpRole", &["1"]).unwrap();
        let err = f.coordinator.push(&f.target).await.unwrap_err();
        assert!(matches!(err, LaunchError::Validation(ValidationError::MissingField("numS"))));

        let untouched = fs::read_to_string(f.coordinator.settings().remote.par_file(crate::config::Role::Cp1)).unwrap();
        assert_eq!(untouched, SEEDED_PAR);
    }

    #[tokio::test]
    async fn test_deploy_end_to_end() {
        let f = fixture();
        f.coordinator
            .load_config(&f.target, &f.dir.path().join("shared.txt"), Some(1), None)
            .unwrap();

        let outcome = f
            .coordinator
            .deploy(&[f.target.clone()], false, Arc::new(NullSink), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.writes.len(), 1);
        assert!(outcome.writes[0].1[0].missing_keys.is_empty());
        let par = fs::read_to_string(f.coordinator.settings().remote.par_file(crate::config::Role::Cp1)).unwrap();
        assert!(par.contains("PORT_P0_P1 8000 8040\n"));
        assert!(par.contains("IP_ADDR_P0 10.0.0.2\n"));

        assert_eq!(f.peering.requests.lock().unwrap().len(), 4);

        assert_eq!(outcome.machines.len(), 1);
        let phases: Vec<PhaseState> = outcome.machines[0].phases.iter().map(|p| p.state).collect();
        assert_eq!(phases, vec![PhaseState::Completed, PhaseState::Completed]);
    }

    #[tokio::test]
    async fn test_run_validates_every_machine_first() {
        let f = fixture();
        f.coordinator
            .load_config(&f.target, &f.dir.path().join("shared.txt"), Some(1), None)
            .unwrap();
        let unconfigured = DeploymentTarget::new("proj-cp2", "us-central1-a", "cp2");

        let err = f
            .coordinator
            .run(&[f.target.clone(), unconfigured], Arc::new(NullSink), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Validation(ValidationError::UnknownTarget(_))));
    }

    #[tokio::test]
    async fn test_reads_never_create_entries() {
        let f = fixture();
        assert!(matches!(
            f.coordinator.plan(&f.target),
            Err(LaunchError::Validation(ValidationError::UnknownTarget(_)))
        ));
        assert!(f.coordinator.push(&f.target).await.is_err());
        assert!(f
            .coordinator
            .run(&[f.target.clone()], Arc::new(NullSink), CancellationToken::new())
            .await
            .is_err());
        assert!(f.coordinator.store().targets().is_empty());
    }

    #[test]
    fn test_forget() {
        let f = fixture();
        f.coordinator.set(&f.target, "numS", &["1"]).unwrap();
        assert!(f.coordinator.forget(&f.target));
        assert!(!f.coordinator.forget(&f.target));
    }
}
