//! Cluster lifecycle orchestration
//!
//! A [`Cluster`] is built fresh for every invocation. Whether the kind
//! cluster exists is asked of `kind get clusters` each time, and which
//! components are ready is asked of their probes; nothing is persisted
//! between runs.
//!
//! Every kubectl and helm command is pinned to the environment's kind
//! context (`kind-<name>`), whatever context happens to be current.
//!
//! Convergence follows the [`Plan`]: each component is installed (or, when
//! already observed ready on an existing cluster, updated), then polled
//! until ready before the next step runs. A restart invalidates the
//! component's readiness and it is polled again from scratch. Any failure
//! ends the run in [`ClusterState::Failed`] without rolling anything back;
//! re-running is the recovery path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kindling_common::config::validate_dns_label;
use kindling_common::poll::wait_until_ready;
use kindling_common::tools::{Kind, Toolbox};
use kindling_common::{
    CommandRunner, EpochTag, Error, PlatformConfig, Result, BASE_DIR, KIND_CONFIG_FILE,
};
use kindling_infra::{
    default_installers, ComponentId, HttpsProbe, InstallContext, Installer, Prober,
};
use tracing::{debug, error, info};

use crate::hosts::{check_hosts_file, HOSTS_FILE};
use crate::info::ClusterInfo;
use crate::manifest::ManifestMaterializer;
use crate::plan::{Plan, Step};
use crate::state::ClusterState;

/// Phase progress log with `[Phase n/m]` prefixes
#[derive(Debug, Default)]
struct PhaseLog {
    total: usize,
    current: usize,
    label: String,
}

impl PhaseLog {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn enter(&mut self, label: impl Into<String>) {
        self.current += 1;
        self.label = label.into();
        info!("[Phase {}/{}] {}...", self.current, self.total, self.label);
    }

    fn succeeded(&self) {
        info!("[Phase {}/{}] {} succeeded", self.current, self.total, self.label);
    }

    fn failed(&self, err: &Error) {
        if self.current > 0 {
            error!(
                "[Phase {}/{}] {} failed: {}",
                self.current, self.total, self.label, err
            );
        }
    }
}

/// A named local environment and the installers that make up its platform
pub struct Cluster {
    name: String,
    state: ClusterState,
    tools: Toolbox,
    installers: Vec<Box<dyn Installer>>,
    materializer: ManifestMaterializer,
    plan: Plan,
    snapshot_dir: PathBuf,
    hostnames: Vec<String>,
    hosts_file: PathBuf,
    epoch: EpochTag,
    ready: Vec<ComponentId>,
    phases: PhaseLog,
}

impl Cluster {
    /// Create the entity for environment `name`.
    ///
    /// The name must be a lowercase RFC 1123 label; the installers must be
    /// able to run the standard platform plan. `tools` is pinned to the
    /// environment's kind context.
    pub fn new(
        name: &str,
        config: &PlatformConfig,
        tools: Toolbox,
        installers: Vec<Box<dyn Installer>>,
        materializer: ManifestMaterializer,
    ) -> Result<Self> {
        validate_dns_label("cluster name", name)?;
        let cluster = Self {
            name: name.to_string(),
            state: ClusterState::Absent,
            tools: tools.with_context(&Kind::context_name(name)),
            installers,
            materializer,
            plan: Plan::platform(),
            snapshot_dir: config.snapshot_dir(name),
            hostnames: vec![
                config.host(&config.gitops.host_prefix),
                config.host(&config.monitoring.grafana_host_prefix),
            ],
            hosts_file: PathBuf::from(HOSTS_FILE),
            epoch: EpochTag::now(),
            ready: Vec::new(),
            phases: PhaseLog::default(),
        };
        cluster.validate_plan()?;
        Ok(cluster)
    }

    /// The real platform: process runner, HTTPS probe and every installer
    pub fn from_config(
        name: &str,
        config: &PlatformConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let tools = Toolbox::new(runner).with_context(&Kind::context_name(name));
        let prober = Prober::new(tools.kubectl.clone(), Arc::new(HttpsProbe::new()?));
        let installers = default_installers(config, tools.clone(), prober);
        let materializer = ManifestMaterializer::from_config(config)?;
        Self::new(name, config, tools, installers, materializer)
    }

    /// Replace the convergence plan
    pub fn with_plan(mut self, plan: Plan) -> Result<Self> {
        self.plan = plan;
        self.validate_plan()?;
        Ok(self)
    }

    /// Check a different hosts file in preflight
    pub fn with_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hosts_file = path.into();
        self
    }

    /// Environment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> ClusterState {
        self.state
    }

    /// Components observed ready in this run, in observation order
    pub fn ready_components(&self) -> &[ComponentId] {
        &self.ready
    }

    fn validate_plan(&self) -> Result<()> {
        let specs: Vec<_> = self.installers.iter().map(|i| i.spec()).collect();
        self.plan.validate(&specs)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Bring the environment to `Ready`.
    ///
    /// An existing cluster keeps its control plane and goes through the
    /// update path instead.
    pub async fn create(&mut self) -> Result<()> {
        let result = self.create_inner().await;
        self.settle(result)
    }

    /// Re-apply configuration to an existing environment
    pub async fn update(&mut self) -> Result<()> {
        let result = self.update_inner().await;
        self.settle(result)
    }

    /// Remove the kind cluster. A cluster that does not exist is left alone.
    pub async fn delete(&mut self) -> Result<()> {
        let result = self.delete_inner().await;
        self.settle(result)
    }

    /// Nodes and UI credentials for a cluster whose components are all ready
    pub async fn info(&mut self) -> Result<ClusterInfo> {
        if !self.tools.kind.exists(&self.name).await? {
            return Err(Error::ClusterNotFound {
                name: self.name.clone(),
            });
        }
        self.observe_ready().await;

        let pending: Vec<String> = self
            .installers
            .iter()
            .map(|i| i.spec().id)
            .filter(|id| !self.ready.contains(id))
            .map(|id| id.to_string())
            .collect();
        if !pending.is_empty() {
            return Err(Error::NotReady {
                name: self.name.clone(),
                pending,
            });
        }
        self.observe_present();

        let nodes = self.tools.kubectl.nodes_table().await?;
        let mut access = Vec::new();
        for installer in &self.installers {
            if let Some(info) = installer.access().await? {
                access.push(info);
            }
        }
        Ok(ClusterInfo {
            name: self.name.clone(),
            nodes,
            access,
        })
    }

    // =========================================================================
    // Paths
    // =========================================================================

    async fn create_inner(&mut self) -> Result<()> {
        self.preflight().await?;
        if self.tools.kind.exists(&self.name).await? {
            info!(
                cluster = %self.name,
                "Cluster already exists, skipping control plane creation"
            );
            self.observe_present();
            return self.reconcile().await;
        }

        self.phases = PhaseLog::new(self.plan.len() + 3);
        self.transition(ClusterState::Provisioning)?;

        let root = self.materialize()?;

        self.phases.enter("Creating control plane");
        self.tools
            .kind
            .create(&self.name, &root.join(KIND_CONFIG_FILE))
            .await?;
        self.phases.succeeded();

        self.transition(ClusterState::Converging)?;
        let ctx = self.install_context(root);
        self.converge(&ctx).await?;
        self.finalize(&ctx).await?;
        self.transition(ClusterState::Ready)
    }

    async fn update_inner(&mut self) -> Result<()> {
        self.preflight().await?;
        if !self.tools.kind.exists(&self.name).await? {
            return Err(Error::ClusterNotFound {
                name: self.name.clone(),
            });
        }
        self.observe_present();
        self.reconcile().await
    }

    async fn reconcile(&mut self) -> Result<()> {
        self.phases = PhaseLog::new(self.plan.len() + 2);
        self.transition(ClusterState::Updating)?;
        self.observe_ready().await;

        let root = self.materialize()?;
        let ctx = self.install_context(root);
        self.converge(&ctx).await?;
        self.finalize(&ctx).await?;
        self.transition(ClusterState::Ready)
    }

    async fn delete_inner(&mut self) -> Result<()> {
        if !self.tools.kind.exists(&self.name).await? {
            info!(cluster = %self.name, "Cluster does not exist, nothing to delete");
            return Ok(());
        }
        self.observe_present();
        self.transition(ClusterState::Deleting)?;
        self.tools.kind.delete(&self.name).await?;
        self.ready.clear();
        self.transition(ClusterState::Absent)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn preflight(&self) -> Result<()> {
        self.tools.check_prerequisites().await?;
        check_hosts_file(&self.hosts_file, &self.hostnames);
        Ok(())
    }

    fn materialize(&mut self) -> Result<PathBuf> {
        self.phases.enter("Materializing manifests");
        let root = self.materializer.materialize(&self.name)?;
        self.phases.succeeded();
        Ok(root)
    }

    async fn converge(&mut self, ctx: &InstallContext) -> Result<()> {
        let steps = self.plan.steps().to_vec();
        for step in steps {
            self.phases.enter(step_label(step));
            self.run_step(step, ctx).await?;
            self.phases.succeeded();
        }
        Ok(())
    }

    async fn run_step(&mut self, step: Step, ctx: &InstallContext) -> Result<()> {
        match step {
            Step::Converge(id) => {
                let index = self.installer_index(id)?;
                self.check_dependencies(index)?;
                let installer = &self.installers[index];
                if self.ready.contains(&id) {
                    info!(component = %id, "Component ready, updating configuration");
                    installer.update(ctx).await
                } else {
                    info!(
                        component = %id,
                        strategy = %installer.spec().strategy,
                        "Installing component"
                    );
                    installer.install(ctx).await?;
                    self.wait_ready(index).await
                }
            }
            Step::Restart(id) => {
                let index = self.installer_index(id)?;
                info!(component = %id, "Restarting component");
                self.installers[index].restart().await?;
                self.ready.retain(|c| *c != id);
                self.wait_ready(index).await
            }
        }
    }

    async fn finalize(&mut self, ctx: &InstallContext) -> Result<()> {
        self.phases.enter("Applying environment base and context");
        self.tools.kubectl.create_namespace(&self.name).await?;
        ctx.apply_kustomization(&self.tools, &ctx.manifest_root.join(BASE_DIR), BASE_DIR)
            .await?;
        self.tools
            .kubectl
            .use_context(&Kind::context_name(&self.name))
            .await?;
        self.tools.kubectl.set_context_namespace(&self.name).await?;
        self.phases.succeeded();
        Ok(())
    }

    async fn wait_ready(&mut self, index: usize) -> Result<()> {
        let installer = &self.installers[index];
        let spec = installer.spec();
        let (id, poll) = (spec.id, spec.poll);
        let what = format!("{id} readiness");
        let attempts = wait_until_ready(&poll, &what, move || installer.is_ready()).await?;
        info!(component = %id, attempts, "Component ready");
        self.mark_ready(id);
        Ok(())
    }

    /// One probe per component; a failing probe counts as not ready
    async fn observe_ready(&mut self) {
        self.ready.clear();
        let mut observed = Vec::new();
        for installer in &self.installers {
            let id = installer.spec().id;
            match installer.is_ready().await {
                Ok(true) => observed.push(id),
                Ok(false) => debug!(component = %id, "Component not ready"),
                Err(e) => debug!(component = %id, error = %e, "Readiness probe failed"),
            }
        }
        for id in observed {
            self.mark_ready(id);
        }
    }

    fn check_dependencies(&self, index: usize) -> Result<()> {
        let spec = self.installers[index].spec();
        let missing: Vec<String> = spec
            .depends_on
            .iter()
            .filter(|dep| !self.ready.contains(dep))
            .map(ToString::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::DependencyNotReady {
                component: spec.id.to_string(),
                missing,
            })
        }
    }

    fn installer_index(&self, id: ComponentId) -> Result<usize> {
        self.installers
            .iter()
            .position(|i| i.spec().id == id)
            .ok_or_else(|| Error::internal(format!("no installer for {id}")))
    }

    fn mark_ready(&mut self, id: ComponentId) {
        if !self.ready.contains(&id) {
            self.ready.push(id);
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    fn install_context(&self, manifest_root: PathBuf) -> InstallContext {
        InstallContext {
            environment: self.name.clone(),
            manifest_root,
            snapshot_dir: self.snapshot_dir.clone(),
            epoch: self.epoch,
        }
    }

    fn transition(&mut self, next: ClusterState) -> Result<()> {
        self.state = self.state.transition(next)?;
        debug!(cluster = %self.name, state = %self.state, "State changed");
        Ok(())
    }

    /// The control plane was seen by `kind get clusters`
    fn observe_present(&mut self) {
        self.state = ClusterState::Ready;
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.phases.failed(e);
            if self.state.can_transition_to(ClusterState::Failed) {
                self.state = ClusterState::Failed;
            }
        }
        result
    }
}

fn step_label(step: Step) -> String {
    match step {
        Step::Converge(id) => format!("Converging {id}"),
        Step::Restart(id) => format!("Restarting {id}"),
    }
}

/// Delete every kind cluster with a manifest tree under `manifests_dir`.
///
/// Clusters this tool did not create are left alone. Returns the names deleted.
pub async fn delete_all_managed(tools: &Toolbox, manifests_dir: &Path) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in tools.kind.clusters().await? {
        if manifests_dir.join(&name).is_dir() {
            tools.kind.delete(&name).await?;
            deleted.push(name);
        } else {
            info!(cluster = %name, "Not managed by kindling, leaving it");
        }
    }
    Ok(deleted)
}
