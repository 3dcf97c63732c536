//! MetalLB load balancer
//!
//! Applies the upstream native manifest, waits for the address-pool CRDs,
//! then applies the environment's `overlays/metallb` tree (the IP pool and
//! L2 advertisement). The overlay apply is retried because MetalLB's
//! validating webhook rejects pools until its controller is serving.

use async_trait::async_trait;
use kindling_common::config::LoadBalancerConfig;
use kindling_common::poll::wait_until_ready;
use kindling_common::tools::Toolbox;
use kindling_common::Result;
use tracing::info;

use crate::component::{ComponentId, ComponentSpec, InstallStrategy};
use crate::context::InstallContext;
use crate::installer::Installer;
use crate::probe::{Prober, ReadinessProbe};

const OVERLAY: &str = "metallb";

/// Installs MetalLB
pub struct MetalLbInstaller {
    config: LoadBalancerConfig,
    tools: Toolbox,
    prober: Prober,
    spec: ComponentSpec,
}

impl MetalLbInstaller {
    /// Create the installer
    pub fn new(config: LoadBalancerConfig, tools: Toolbox, prober: Prober) -> Self {
        let mut probes: Vec<ReadinessProbe> = config
            .crds
            .iter()
            .map(|name| ReadinessProbe::CrdEstablished { name: name.clone() })
            .collect();
        probes.push(ReadinessProbe::DeploymentAvailable {
            name: config.controller_deployment.clone(),
            namespace: config.namespace.clone(),
        });
        let spec = ComponentSpec {
            id: ComponentId::LoadBalancer,
            depends_on: Vec::new(),
            strategy: InstallStrategy::ManifestApply,
            probe: ReadinessProbe::All(probes),
            poll: config.poll,
        };
        Self {
            config,
            tools,
            prober,
            spec,
        }
    }

    async fn crds_established(&self) -> Result<bool> {
        for crd in &self.config.crds {
            if !self.tools.kubectl.crd_established(crd).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, ctx: &InstallContext) -> Result<()> {
        info!(url = %self.config.manifest_url, "Applying MetalLB manifest");
        self.tools
            .kubectl
            .apply_url(&self.config.manifest_url, None)
            .await?;

        wait_until_ready(&self.config.crd_poll, "metallb crds", move || {
            self.crds_established()
        })
        .await?;

        let overlay = ctx.overlay_dir(OVERLAY);
        let Some(snapshot) = ctx
            .render_kustomization(&self.tools, &overlay, OVERLAY)
            .await?
        else {
            return Ok(());
        };
        info!(snapshot = %snapshot.display(), "Applying MetalLB address pool");
        let (snapshot, kubectl) = (&snapshot, &self.tools.kubectl);
        wait_until_ready(
            &self.config.overlay_poll,
            "metallb address pool",
            move || async move { kubectl.apply_file(snapshot, None).await.map(|_| true) },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Installer for MetalLbInstaller {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        self.apply(ctx).await
    }

    async fn update(&self, ctx: &InstallContext) -> Result<()> {
        self.apply(ctx).await
    }

    async fn is_ready(&self) -> Result<bool> {
        self.prober.check(&self.spec.probe).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::{context, prober, scripted};
    use kindling_common::{CommandOutput, Error, PollConfig};

    fn installer(
        runner: &std::sync::Arc<kindling_common::testing::ScriptedRunner>,
    ) -> MetalLbInstaller {
        let config = LoadBalancerConfig {
            crd_poll: PollConfig::new(5, 3),
            overlay_poll: PollConfig::new(5, 3),
            ..LoadBalancerConfig::default()
        };
        MetalLbInstaller::new(config, Toolbox::new(runner.clone()), prober(runner))
    }

    #[tokio::test(start_paused = true)]
    async fn install_applies_manifest_waits_for_crds_then_overlay() {
        let (dir, ctx) = context();
        let overlay = ctx.overlay_dir("metallb");
        std::fs::create_dir_all(&overlay).expect("mkdir");
        std::fs::write(overlay.join("kustomization.yaml"), "resources: [pool.yaml]\n")
            .expect("write");

        let runner = scripted();
        runner.on_sequence(
            "kubectl wait --for=condition=established",
            vec![
                CommandOutput::failed(1, "error: timed out waiting for the condition"),
                CommandOutput::ok("condition met"),
            ],
        );
        runner.on("kustomize build", CommandOutput::ok("kind: IPAddressPool\n"));

        installer(&runner).install(&ctx).await.expect("install");

        let calls = runner.calls();
        assert!(calls[0].starts_with("kubectl apply -f https://raw.githubusercontent.com/metallb"));
        let last_wait = runner
            .calls()
            .iter()
            .rposition(|c| c.starts_with("kubectl wait"))
            .expect("waited");
        let build = runner.position("kustomize build").expect("built overlay");
        assert!(last_wait < build);
        drop(dir);
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_apply_is_retried_until_webhook_accepts() {
        let (_dir, ctx) = context();
        let overlay = ctx.overlay_dir("metallb");
        std::fs::create_dir_all(&overlay).expect("mkdir");
        std::fs::write(overlay.join("kustomization.yaml"), "resources: []\n").expect("write");

        let runner = scripted();
        runner.on_sequence(
            "kubectl apply -f /",
            vec![
                CommandOutput::failed(
                    1,
                    "failed calling webhook \"ipaddresspoolvalidationwebhook.metallb.io\"",
                ),
                CommandOutput::ok("ipaddresspool.metallb.io/default created"),
            ],
        );

        installer(&runner).install(&ctx).await.expect("install");
        assert_eq!(runner.count("kustomize build"), 1);
        assert_eq!(runner.count("kubectl apply -f /"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_build_failure_is_not_retried() {
        let (_dir, ctx) = context();
        let overlay = ctx.overlay_dir("metallb");
        std::fs::create_dir_all(&overlay).expect("mkdir");
        std::fs::write(overlay.join("kustomization.yaml"), "resources: [pool.yaml]\n")
            .expect("write");

        let runner = scripted();
        runner.on(
            "kustomize build",
            CommandOutput::failed(1, "Error: accumulating resources: pool.yaml: no such file"),
        );

        let err = installer(&runner)
            .install(&ctx)
            .await
            .expect_err("broken overlay");
        assert!(matches!(err, Error::ExternalCommand { .. }));
        assert_eq!(runner.count("kustomize build"), 1);
        assert_eq!(runner.count("kubectl apply -f /"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn crds_never_established_is_a_timeout() {
        let (_dir, ctx) = context();
        let runner = scripted();
        runner.on(
            "kubectl wait",
            CommandOutput::failed(1, "error: timed out waiting for the condition"),
        );
        let err = installer(&runner)
            .install(&ctx)
            .await
            .expect_err("crds never ready");
        assert!(matches!(err, Error::ReadinessTimeout { attempts: 3, .. }));
        assert_eq!(runner.count("kustomize"), 0);
    }

    #[test]
    fn spec_has_no_dependencies() {
        let runner = scripted();
        let installer = installer(&runner);
        assert_eq!(installer.spec().id, ComponentId::LoadBalancer);
        assert!(installer.spec().depends_on.is_empty());
        assert_eq!(installer.spec().probe.leaves().len(), 3);
    }
}
