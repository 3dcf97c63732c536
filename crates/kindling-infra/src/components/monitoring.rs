//! Observability stack: Prometheus, Grafana and Loki from their Helm charts,
//! plus the environment's `overlays/monitoring` tree (ingress routes and
//! dashboards).

use std::collections::BTreeSet;

use async_trait::async_trait;
use kindling_common::config::MonitoringConfig;
use kindling_common::tools::Toolbox;
use kindling_common::Result;
use tracing::info;

use crate::component::{ComponentId, ComponentSpec, InstallStrategy};
use crate::context::InstallContext;
use crate::installer::{AccessInfo, Installer};
use crate::probe::{Prober, ReadinessProbe};

const OVERLAY: &str = "monitoring";

/// Key of the Grafana admin password in its secret
const GRAFANA_PASSWORD_KEY: &str = "admin-password";

/// Installs the monitoring charts
pub struct MonitoringInstaller {
    config: MonitoringConfig,
    url: String,
    tools: Toolbox,
    prober: Prober,
    spec: ComponentSpec,
}

impl MonitoringInstaller {
    /// Create the installer; Grafana is expected at `url`
    pub fn new(config: MonitoringConfig, url: String, tools: Toolbox, prober: Prober) -> Self {
        let spec = ComponentSpec {
            id: ComponentId::Monitoring,
            depends_on: vec![ComponentId::Ingress, ComponentId::GitOps],
            strategy: InstallStrategy::PackageManager,
            probe: ReadinessProbe::All(vec![
                ReadinessProbe::SecretExists {
                    name: config.grafana_secret.clone(),
                    namespace: config.namespace.clone(),
                },
                ReadinessProbe::DeploymentAvailable {
                    name: config.grafana_deployment.clone(),
                    namespace: config.namespace.clone(),
                },
            ]),
            poll: config.poll,
        };
        Self {
            config,
            url,
            tools,
            prober,
            spec,
        }
    }

    async fn apply_overlay(&self, ctx: &InstallContext) -> Result<()> {
        ctx.apply_kustomization(&self.tools, &ctx.overlay_dir(OVERLAY), OVERLAY)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Installer for MonitoringInstaller {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        let mut repos = BTreeSet::new();
        for release in &self.config.releases {
            if repos.insert(release.repo_name.as_str()) {
                self.tools
                    .helm
                    .repo_add(&release.repo_name, &release.repo_url)
                    .await?;
            }
        }
        self.tools.helm.repo_update().await?;

        for release in &self.config.releases {
            let values = release
                .values_file
                .as_deref()
                .and_then(|v| ctx.optional_file(v));
            self.tools
                .helm
                .install(release, &self.config.namespace, values.as_deref())
                .await?;
        }
        self.apply_overlay(ctx).await
    }

    async fn update(&self, ctx: &InstallContext) -> Result<()> {
        self.tools.helm.repo_update().await?;
        for release in &self.config.releases {
            info!(release = %release.name, "Refreshing monitoring release");
            let values = release
                .values_file
                .as_deref()
                .and_then(|v| ctx.optional_file(v));
            self.tools
                .helm
                .upgrade(release, &self.config.namespace, values.as_deref())
                .await?;
        }
        self.apply_overlay(ctx).await
    }

    async fn is_ready(&self) -> Result<bool> {
        self.prober.check(&self.spec.probe).await
    }

    async fn access(&self) -> Result<Option<AccessInfo>> {
        let password = self
            .tools
            .kubectl
            .secret_value(
                &self.config.grafana_secret,
                &self.config.namespace,
                GRAFANA_PASSWORD_KEY,
            )
            .await?;
        Ok(Some(AccessInfo {
            name: "Grafana".to_string(),
            url: self.url.clone(),
            username: "admin".to_string(),
            password,
        }))
    }
}
