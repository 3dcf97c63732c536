//! Traefik ingress controller, installed from its Helm chart

use async_trait::async_trait;
use kindling_common::config::IngressConfig;
use kindling_common::tools::Toolbox;
use kindling_common::Result;

use crate::component::{ComponentId, ComponentSpec, InstallStrategy};
use crate::context::InstallContext;
use crate::installer::Installer;
use crate::probe::{Prober, ReadinessProbe};

/// Installs Traefik
pub struct TraefikInstaller {
    config: IngressConfig,
    tools: Toolbox,
    prober: Prober,
    spec: ComponentSpec,
}

impl TraefikInstaller {
    /// Create the installer
    pub fn new(config: IngressConfig, tools: Toolbox, prober: Prober) -> Self {
        let spec = ComponentSpec {
            id: ComponentId::Ingress,
            depends_on: vec![ComponentId::LoadBalancer],
            strategy: InstallStrategy::PackageManager,
            probe: ReadinessProbe::All(vec![
                ReadinessProbe::CrdEstablished {
                    name: config.crd.clone(),
                },
                ReadinessProbe::DeploymentAvailable {
                    name: config.deployment.clone(),
                    namespace: config.namespace.clone(),
                },
            ]),
            poll: config.poll,
        };
        Self {
            config,
            tools,
            prober,
            spec,
        }
    }
}

#[async_trait]
impl Installer for TraefikInstaller {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        let release = &self.config.release;
        self.tools
            .helm
            .repo_add(&release.repo_name, &release.repo_url)
            .await?;
        self.tools.helm.repo_update().await?;

        let values = release
            .values_file
            .as_deref()
            .and_then(|v| ctx.optional_file(v));
        self.tools
            .helm
            .install(release, &self.config.namespace, values.as_deref())
            .await?;
        Ok(())
    }

    async fn update(&self, ctx: &InstallContext) -> Result<()> {
        let release = &self.config.release;
        let values = release
            .values_file
            .as_deref()
            .and_then(|v| ctx.optional_file(v));
        self.tools
            .helm
            .upgrade(release, &self.config.namespace, values.as_deref())
            .await
    }

    async fn is_ready(&self) -> Result<bool> {
        self.prober.check(&self.spec.probe).await
    }
}
