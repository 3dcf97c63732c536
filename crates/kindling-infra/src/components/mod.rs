//! Installers for each platform component

pub mod argocd;
pub mod metallb;
pub mod monitoring;
pub mod tls;
pub mod traefik;

pub use argocd::ArgoCdInstaller;
pub use metallb::MetalLbInstaller;
pub use monitoring::MonitoringInstaller;
pub use tls::TlsInstaller;
pub use traefik::TraefikInstaller;

use kindling_common::tools::Toolbox;
use kindling_common::PlatformConfig;

use crate::installer::Installer;
use crate::probe::Prober;

/// The full platform, in install order
pub fn default_installers(
    config: &PlatformConfig,
    tools: Toolbox,
    prober: Prober,
) -> Vec<Box<dyn Installer>> {
    let gitops_host = config.host(&config.gitops.host_prefix);
    let grafana_url = format!(
        "https://{}:{}",
        config.host(&config.monitoring.grafana_host_prefix),
        config.gitops.https_port
    );
    vec![
        Box::new(MetalLbInstaller::new(
            config.load_balancer.clone(),
            tools.clone(),
            prober.clone(),
        )),
        Box::new(TraefikInstaller::new(
            config.ingress.clone(),
            tools.clone(),
            prober.clone(),
        )),
        Box::new(ArgoCdInstaller::new(
            config.gitops.clone(),
            &config.domain,
            tools.clone(),
            prober.clone(),
        )),
        Box::new(TlsInstaller::new(
            config.tls.clone(),
            config.tls_dir(),
            gitops_host,
            config.gitops.namespace.clone(),
            tools.clone(),
            prober.clone(),
        )),
        Box::new(MonitoringInstaller::new(
            config.monitoring.clone(),
            grafana_url,
            tools,
            prober,
        )),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use kindling_common::testing::ScriptedRunner;
    use kindling_common::tools::Kubectl;
    use kindling_common::EpochTag;
    use tempfile::TempDir;

    use crate::context::InstallContext;
    use crate::probe::{MockEndpointProbe, Prober};

    pub fn scripted() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new())
    }

    /// Prober over `runner` whose endpoints always answer 200
    pub fn prober(runner: &Arc<ScriptedRunner>) -> Prober {
        let mut endpoint = MockEndpointProbe::new();
        endpoint.expect_status().returning(|_| Ok(200));
        Prober::new(Kubectl::new(runner.clone()), Arc::new(endpoint))
    }

    /// Context for environment `demo` rooted in a fresh temp dir
    pub fn context() -> (TempDir, InstallContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = InstallContext {
            environment: "demo".to_string(),
            manifest_root: dir.path().join("k8s/demo"),
            snapshot_dir: dir.path().join("scratch/demo"),
            epoch: EpochTag::now(),
        };
        (dir, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentId;
    use test_support::{prober, scripted};

    #[test]
    fn installers_follow_dependency_order() {
        let runner = scripted();
        let installers = default_installers(
            &PlatformConfig::default(),
            Toolbox::new(runner.clone()),
            prober(&runner),
        );
        let ids: Vec<ComponentId> = installers.iter().map(|i| i.spec().id).collect();
        assert_eq!(ids, ComponentId::ALL.to_vec());

        for (pos, installer) in installers.iter().enumerate() {
            for dep in &installer.spec().depends_on {
                let dep_pos = ids.iter().position(|id| id == dep).expect("known dependency");
                assert!(dep_pos < pos, "{} installs before {}", dep, installer.spec().id);
            }
        }
    }
}
