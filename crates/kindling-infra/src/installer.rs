//! The installer seam the orchestrator drives

use async_trait::async_trait;
use kindling_common::{Error, Result};

use crate::component::ComponentSpec;
use crate::context::InstallContext;

/// Connection details for a platform UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessInfo {
    /// Display name ("ArgoCD", "Grafana")
    pub name: String,
    /// UI address
    pub url: String,
    /// Login user
    pub username: String,
    /// Login password, when it could be read
    pub password: Option<String>,
}

/// Adapter that installs and configures one platform component.
///
/// Installers never wait on their own readiness and never check
/// dependencies; sequencing and polling belong to the orchestrator.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Static description: id, dependencies, probe, poll budget
    fn spec(&self) -> &ComponentSpec;

    /// Install the component. An "already exists" answer from the
    /// underlying tool is success; re-running may re-apply harmlessly.
    async fn install(&self, ctx: &InstallContext) -> Result<()>;

    /// Re-apply configuration to an installed component without recreating it
    async fn update(&self, ctx: &InstallContext) -> Result<()>;

    /// Evaluate the readiness probe once
    async fn is_ready(&self) -> Result<bool>;

    /// Rolling restart. Only components whose new configuration requires one support it.
    async fn restart(&self) -> Result<()> {
        Err(Error::internal(format!(
            "{} does not support restart",
            self.spec().id
        )))
    }

    /// Connection details shown once the platform is ready
    async fn access(&self) -> Result<Option<AccessInfo>> {
        Ok(None)
    }
}
