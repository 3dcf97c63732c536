//! ArgoCD GitOps engine
//!
//! Installed from the upstream manifest into its own namespace, optionally
//! with the image updater add-on, then configured from `overlays/argocd`.
//! When a repository SSH key is configured it is written into every
//! repository Secret in the overlay before the overlay is applied.

use std::path::Path;

use async_trait::async_trait;
use kindling_common::config::GitOpsConfig;
use kindling_common::tools::Toolbox;
use kindling_common::{Error, Result};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::component::{ComponentId, ComponentSpec, InstallStrategy};
use crate::context::InstallContext;
use crate::installer::{AccessInfo, Installer};
use crate::probe::{Prober, ReadinessProbe};

const OVERLAY: &str = "argocd";

/// Label ArgoCD uses to find repository credentials
const SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";

/// Installs ArgoCD
pub struct ArgoCdInstaller {
    config: GitOpsConfig,
    url: String,
    tools: Toolbox,
    prober: Prober,
    spec: ComponentSpec,
}

impl ArgoCdInstaller {
    /// Create the installer; the UI is expected at `https://<host_prefix>.<domain>:<https_port>`
    pub fn new(config: GitOpsConfig, domain: &str, tools: Toolbox, prober: Prober) -> Self {
        let url = format!(
            "https://{}.{}:{}",
            config.host_prefix, domain, config.https_port
        );
        let spec = ComponentSpec {
            id: ComponentId::GitOps,
            depends_on: vec![ComponentId::Ingress],
            strategy: InstallStrategy::ManifestApply,
            probe: ReadinessProbe::All(vec![
                ReadinessProbe::SecretExists {
                    name: config.admin_secret.clone(),
                    namespace: config.namespace.clone(),
                },
                ReadinessProbe::DeploymentAvailable {
                    name: config.server_deployment.clone(),
                    namespace: config.namespace.clone(),
                },
                ReadinessProbe::HttpsEndpoint { url: url.clone() },
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

    async fn apply(&self, ctx: &InstallContext) -> Result<()> {
        let ns = self.config.namespace.as_str();
        self.tools.kubectl.create_namespace(ns).await?;

        info!(url = %self.config.manifest_url, "Applying ArgoCD manifest");
        self.tools
            .kubectl
            .apply_url(&self.config.manifest_url, Some(ns))
            .await?;

        if let Some(url) = &self.config.image_updater_url {
            info!(url = %url, "Applying ArgoCD image updater manifest");
            self.tools.kubectl.apply_url(url, Some(ns)).await?;
        }

        let overlay = ctx.overlay_dir(OVERLAY);
        if let Some(key) = &self.config.repo_ssh_key {
            inject_repository_key(&overlay, key)?;
        }
        ctx.apply_kustomization(&self.tools, &overlay, OVERLAY)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Installer for ArgoCdInstaller {
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

    async fn restart(&self) -> Result<()> {
        self.tools
            .kubectl
            .rollout_restart(&self.config.server_deployment, &self.config.namespace)
            .await
    }

    async fn access(&self) -> Result<Option<AccessInfo>> {
        let password = self
            .tools
            .kubectl
            .secret_value(&self.config.admin_secret, &self.config.namespace, "password")
            .await?;
        Ok(Some(AccessInfo {
            name: "ArgoCD".to_string(),
            url: self.url.clone(),
            username: "admin".to_string(),
            password,
        }))
    }
}

// =============================================================================
// Repository credentials
// =============================================================================

/// Write `key_path`'s contents into every repository Secret manifest in `overlay`.
///
/// Returns the number of manifests rewritten. A missing overlay directory
/// rewrites nothing.
pub fn inject_repository_key(overlay: &Path, key_path: &Path) -> Result<usize> {
    if !overlay.is_dir() {
        return Ok(0);
    }
    let key = std::fs::read_to_string(key_path).map_err(|e| Error::filesystem(key_path, e))?;

    let mut entries: Vec<_> = std::fs::read_dir(overlay)
        .map_err(|e| Error::filesystem(overlay, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
        .collect();
    entries.sort();

    let mut rewritten = 0;
    for path in entries {
        let manifest = std::fs::read_to_string(&path).map_err(|e| Error::filesystem(&path, e))?;
        if let Some(updated) = with_repository_key(&manifest, &key)? {
            std::fs::write(&path, updated).map_err(|e| Error::filesystem(&path, e))?;
            info!(manifest = %path.display(), "Injected repository SSH key");
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Set `stringData.sshPrivateKey` on a repository Secret; `None` for any other manifest
pub fn with_repository_key(manifest: &str, key: &str) -> Result<Option<String>> {
    let mut doc: Value = match serde_yaml::from_str(manifest) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(error = %e, "Skipping manifest that is not a single YAML document");
            return Ok(None);
        }
    };

    let is_secret = doc.get("kind").and_then(Value::as_str) == Some("Secret");
    let secret_type = doc
        .get("metadata")
        .and_then(|m| m.get("labels"))
        .and_then(|l| l.get(SECRET_TYPE_LABEL))
        .and_then(Value::as_str);
    if !is_secret || !matches!(secret_type, Some("repository" | "repo-creds")) {
        return Ok(None);
    }

    let Some(root) = doc.as_mapping_mut() else {
        return Ok(None);
    };
    let string_data = root
        .entry(Value::from("stringData"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    let Some(string_data) = string_data.as_mapping_mut() else {
        return Err(Error::serialization("stringData is not a mapping"));
    };
    string_data.insert(Value::from("sshPrivateKey"), Value::from(key));

    serde_yaml::to_string(&doc)
        .map(Some)
        .map_err(|e| Error::serialization(format!("failed to write secret manifest: {e}")))
}
