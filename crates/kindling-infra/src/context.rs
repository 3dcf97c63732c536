//! Per-run install context and the render-then-apply step for kustomize trees

use std::path::{Path, PathBuf};

use kindling_common::tools::Toolbox;
use kindling_common::{EpochTag, Error, Result, OVERLAYS_DIR};
use tracing::{debug, info};

/// File kustomize looks for in a directory
const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// What an installer needs to know about the current run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallContext {
    /// Environment (cluster) name
    pub environment: String,
    /// Freshly materialized manifest tree for the environment
    pub manifest_root: PathBuf,
    /// Where rendered manifest snapshots are written
    pub snapshot_dir: PathBuf,
    /// Tag of this run
    pub epoch: EpochTag,
}

impl InstallContext {
    /// `<manifest_root>/overlays/<name>`
    pub fn overlay_dir(&self, name: &str) -> PathBuf {
        self.manifest_root.join(OVERLAYS_DIR).join(name)
    }

    /// A path relative to the manifest root
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.manifest_root.join(relative)
    }

    /// `<snapshot_dir>/<label>-<epoch>.yaml`
    pub fn snapshot_path(&self, label: &str) -> PathBuf {
        self.snapshot_dir.join(format!("{label}-{}.yaml", self.epoch))
    }

    /// A file under the manifest root, if present
    pub fn optional_file(&self, relative: &Path) -> Option<PathBuf> {
        let path = self.resolve(relative);
        if path.is_file() {
            Some(path)
        } else {
            debug!(path = %path.display(), "Optional file not present, skipping");
            None
        }
    }

    /// Build a kustomize tree and write the output to a snapshot file.
    ///
    /// A directory without a `kustomization.yaml` is skipped and `Ok(None)`
    /// returned.
    pub async fn render_kustomization(
        &self,
        tools: &Toolbox,
        dir: &Path,
        label: &str,
    ) -> Result<Option<PathBuf>> {
        if !dir.join(KUSTOMIZATION_FILE).is_file() {
            debug!(dir = %dir.display(), "No kustomization, skipping");
            return Ok(None);
        }

        let rendered = tools.kustomize.build(dir).await?;
        std::fs::create_dir_all(&self.snapshot_dir)
            .map_err(|e| Error::filesystem(&self.snapshot_dir, e))?;
        let snapshot = self.snapshot_path(label);
        std::fs::write(&snapshot, rendered).map_err(|e| Error::filesystem(&snapshot, e))?;
        Ok(Some(snapshot))
    }

    /// Render a kustomize tree, then apply the snapshot.
    ///
    /// Build errors surface before anything touches the cluster.
    pub async fn apply_kustomization(
        &self,
        tools: &Toolbox,
        dir: &Path,
        label: &str,
    ) -> Result<Option<PathBuf>> {
        let Some(snapshot) = self.render_kustomization(tools, dir, label).await? else {
            return Ok(None);
        };
        info!(label, snapshot = %snapshot.display(), "Applying rendered manifests");
        tools.kubectl.apply_file(&snapshot, None).await?;
        Ok(Some(snapshot))
    }
}
