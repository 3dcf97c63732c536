//! kind cluster runtime

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::runner::{Applied, CommandRunner, CommandSpec};
use crate::Result;

/// `kind` wrapper
#[derive(Clone)]
pub struct Kind {
    runner: Arc<dyn CommandRunner>,
}

impl Kind {
    /// Wrap `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// The kubeconfig context kind writes for cluster `name`
    pub fn context_name(name: &str) -> String {
        format!("kind-{name}")
    }

    /// Names from `kind get clusters`.
    ///
    /// With no clusters kind prints "No kind clusters found." on stderr and
    /// nothing on stdout, so the list is simply empty.
    pub async fn clusters(&self) -> Result<Vec<String>> {
        let spec = CommandSpec::new("kind").args(["get", "clusters"]);
        let output = self.runner.run(&spec).await.check(&spec)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Whether a cluster called `name` exists
    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.clusters().await?.iter().any(|c| c == name))
    }

    /// `kind create cluster --config <config> --name <name>`
    pub async fn create(&self, name: &str, config: &Path) -> Result<Applied> {
        info!(cluster = %name, config = %config.display(), "Creating kind cluster");
        let spec = CommandSpec::new("kind").args([
            "create".to_string(),
            "cluster".to_string(),
            "--config".to_string(),
            config.display().to_string(),
            "--name".to_string(),
            name.to_string(),
        ]);
        self.runner.run(&spec).await.allow_existing(&spec)
    }

    /// `kind delete cluster --name <name>`
    pub async fn delete(&self, name: &str) -> Result<()> {
        info!(cluster = %name, "Deleting kind cluster");
        let spec = CommandSpec::new("kind").args(["delete", "cluster", "--name", name]);
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }
}
