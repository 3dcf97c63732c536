//! helm
//!
//! Repository commands are local to the helm client. Release commands carry
//! `--kube-context <name>` when a context is set.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::HelmRelease;
use crate::runner::{Applied, CommandRunner, CommandSpec};
use crate::Result;

/// `helm` wrapper
#[derive(Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    context: Option<String>,
}

impl Helm {
    /// Wrap `runner`, using whatever context is current
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            context: None,
        }
    }

    /// Install releases through the kubeconfig context `context`
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// `helm repo add <name> <url>`, tolerating an existing repository
    pub async fn repo_add(&self, name: &str, url: &str) -> Result<Applied> {
        let spec = CommandSpec::new("helm").args(["repo", "add", name, url]);
        self.runner.run(&spec).await.allow_existing(&spec)
    }

    /// `helm repo update`
    pub async fn repo_update(&self) -> Result<()> {
        let spec = CommandSpec::new("helm").args(["repo", "update"]);
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }

    /// `helm install <release> <chart> --namespace <ns> --create-namespace [-f <values>]`.
    ///
    /// A release name already in use counts as installed.
    pub async fn install(
        &self,
        release: &HelmRelease,
        namespace: &str,
        values: Option<&Path>,
    ) -> Result<Applied> {
        info!(release = %release.name, chart = %release.chart, namespace, "Installing chart");
        let spec = self
            .release_spec("install", release, namespace, values)
            .arg("--create-namespace");
        self.runner.run(&spec).await.allow_existing(&spec)
    }

    /// `helm upgrade <release> <chart> --namespace <ns> [-f <values>]`
    pub async fn upgrade(
        &self,
        release: &HelmRelease,
        namespace: &str,
        values: Option<&Path>,
    ) -> Result<()> {
        info!(release = %release.name, chart = %release.chart, namespace, "Upgrading chart");
        let spec = self.release_spec("upgrade", release, namespace, values);
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }

    fn release_spec(
        &self,
        verb: &str,
        release: &HelmRelease,
        namespace: &str,
        values: Option<&Path>,
    ) -> CommandSpec {
        let spec = CommandSpec::new("helm").args([
            verb,
            release.name.as_str(),
            release.chart.as_str(),
            "--namespace",
            namespace,
        ]);
        let spec = match values {
            Some(path) => spec.args(["-f".to_string(), path.display().to_string()]),
            None => spec,
        };
        match &self.context {
            Some(context) => spec.args(["--kube-context", context.as_str()]),
            None => spec,
        }
    }
}
