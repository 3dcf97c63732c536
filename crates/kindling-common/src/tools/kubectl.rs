//! kubectl
//!
//! JSON output is decoded into `k8s-openapi` types. A `NotFound` answer from
//! `get` is an absent object (`Ok(None)`), not an error.
//!
//! With a context set, every command that talks to an API server carries
//! `--context <name>`; `config` subcommands only edit the kubeconfig and never
//! do.

use std::path::Path;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::runner::{Applied, CommandErrorKind, CommandRunner, CommandSpec};
use crate::{Error, Result};

/// Per-attempt timeout given to `kubectl wait`; the caller's poller owns the overall budget
const WAIT_ATTEMPT_TIMEOUT: &str = "--timeout=1s";

/// `kubectl` wrapper
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    context: Option<String>,
}

impl Kubectl {
    /// Wrap `runner`, using whatever context is current
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            context: None,
        }
    }

    /// Target the kubeconfig context `context` instead of the current one
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The context commands are pinned to, if any
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn spec(&self, args: &[&str], namespace: Option<&str>) -> CommandSpec {
        let spec = Self::config_spec(args);
        let spec = match namespace {
            Some(ns) => spec.args(["-n", ns]),
            None => spec,
        };
        match &self.context {
            Some(context) => spec.args(["--context", context.as_str()]),
            None => spec,
        }
    }

    fn config_spec(args: &[&str]) -> CommandSpec {
        CommandSpec::new("kubectl").args(args.iter().copied())
    }

    /// `kubectl apply -f <path> [-n <namespace>]`
    pub async fn apply_file(&self, path: &Path, namespace: Option<&str>) -> Result<()> {
        let path = path.display().to_string();
        self.apply(&path, namespace).await
    }

    /// `kubectl apply -f <url> [-n <namespace>]`
    pub async fn apply_url(&self, url: &str, namespace: Option<&str>) -> Result<()> {
        self.apply(url, namespace).await
    }

    async fn apply(&self, source: &str, namespace: Option<&str>) -> Result<()> {
        debug!(source, "Applying manifest");
        let spec = self.spec(&["apply", "-f", source], namespace);
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }

    /// `kubectl get <resource> <name> -n <namespace> -o json`, decoded
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Option<T>> {
        let spec = self.spec(&["get", resource, name, "-o", "json"], Some(namespace));
        let output = self.runner.run(&spec).await;
        if output.kind() == Some(CommandErrorKind::NotFound) {
            return Ok(None);
        }
        let output = output.check(&spec)?;
        serde_json::from_str(&output.stdout).map(Some).map_err(|e| {
            Error::serialization(format!("failed to decode {resource}/{name}: {e}"))
        })
    }

    /// The secret, if it exists
    pub async fn secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>> {
        self.get_json("secret", name, namespace).await
    }

    /// Whether the secret exists
    pub async fn secret_exists(&self, name: &str, namespace: &str) -> Result<bool> {
        Ok(self.secret(name, namespace).await?.is_some())
    }

    /// A decoded value from a secret's `data`
    pub async fn secret_value(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let Some(secret) = self.secret(name, namespace).await? else {
            return Ok(None);
        };
        let Some(value) = secret.data.as_ref().and_then(|data| data.get(key)) else {
            return Ok(None);
        };
        String::from_utf8(value.0.clone())
            .map(Some)
            .map_err(|_| Error::serialization(format!("secret {name}/{key} is not UTF-8")))
    }

    /// Whether the deployment is available with its latest template fully rolled out
    pub async fn deployment_ready(&self, name: &str, namespace: &str) -> Result<bool> {
        let deployment: Option<Deployment> = self.get_json("deployment", name, namespace).await?;
        Ok(deployment.as_ref().is_some_and(rollout_complete))
    }

    /// One check of `kubectl wait --for=condition=established crd/<name>`.
    ///
    /// A CRD that does not exist yet, or is not yet established within the
    /// short per-call timeout, is `Ok(false)`.
    pub async fn crd_established(&self, name: &str) -> Result<bool> {
        let crd = format!("crd/{name}");
        let spec = self.spec(
            &[
                "wait",
                "--for=condition=established",
                WAIT_ATTEMPT_TIMEOUT,
                &crd,
            ],
            None,
        );
        let output = self.runner.run(&spec).await;
        match output.kind() {
            None => Ok(true),
            Some(CommandErrorKind::NotFound) => Ok(false),
            Some(_) if output.stderr.contains("timed out") => Ok(false),
            Some(_) => output.check(&spec).map(|_| false),
        }
    }

    /// `kubectl rollout restart deployment/<name> -n <namespace>`
    pub async fn rollout_restart(&self, deployment: &str, namespace: &str) -> Result<()> {
        info!(deployment, namespace, "Restarting deployment");
        let target = format!("deployment/{deployment}");
        let spec = self.spec(&["rollout", "restart", &target], Some(namespace));
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }

    /// `kubectl create namespace <namespace>`, tolerating an existing one
    pub async fn create_namespace(&self, namespace: &str) -> Result<Applied> {
        let spec = self.spec(&["create", "namespace", namespace], None);
        self.runner.run(&spec).await.allow_existing(&spec)
    }

    /// `kubectl config use-context <context>`
    pub async fn use_context(&self, context: &str) -> Result<()> {
        let spec = Self::config_spec(&["config", "use-context", context]);
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }

    /// `kubectl config set-context --current --namespace=<namespace>`
    pub async fn set_context_namespace(&self, namespace: &str) -> Result<()> {
        let flag = format!("--namespace={namespace}");
        let spec = Self::config_spec(&["config", "set-context", "--current", &flag]);
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }

    /// `kubectl get nodes`, human-readable, for display only
    pub async fn nodes_table(&self) -> Result<String> {
        let spec = self.spec(&["get", "nodes"], None);
        Ok(self.runner.run(&spec).await.check(&spec)?.stdout)
    }
}

/// The checks `kubectl rollout status` makes, plus `Available=True`.
///
/// A deployment mid-rollout keeps reporting `Available` while its old pods
/// serve, so the condition alone says nothing about the current template.
fn rollout_complete(deployment: &Deployment) -> bool {
    let Some(status) = &deployment.status else {
        return false;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.conditions.as_ref().is_some_and(|conditions| {
        conditions
            .iter()
            .any(|c| c.type_ == "Available" && c.status == "True")
    });

    available
        && status.observed_generation.unwrap_or(0) >= deployment.metadata.generation.unwrap_or(0)
        && updated >= desired
        && status.replicas.unwrap_or(0) <= updated
        && status.available_replicas.unwrap_or(0) >= updated
}
