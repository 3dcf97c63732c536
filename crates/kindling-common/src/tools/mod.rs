//! Typed wrappers over the external CLIs
//!
//! Each wrapper owns a shared [`CommandRunner`] and turns one domain intent
//! ("apply this overlay", "is this CRD established") into a command line,
//! then interprets the output. Wrappers never retry; waiting is done by the
//! caller with [`crate::poll`].

use std::sync::Arc;

use tracing::info;

use crate::runner::{CommandErrorKind, CommandRunner, CommandSpec};
use crate::{Error, Result};

mod helm;
mod kind;
mod kubectl;
mod kustomize;
mod openssl;

pub use helm::Helm;
pub use kind::Kind;
pub use kubectl::Kubectl;
pub use kustomize::Kustomize;
pub use openssl::OpenSsl;

/// Tools kindling needs on `PATH`, with install hints
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    (
        "kind",
        "Install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
    ),
    (
        "kubectl",
        "Install kubectl: https://kubernetes.io/docs/tasks/tools/",
    ),
    ("helm", "Install helm: https://helm.sh/docs/intro/install/"),
    (
        "kustomize",
        "Install kustomize: https://kubectl.docs.kubernetes.io/installation/kustomize/",
    ),
    ("openssl", "Install openssl from your package manager"),
];

/// Every tool wrapper, sharing one runner
#[derive(Clone)]
pub struct Toolbox {
    /// The runner the wrappers share
    pub runner: Arc<dyn CommandRunner>,
    /// kind
    pub kind: Kind,
    /// kubectl
    pub kubectl: Kubectl,
    /// helm
    pub helm: Helm,
    /// kustomize
    pub kustomize: Kustomize,
    /// openssl
    pub openssl: OpenSsl,
}

impl Toolbox {
    /// Build every wrapper over `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            kind: Kind::new(runner.clone()),
            kubectl: Kubectl::new(runner.clone()),
            helm: Helm::new(runner.clone()),
            kustomize: Kustomize::new(runner.clone()),
            openssl: OpenSsl::new(runner.clone()),
            runner,
        }
    }

    /// Point kubectl and helm at the kubeconfig context `context`
    pub fn with_context(mut self, context: &str) -> Self {
        self.kubectl = self.kubectl.with_context(context);
        self.helm = self.helm.with_context(context);
        self
    }

    /// Whether `tool` resolves on `PATH`
    pub async fn has_tool(&self, tool: &str) -> bool {
        self.runner
            .run(&CommandSpec::shell(format!("command -v {tool}")))
            .await
            .success()
    }

    /// Fail with a `MissingBinary` error naming the first absent tool
    pub async fn check_prerequisites(&self) -> Result<()> {
        info!("Checking prerequisites...");
        for (tool, hint) in REQUIRED_TOOLS {
            if !self.has_tool(tool).await {
                return Err(Error::ExternalCommand {
                    command: (*tool).to_string(),
                    exit_code: crate::runner::MISSING_BINARY_EXIT_CODE,
                    stderr: format!("{tool} not found on PATH. {hint}"),
                    kind: CommandErrorKind::MissingBinary,
                });
            }
        }
        Ok(())
    }
}
