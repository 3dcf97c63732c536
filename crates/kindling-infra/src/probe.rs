//! Readiness probes
//!
//! A [`ReadinessProbe`] describes observable state; a [`Prober`] evaluates it
//! once. Waiting is the orchestrator's job (see `kindling_common::poll`).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kindling_common::tools::Kubectl;
use kindling_common::{Error, Result};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

/// Timeout for a single HTTPS readiness request
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// A predicate over observable cluster state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// A secret exists
    SecretExists {
        /// Secret name
        name: String,
        /// Namespace
        namespace: String,
    },
    /// A CRD reports `Established=True`
    CrdEstablished {
        /// CRD name (`<plural>.<group>`)
        name: String,
    },
    /// A deployment is available with its latest template rolled out
    DeploymentAvailable {
        /// Deployment name
        name: String,
        /// Namespace
        namespace: String,
    },
    /// A GET answers 200 (certificate not verified, redirects not followed)
    HttpsEndpoint {
        /// Target URL
        url: String,
    },
    /// A local file exists
    FileExists {
        /// Path
        path: PathBuf,
    },
    /// Every inner probe holds
    All(Vec<ReadinessProbe>),
}

impl ReadinessProbe {
    /// The non-`All` probes, depth first
    pub fn leaves(&self) -> Vec<&ReadinessProbe> {
        match self {
            Self::All(probes) => probes.iter().flat_map(ReadinessProbe::leaves).collect(),
            leaf => vec![leaf],
        }
    }
}

impl fmt::Display for ReadinessProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecretExists { name, namespace } => write!(f, "secret {namespace}/{name}"),
            Self::CrdEstablished { name } => write!(f, "crd {name} established"),
            Self::DeploymentAvailable { name, namespace } => {
                write!(f, "deployment {namespace}/{name} available")
            }
            Self::HttpsEndpoint { url } => write!(f, "{url} answering"),
            Self::FileExists { path } => write!(f, "file {}", path.display()),
            Self::All(probes) => {
                let parts: Vec<String> = probes.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" and "))
            }
        }
    }
}

/// HTTP status check used by [`ReadinessProbe::HttpsEndpoint`]
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Status code of a GET against `url`
    async fn status(&self, url: &str) -> Result<u16>;
}

/// Real endpoint probe built on reqwest
pub struct HttpsProbe {
    client: reqwest::Client,
}

impl HttpsProbe {
    /// Client that accepts self-signed certificates and never follows redirects
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(ENDPOINT_TIMEOUT)
            .build()
            .map_err(|e| Error::Http {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EndpointProbe for HttpsProbe {
    async fn status(&self, url: &str) -> Result<u16> {
        let response = self.client.get(url).send().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(response.status().as_u16())
    }
}

/// Evaluates probes against the live cluster
#[derive(Clone)]
pub struct Prober {
    kubectl: Kubectl,
    endpoint: Arc<dyn EndpointProbe>,
}

impl Prober {
    /// Create a prober
    pub fn new(kubectl: Kubectl, endpoint: Arc<dyn EndpointProbe>) -> Self {
        Self { kubectl, endpoint }
    }

    /// Evaluate `probe` once. `All` stops at the first leaf that is not ready.
    pub async fn check(&self, probe: &ReadinessProbe) -> Result<bool> {
        for leaf in probe.leaves() {
            if !self.check_leaf(leaf).await? {
                debug!(probe = %leaf, "Not ready");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn check_leaf(&self, probe: &ReadinessProbe) -> Result<bool> {
        match probe {
            ReadinessProbe::SecretExists { name, namespace } => {
                self.kubectl.secret_exists(name, namespace).await
            }
            ReadinessProbe::CrdEstablished { name } => self.kubectl.crd_established(name).await,
            ReadinessProbe::DeploymentAvailable { name, namespace } => {
                self.kubectl.deployment_ready(name, namespace).await
            }
            ReadinessProbe::HttpsEndpoint { url } => Ok(self.endpoint.status(url).await? == 200),
            ReadinessProbe::FileExists { path } => Ok(path.is_file()),
            // leaves() never yields All
            ReadinessProbe::All(_) => Ok(true),
        }
    }
}
