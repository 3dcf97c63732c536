//! Component model: identity, dependencies, install strategy and readiness

use std::fmt;

use kindling_common::PollConfig;

use crate::probe::ReadinessProbe;

/// A platform service managed by an installer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentId {
    /// MetalLB
    LoadBalancer,
    /// Traefik
    Ingress,
    /// ArgoCD
    GitOps,
    /// TLS material for the GitOps UI
    Tls,
    /// Prometheus, Grafana and Loki
    Monitoring,
}

impl ComponentId {
    /// Every component, in install order
    pub const ALL: [ComponentId; 5] = [
        Self::LoadBalancer,
        Self::Ingress,
        Self::GitOps,
        Self::Tls,
        Self::Monitoring,
    ];

    /// Stable identifier used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadBalancer => "load-balancer",
            Self::Ingress => "ingress",
            Self::GitOps => "gitops",
            Self::Tls => "tls",
            Self::Monitoring => "monitoring",
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a component gets onto the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStrategy {
    /// `kubectl apply` of manifests and overlays
    ManifestApply,
    /// Helm chart releases
    PackageManager,
}

impl fmt::Display for InstallStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestApply => f.write_str("manifest-apply"),
            Self::PackageManager => f.write_str("package-manager"),
        }
    }
}

/// Static description of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpec {
    /// Identity
    pub id: ComponentId,
    /// Components that must be ready before this one installs
    pub depends_on: Vec<ComponentId>,
    /// How it is installed
    pub strategy: InstallStrategy,
    /// What "ready" means for it
    pub probe: ReadinessProbe,
    /// How long to wait for it
    pub poll: PollConfig,
}
