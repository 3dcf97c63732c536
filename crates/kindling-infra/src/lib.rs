//! Platform component installers for kindling
//!
//! Each component (MetalLB, Traefik, ArgoCD, TLS, monitoring) is an
//! [`Installer`] that knows how to put itself on a cluster and how to tell
//! whether it is ready. Ordering, dependency checks and waiting live in the
//! orchestrator.

#![deny(missing_docs)]

pub mod component;
pub mod components;
pub mod context;
pub mod installer;
pub mod probe;

pub use component::{ComponentId, ComponentSpec, InstallStrategy};
pub use components::default_installers;
pub use context::InstallContext;
pub use installer::{AccessInfo, Installer};
pub use probe::{EndpointProbe, HttpsProbe, Prober, ReadinessProbe};
