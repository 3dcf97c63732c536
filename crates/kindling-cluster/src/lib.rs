//! Cluster lifecycle for kindling
//!
//! [`Cluster`] drives a named kind environment from `Absent` to `Ready`:
//! it materializes the environment's manifests, creates the control plane,
//! converges each platform component in dependency order behind readiness
//! waits, and finally points the kubectl context at the environment.

#![deny(missing_docs)]

pub mod hosts;
pub mod info;
pub mod lifecycle;
pub mod manifest;
pub mod plan;
pub mod state;

pub use info::ClusterInfo;
pub use lifecycle::{delete_all_managed, Cluster};
pub use manifest::{GitTemplateSource, LocalTemplateSource, ManifestMaterializer, TemplateSource};
pub use plan::{Plan, Step};
pub use state::ClusterState;
