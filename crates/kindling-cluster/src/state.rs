//! Cluster state machine

use std::fmt;

use kindling_common::{Error, Result};

/// Where a named environment is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    /// No kind cluster with this name
    Absent,
    /// Manifests rendering and control plane coming up
    Provisioning,
    /// Components installing in dependency order
    Converging,
    /// Every component ready and the context set
    Ready,
    /// Re-applying configuration to an existing cluster
    Updating,
    /// Control plane being removed
    Deleting,
    /// A step failed; terminal for this run
    Failed,
}

impl ClusterState {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: ClusterState) -> bool {
        use ClusterState::*;
        match (self, next) {
            (Absent, Provisioning)
            | (Provisioning, Converging)
            | (Converging, Ready)
            | (Ready, Updating)
            | (Updating, Ready)
            | (Deleting, Absent) => true,
            (Failed, _) | (Absent, Deleting) => false,
            (_, Failed) | (_, Deleting) => true,
            _ => false,
        }
    }

    /// The state after moving to `next`, or [`Error::InvalidTransition`]
    pub fn transition(self, next: ClusterState) -> Result<ClusterState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "Absent",
            Self::Provisioning => "Provisioning",
            Self::Converging => "Converging",
            Self::Ready => "Ready",
            Self::Updating => "Updating",
            Self::Deleting => "Deleting",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}
