//! Connection details for a ready cluster

use std::fmt;

use kindling_infra::AccessInfo;

/// What `info` shows for a ready environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Environment name
    pub name: String,
    /// `kubectl get nodes` output
    pub nodes: String,
    /// UI endpoints with their credentials
    pub access: Vec<AccessInfo>,
}

impl fmt::Display for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cluster: {}", self.name)?;
        writeln!(f)?;
        writeln!(f, "{}", self.nodes.trim_end())?;
        for access in &self.access {
            writeln!(f)?;
            writeln!(f, "{}", access.name)?;
            writeln!(f, "  URL:      {}", access.url)?;
            writeln!(f, "  Username: {}", access.username)?;
            writeln!(
                f,
                "  Password: {}",
                access.password.as_deref().unwrap_or("(not available)")
            )?;
        }
        Ok(())
    }
}
