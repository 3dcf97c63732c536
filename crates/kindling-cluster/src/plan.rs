//! Ordered step plans for convergence

use std::collections::BTreeSet;
use std::fmt;

use kindling_common::{Error, Result};
use kindling_infra::{ComponentId, ComponentSpec};

/// One orchestrator step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Install (or update) a component, then wait for it
    Converge(ComponentId),
    /// Restart a component and wait for it from scratch
    Restart(ComponentId),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converge(id) => write!(f, "{id}"),
            Self::Restart(id) => write!(f, "restart {id}"),
        }
    }
}

/// The order in which components are converged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// A plan from explicit steps
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Load balancer, ingress, GitOps, TLS, GitOps restart, monitoring.
    ///
    /// The restart picks up the TLS secret written after the GitOps
    /// engine first came up.
    pub fn platform() -> Self {
        Self::new(vec![
            Step::Converge(ComponentId::LoadBalancer),
            Step::Converge(ComponentId::Ingress),
            Step::Converge(ComponentId::GitOps),
            Step::Converge(ComponentId::Tls),
            Step::Restart(ComponentId::GitOps),
            Step::Converge(ComponentId::Monitoring),
        ])
    }

    /// The steps, in order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the plan against the installers it will drive.
    ///
    /// Every component must be converged exactly once, after all of its
    /// dependencies, and every restart must follow the component's converge.
    pub fn validate(&self, specs: &[&ComponentSpec]) -> Result<()> {
        let known: BTreeSet<ComponentId> = specs.iter().map(|s| s.id).collect();
        let mut converged: BTreeSet<ComponentId> = BTreeSet::new();

        for step in &self.steps {
            match *step {
                Step::Converge(id) => {
                    let spec = specs.iter().find(|s| s.id == id).ok_or_else(|| {
                        Error::validation(format!("plan names {id} but no installer provides it"))
                    })?;
                    let missing: Vec<String> = spec
                        .depends_on
                        .iter()
                        .filter(|dep| !converged.contains(*dep))
                        .map(ToString::to_string)
                        .collect();
                    if !missing.is_empty() {
                        return Err(Error::validation(format!(
                            "plan converges {id} before {}",
                            missing.join(", ")
                        )));
                    }
                    if !converged.insert(id) {
                        return Err(Error::validation(format!("plan converges {id} twice")));
                    }
                }
                Step::Restart(id) => {
                    if !converged.contains(&id) {
                        return Err(Error::validation(format!(
                            "plan restarts {id} before converging it"
                        )));
                    }
                }
            }
        }

        if let Some(id) = known.difference(&converged).next() {
            return Err(Error::validation(format!("plan never converges {id}")));
        }
        Ok(())
    }
}
