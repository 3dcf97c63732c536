//! kustomize

use std::path::Path;
use std::sync::Arc;

use crate::runner::{CommandRunner, CommandSpec};
use crate::Result;

/// `kustomize` wrapper
#[derive(Clone)]
pub struct Kustomize {
    runner: Arc<dyn CommandRunner>,
}

impl Kustomize {
    /// Wrap `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `kustomize build <dir>`, returning the flat manifest stream
    pub async fn build(&self, dir: &Path) -> Result<String> {
        let spec = CommandSpec::new("kustomize")
            .args(["build".to_string(), dir.display().to_string()]);
        Ok(self.runner.run(&spec).await.check(&spec)?.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, MockCommandRunner};

    #[tokio::test]
    async fn build_returns_stdout() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.command_line() == "kustomize build /k8s/demo/overlays/metallb")
            .returning(|_| CommandOutput::ok("kind: IPAddressPool\n"));
        let kustomize = Kustomize::new(Arc::new(runner));
        let out = kustomize
            .build(Path::new("/k8s/demo/overlays/metallb"))
            .await
            .expect("build");
        assert_eq!(out, "kind: IPAddressPool\n");
    }

    #[tokio::test]
    async fn build_errors_carry_stderr() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| CommandOutput::failed(1, "Error: accumulating resources: missing"));
        let kustomize = Kustomize::new(Arc::new(runner));
        let err = kustomize
            .build(Path::new("/nope"))
            .await
            .expect_err("build should fail");
        assert!(err.to_string().contains("accumulating resources"));
    }
}
