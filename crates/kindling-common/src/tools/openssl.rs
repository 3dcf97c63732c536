//! openssl, used as a black box to produce self-signed TLS material

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::runner::{CommandRunner, CommandSpec};
use crate::Result;

/// `openssl` wrapper
#[derive(Clone)]
pub struct OpenSsl {
    runner: Arc<dyn CommandRunner>,
}

impl OpenSsl {
    /// Wrap `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Write a self-signed RSA 2048 certificate and unencrypted key for `host`
    pub async fn self_signed(
        &self,
        host: &str,
        days: u32,
        cert: &Path,
        key: &Path,
    ) -> Result<()> {
        info!(host, days, "Generating self-signed certificate");
        let spec = CommandSpec::new("openssl").args([
            "req".to_string(),
            "-x509".to_string(),
            "-newkey".to_string(),
            "rsa:2048".to_string(),
            "-nodes".to_string(),
            "-sha256".to_string(),
            "-days".to_string(),
            days.to_string(),
            "-subj".to_string(),
            format!("/CN={host}"),
            "-addext".to_string(),
            format!("subjectAltName=DNS:{host}"),
            "-keyout".to_string(),
            key.display().to_string(),
            "-out".to_string(),
            cert.display().to_string(),
        ]);
        self.runner.run(&spec).await.check(&spec)?;
        Ok(())
    }
}
