//! Self-signed TLS for the GitOps UI
//!
//! A certificate and key for the ArgoCD host are generated once and kept
//! under the TLS directory. Every run writes them, base64 encoded, into the
//! TLS secret manifest of the materialized tree and applies that manifest
//! to the GitOps namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kindling_common::config::TlsConfig;
use kindling_common::tools::Toolbox;
use kindling_common::{Error, Result};
use serde_yaml::{Mapping, Value};
use tracing::info;

use crate::component::{ComponentId, ComponentSpec, InstallStrategy};
use crate::context::InstallContext;
use crate::installer::Installer;
use crate::probe::{Prober, ReadinessProbe};

/// Certificate file name inside the TLS directory
pub const CERT_FILE: &str = "tls.crt";
/// Key file name inside the TLS directory
pub const KEY_FILE: &str = "tls.key";

/// Generates and installs the GitOps UI certificate
pub struct TlsInstaller {
    config: TlsConfig,
    cert_dir: PathBuf,
    host: String,
    namespace: String,
    tools: Toolbox,
    prober: Prober,
    spec: ComponentSpec,
}

impl TlsInstaller {
    /// Create the installer for `host`, keeping material in `cert_dir` and
    /// writing the secret into `namespace`
    pub fn new(
        config: TlsConfig,
        cert_dir: PathBuf,
        host: String,
        namespace: String,
        tools: Toolbox,
        prober: Prober,
    ) -> Self {
        let spec = ComponentSpec {
            id: ComponentId::Tls,
            depends_on: vec![ComponentId::GitOps],
            strategy: InstallStrategy::ManifestApply,
            probe: ReadinessProbe::All(vec![
                ReadinessProbe::FileExists {
                    path: cert_dir.join(CERT_FILE),
                },
                ReadinessProbe::FileExists {
                    path: cert_dir.join(KEY_FILE),
                },
                ReadinessProbe::SecretExists {
                    name: config.secret_name.clone(),
                    namespace: namespace.clone(),
                },
            ]),
            poll: config.poll,
        };
        Self {
            config,
            cert_dir,
            host,
            namespace,
            tools,
            prober,
            spec,
        }
    }

    async fn ensure_certificate(&self) -> Result<(PathBuf, PathBuf)> {
        let cert = self.cert_dir.join(CERT_FILE);
        let key = self.cert_dir.join(KEY_FILE);
        if cert.is_file() && key.is_file() {
            info!(dir = %self.cert_dir.display(), "Reusing existing certificate");
            return Ok((cert, key));
        }
        std::fs::create_dir_all(&self.cert_dir)
            .map_err(|e| Error::filesystem(&self.cert_dir, e))?;
        self.tools
            .openssl
            .self_signed(&self.host, self.config.validity_days, &cert, &key)
            .await?;
        Ok((cert, key))
    }

    async fn apply(&self, ctx: &InstallContext) -> Result<()> {
        let (cert, key) = self.ensure_certificate().await?;
        let cert_pem = read(&cert)?;
        let key_pem = read(&key)?;

        let manifest_path = ctx.resolve(&self.config.secret_manifest);
        let existing = if manifest_path.is_file() {
            Some(read(&manifest_path)?)
        } else {
            None
        };
        let manifest = with_certificate(
            existing.as_deref(),
            &self.config.secret_name,
            &self.namespace,
            &cert_pem,
            &key_pem,
        )?;
        if let Some(parent) = manifest_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::filesystem(parent, e))?;
        }
        std::fs::write(&manifest_path, manifest)
            .map_err(|e| Error::filesystem(&manifest_path, e))?;

        info!(
            secret = %self.config.secret_name,
            namespace = %self.namespace,
            "Applying TLS secret"
        );
        self.tools
            .kubectl
            .apply_file(&manifest_path, Some(&self.namespace))
            .await
    }
}

#[async_trait]
impl Installer for TlsInstaller {
    fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn install(&self, ctx: &InstallContext) -> Result<()> {
        self.apply(ctx).await
    }

    async fn update(&self, ctx: &InstallContext) -> Result<()> {
        self.apply(ctx).await
    }

    async fn is_ready(&self) -> Result<bool> {
        self.prober.check(&self.spec.probe).await
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::filesystem(path, e))
}

/// Write `tls.crt`/`tls.key` into a TLS Secret manifest.
///
/// An absent or empty manifest starts from a `kubernetes.io/tls` Secret
/// named `name`. Existing key material is always replaced.
pub fn with_certificate(
    manifest: Option<&str>,
    name: &str,
    namespace: &str,
    cert_pem: &str,
    key_pem: &str,
) -> Result<String> {
    let parsed = match manifest {
        Some(text) if !text.trim().is_empty() => Some(
            serde_yaml::from_str::<Value>(text)
                .map_err(|e| Error::serialization(format!("invalid TLS secret manifest: {e}")))?,
        ),
        _ => None,
    };
    let mut doc = match parsed {
        Some(Value::Mapping(map)) => map,
        Some(_) => {
            return Err(Error::serialization(
                "TLS secret manifest is not a mapping",
            ))
        }
        None => secret_skeleton(name, namespace),
    };

    let data = doc
        .entry(Value::from("data"))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if data.is_null() {
        *data = Value::Mapping(Mapping::new());
    }
    let Some(data) = data.as_mapping_mut() else {
        return Err(Error::serialization("TLS secret data is not a mapping"));
    };
    data.insert(Value::from(CERT_FILE), Value::from(STANDARD.encode(cert_pem)));
    data.insert(Value::from(KEY_FILE), Value::from(STANDARD.encode(key_pem)));

    serde_yaml::to_string(&Value::Mapping(doc))
        .map_err(|e| Error::serialization(format!("failed to write TLS secret manifest: {e}")))
}

fn secret_skeleton(name: &str, namespace: &str) -> Mapping {
    let mut metadata = Mapping::new();
    metadata.insert(Value::from("name"), Value::from(name));
    metadata.insert(Value::from("namespace"), Value::from(namespace));

    let mut doc = Mapping::new();
    doc.insert(Value::from("apiVersion"), Value::from("v1"));
    doc.insert(Value::from("kind"), Value::from("Secret"));
    doc.insert(Value::from("metadata"), Value::Mapping(metadata));
    doc.insert(Value::from("type"), Value::from("kubernetes.io/tls"));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::{context, prober, scripted};
    use kindling_common::testing::ScriptedRunner;
    use kindling_common::CommandOutput;
    use std::sync::Arc;

    fn installer(runner: &Arc<ScriptedRunner>, cert_dir: PathBuf) -> TlsInstaller {
        TlsInstaller::new(
            TlsConfig::default(),
            cert_dir,
            "argocd.kindling.local".to_string(),
            "argocd".to_string(),
            Toolbox::new(runner.clone()),
            prober(runner),
        )
    }

    fn decoded(doc: &Value, key: &str) -> String {
        let encoded = doc["data"][key].as_str().expect("encoded value");
        String::from_utf8(STANDARD.decode(encoded).expect("base64")).expect("utf8")
    }

    #[test]
    fn existing_manifest_keeps_metadata_and_gets_material() {
        let manifest = r#"apiVersion: v1
kind: Secret
metadata:
  name: argocd-server-tls
  namespace: argocd
  labels:
    app.kubernetes.io/part-of: argocd
type: kubernetes.io/tls
data:
  tls.crt: ""
  tls.key: ""
"#;
        let out = with_certificate(Some(manifest), "ignored", "ignored", "CERT", "KEY")
            .expect("inject");
        let doc: Value = serde_yaml::from_str(&out).expect("parse");
        assert_eq!(doc["metadata"]["name"].as_str(), Some("argocd-server-tls"));
        assert_eq!(
            doc["metadata"]["labels"]["app.kubernetes.io/part-of"].as_str(),
            Some("argocd")
        );
        assert_eq!(decoded(&doc, "tls.crt"), "CERT");
        assert_eq!(decoded(&doc, "tls.key"), "KEY");
    }

    #[test]
    fn stale_material_is_replaced() {
        let first = with_certificate(None, "tls", "argocd", "OLD", "OLD").expect("first");
        let second =
            with_certificate(Some(&first), "tls", "argocd", "NEW", "NEWKEY").expect("second");
        let doc: Value = serde_yaml::from_str(&second).expect("parse");
        assert_eq!(decoded(&doc, "tls.crt"), "NEW");
        assert_eq!(decoded(&doc, "tls.key"), "NEWKEY");
    }

    #[test]
    fn missing_manifest_gets_tls_secret_skeleton() {
        let out =
            with_certificate(None, "argocd-server-tls", "argocd", "C", "K").expect("skeleton");
        let doc: Value = serde_yaml::from_str(&out).expect("parse");
        assert_eq!(doc["kind"].as_str(), Some("Secret"));
        assert_eq!(doc["type"].as_str(), Some("kubernetes.io/tls"));
        assert_eq!(doc["metadata"]["namespace"].as_str(), Some("argocd"));
        assert_eq!(decoded(&doc, "tls.crt"), "C");
    }

    #[test]
    fn non_mapping_manifest_is_rejected() {
        assert!(with_certificate(Some("- a\n- b\n"), "n", "ns", "C", "K").is_err());
    }

    #[tokio::test]
    async fn install_reuses_material_and_applies_secret() {
        let (dir, ctx) = context();
        let cert_dir = dir.path().join("tls");
        std::fs::create_dir_all(&cert_dir).expect("mkdir");
        std::fs::write(cert_dir.join(CERT_FILE), "CERT").expect("cert");
        std::fs::write(cert_dir.join(KEY_FILE), "KEY").expect("key");

        let runner = scripted();
        installer(&runner, cert_dir).install(&ctx).await.expect("install");

        let manifest = ctx.resolve(Path::new("overlays/argocd/argocd-ssl-certs.yaml"));
        let doc: Value =
            serde_yaml::from_str(&std::fs::read_to_string(&manifest).expect("read"))
                .expect("parse");
        assert_eq!(decoded(&doc, "tls.crt"), "CERT");
        assert_eq!(runner.count("openssl"), 0);
        assert_eq!(
            runner.calls(),
            vec![format!("kubectl apply -f {} -n argocd", manifest.display())]
        );
    }

    #[tokio::test]
    async fn missing_material_is_generated_first() {
        let (dir, ctx) = context();
        let cert_dir = dir.path().join("tls");
        let runner = scripted();
        // openssl is scripted, so the files never appear and the read fails
        runner.on("openssl req", CommandOutput::ok(""));
        let err = installer(&runner, cert_dir.clone())
            .install(&ctx)
            .await
            .expect_err("no files written by scripted openssl");
        assert!(matches!(err, Error::Filesystem { .. }));
        assert!(cert_dir.is_dir());
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("-subj /CN=argocd.kindling.local"));
        assert!(calls[0].contains("-days 365"));
    }

    #[tokio::test]
    async fn readiness_needs_files_and_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = scripted();
        runner.on(
            "kubectl get secret argocd-server-tls",
            CommandOutput::ok(
                r#"{"apiVersion":"v1","kind":"Secret","metadata":{"name":"argocd-server-tls"}}"#,
            ),
        );
        let installer = installer(&runner, dir.path().to_path_buf());
        assert!(!installer.is_ready().await.expect("probe"));

        std::fs::write(dir.path().join(CERT_FILE), "C").expect("cert");
        std::fs::write(dir.path().join(KEY_FILE), "K").expect("key");
        assert!(installer.is_ready().await.expect("probe"));
        assert_eq!(installer.spec().depends_on, vec![ComponentId::GitOps]);
    }
}
