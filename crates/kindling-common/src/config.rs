//! Platform configuration stored at `~/.kindling/config.json`.
//!
//! The file is read once at startup into a [`PlatformConfig`] that is passed
//! by reference to the orchestrator and to each installer (each installer
//! only sees its own section). Every section is `#[serde(default)]`, so a
//! partial file, or no file at all, yields a working configuration.
//!
//! Config file resolution (highest priority first):
//! 1. Explicit `--config` flag
//! 2. `KINDLING_CONFIG` environment variable
//! 3. `~/.kindling/config.json`
//! 4. Built-in defaults

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::poll::PollConfig;
use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".kindling";
const CONFIG_FILE_NAME: &str = "config.json";
const KINDLING_CONFIG_ENV: &str = "KINDLING_CONFIG";

/// Returns `~/.kindling/` (not created here).
pub fn kindling_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Resolve the config file path using the priority chain.
///
/// Returns `None` when no file applies and defaults should be used.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(KINDLING_CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let default = kindling_dir().join(CONFIG_FILE_NAME);
    default.exists().then_some(default)
}

/// Load and validate the configuration.
///
/// A path named explicitly (flag or env var) must exist; the default
/// location may be absent.
pub fn load_config(explicit: Option<&Path>) -> Result<PlatformConfig> {
    let config = match resolve_config_path(explicit) {
        Some(path) => PlatformConfig::from_file(&path)?,
        None => PlatformConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Validate a lowercase DNS label (cluster names, namespaces)
pub fn validate_dns_label(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 63 {
        return Err(Error::validation(format!(
            "{what} must be 1-63 characters, got {:?}",
            value
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::validation(format!(
            "{what} {value:?} may only contain lowercase letters, digits and '-'"
        )));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(Error::validation(format!(
            "{what} {value:?} must not start or end with '-'"
        )));
    }
    Ok(())
}

fn validate_url(what: &str, value: &str) -> Result<()> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{what} must be an http(s) URL, got {value:?}"
        )))
    }
}

fn validate_non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{what} must not be empty")));
    }
    Ok(())
}

// =============================================================================
// Top level
// =============================================================================

/// Complete platform configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Root of everything kindling writes; manifests live in `<root_dir>/k8s/<env>`
    pub root_dir: PathBuf,
    /// Scratch directory for rendered manifest snapshots
    pub scratch_dir: PathBuf,
    /// DNS suffix for platform hostnames (`argocd.<domain>`, `grafana.<domain>`)
    pub domain: String,
    /// Where the manifest template comes from
    pub template: TemplateConfig,
    /// Load balancer (MetalLB)
    pub load_balancer: LoadBalancerConfig,
    /// Ingress controller (Traefik)
    pub ingress: IngressConfig,
    /// GitOps engine (ArgoCD)
    pub gitops: GitOpsConfig,
    /// TLS material for the GitOps UI
    pub tls: TlsConfig,
    /// Observability stack (Prometheus, Grafana, Loki)
    pub monitoring: MonitoringConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            root_dir: kindling_dir(),
            scratch_dir: std::env::temp_dir().join("kindling"),
            domain: "kindling.local".to_string(),
            template: TemplateConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            ingress: IngressConfig::default(),
            gitops: GitOpsConfig::default(),
            tls: TlsConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Read a config file; `~/` prefixes in paths are expanded
    pub fn from_file(path: &Path) -> Result<Self> {
        let data =
            std::fs::read_to_string(path).map_err(|e| Error::filesystem(path, e))?;
        let mut config: Self = serde_json::from_str(&data).map_err(|e| {
            Error::serialization(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.expand_paths();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        self.root_dir = expand_home(&self.root_dir);
        self.scratch_dir = expand_home(&self.scratch_dir);
        if let Some(path) = &self.template.path {
            self.template.path = Some(expand_home(path));
        }
        if let Some(dir) = &self.tls.cert_dir {
            self.tls.cert_dir = Some(expand_home(dir));
        }
        if let Some(key) = &self.gitops.repo_ssh_key {
            self.gitops.repo_ssh_key = Some(expand_home(key));
        }
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        validate_non_empty("root_dir", &self.root_dir.to_string_lossy())?;
        validate_non_empty("scratch_dir", &self.scratch_dir.to_string_lossy())?;
        if self.domain.is_empty()
            || self
                .domain
                .split('.')
                .any(|label| validate_dns_label("domain label", label).is_err())
        {
            return Err(Error::validation(format!(
                "domain {:?} is not a valid DNS name",
                self.domain
            )));
        }
        self.template.validate()?;
        self.load_balancer.validate()?;
        self.ingress.validate()?;
        self.gitops.validate()?;
        self.tls.validate()?;
        self.monitoring.validate()
    }

    /// Directory holding every environment's manifest tree
    pub fn manifests_dir(&self) -> PathBuf {
        self.root_dir.join("k8s")
    }

    /// `<root_dir>/k8s/<environment>`
    pub fn manifest_root(&self, environment: &str) -> PathBuf {
        self.manifests_dir().join(environment)
    }

    /// `<scratch_dir>/<environment>`
    pub fn snapshot_dir(&self, environment: &str) -> PathBuf {
        self.scratch_dir.join(environment)
    }

    /// Where TLS material is kept
    pub fn tls_dir(&self) -> PathBuf {
        self.tls
            .cert_dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join("tls"))
    }

    /// `<prefix>.<domain>`
    pub fn host(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.domain)
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Manifest template source. A local `path` takes precedence over `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Git URL of the template repository
    pub url: Option<String>,
    /// Local directory used instead of cloning
    pub path: Option<PathBuf>,
    /// Branch to check out
    pub branch: String,
    /// Sub-directory of the template holding the manifest tree
    pub subdir: Option<PathBuf>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            url: Some("https://github.com/pyflowops/base-repo-template.git".to_string()),
            path: None,
            branch: "main".to_string(),
            subdir: Some(PathBuf::from("k8s")),
        }
    }
}

impl TemplateConfig {
    fn validate(&self) -> Result<()> {
        match (&self.path, &self.url) {
            (Some(_), _) => {}
            (None, Some(url)) => validate_non_empty("template.url", url)?,
            (None, None) => {
                return Err(Error::validation(
                    "template: one of url or path must be set",
                ))
            }
        }
        validate_non_empty("template.branch", &self.branch)?;
        if let Some(subdir) = &self.subdir {
            if subdir.is_absolute() {
                return Err(Error::validation("template.subdir must be relative"));
            }
        }
        Ok(())
    }
}

/// MetalLB settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Native manifest URL
    pub manifest_url: String,
    /// Namespace MetalLB installs into
    pub namespace: String,
    /// Controller deployment name
    pub controller_deployment: String,
    /// CRDs that must be established before the address pool overlay applies
    pub crds: Vec<String>,
    /// Wait for the CRDs
    pub crd_poll: PollConfig,
    /// Retry applying the overlay while the webhook comes up
    pub overlay_poll: PollConfig,
    /// Wait for the controller deployment
    pub poll: PollConfig,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            manifest_url:
                "https://raw.githubusercontent.com/metallb/metallb/v0.15.2/config/manifests/metallb-native.yaml"
                    .to_string(),
            namespace: "metallb-system".to_string(),
            controller_deployment: "controller".to_string(),
            crds: vec![
                "ipaddresspools.metallb.io".to_string(),
                "l2advertisements.metallb.io".to_string(),
            ],
            crd_poll: PollConfig::CRD,
            overlay_poll: PollConfig::CRD,
            poll: PollConfig::ENDPOINT,
        }
    }
}

impl LoadBalancerConfig {
    fn validate(&self) -> Result<()> {
        validate_url("load_balancer.manifest_url", &self.manifest_url)?;
        validate_dns_label("load_balancer.namespace", &self.namespace)?;
        validate_non_empty(
            "load_balancer.controller_deployment",
            &self.controller_deployment,
        )?;
        self.crd_poll.validate("load_balancer.crd_poll")?;
        self.overlay_poll.validate("load_balancer.overlay_poll")?;
        self.poll.validate("load_balancer.poll")
    }
}

/// A Helm chart release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmRelease {
    /// Release name
    pub name: String,
    /// Chart reference (`<repo>/<chart>`)
    pub chart: String,
    /// Repository alias for `helm repo add`
    pub repo_name: String,
    /// Repository URL
    pub repo_url: String,
    /// Values file relative to the manifest root; skipped when the file is absent
    #[serde(default)]
    pub values_file: Option<PathBuf>,
}

impl HelmRelease {
    fn validate(&self, what: &str) -> Result<()> {
        validate_dns_label(&format!("{what}.name"), &self.name)?;
        validate_non_empty(&format!("{what}.chart"), &self.chart)?;
        validate_non_empty(&format!("{what}.repo_name"), &self.repo_name)?;
        validate_url(&format!("{what}.repo_url"), &self.repo_url)?;
        if let Some(values) = &self.values_file {
            if values.is_absolute() {
                return Err(Error::validation(format!(
                    "{what}.values_file must be relative to the manifest root"
                )));
            }
        }
        Ok(())
    }
}

/// Traefik settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// The chart release
    pub release: HelmRelease,
    /// Namespace
    pub namespace: String,
    /// CRD that signals the chart's CRDs are in
    pub crd: String,
    /// Deployment that must become available
    pub deployment: String,
    /// Wait budget
    pub poll: PollConfig,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            release: HelmRelease {
                name: "traefik".to_string(),
                chart: "traefik/traefik".to_string(),
                repo_name: "traefik".to_string(),
                repo_url: "https://traefik.github.io/charts".to_string(),
                values_file: Some(PathBuf::from("overlays/traefik/values.yaml")),
            },
            namespace: "traefik".to_string(),
            crd: "ingressroutes.traefik.io".to_string(),
            deployment: "traefik".to_string(),
            poll: PollConfig::ENDPOINT,
        }
    }
}

impl IngressConfig {
    fn validate(&self) -> Result<()> {
        self.release.validate("ingress.release")?;
        validate_dns_label("ingress.namespace", &self.namespace)?;
        validate_non_empty("ingress.crd", &self.crd)?;
        validate_non_empty("ingress.deployment", &self.deployment)?;
        self.poll.validate("ingress.poll")
    }
}

/// ArgoCD settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitOpsConfig {
    /// Namespace
    pub namespace: String,
    /// Install manifest URL
    pub manifest_url: String,
    /// Image updater manifest URL; `None` skips the add-on
    pub image_updater_url: Option<String>,
    /// Hostname prefix for the UI (`<prefix>.<domain>`)
    pub host_prefix: String,
    /// NodePort the UI answers on
    pub https_port: u16,
    /// Secret holding the initial admin password
    pub admin_secret: String,
    /// UI/API server deployment
    pub server_deployment: String,
    /// SSH private key injected into repository secrets in the overlay
    pub repo_ssh_key: Option<PathBuf>,
    /// Wait budget for secret, deployment and endpoint
    pub poll: PollConfig,
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        Self {
            namespace: "argocd".to_string(),
            manifest_url:
                "https://raw.githubusercontent.com/argoproj/argo-cd/stable/manifests/install.yaml"
                    .to_string(),
            image_updater_url: Some(
                "https://raw.githubusercontent.com/argoproj-labs/argocd-image-updater/stable/manifests/install.yaml"
                    .to_string(),
            ),
            host_prefix: "argocd".to_string(),
            https_port: 30443,
            admin_secret: "argocd-initial-admin-secret".to_string(),
            server_deployment: "argocd-server".to_string(),
            repo_ssh_key: None,
            poll: PollConfig::ENDPOINT,
        }
    }
}

impl GitOpsConfig {
    fn validate(&self) -> Result<()> {
        validate_dns_label("gitops.namespace", &self.namespace)?;
        validate_url("gitops.manifest_url", &self.manifest_url)?;
        if let Some(url) = &self.image_updater_url {
            validate_url("gitops.image_updater_url", url)?;
        }
        validate_dns_label("gitops.host_prefix", &self.host_prefix)?;
        if self.https_port == 0 {
            return Err(Error::validation("gitops.https_port must not be 0"));
        }
        validate_non_empty("gitops.admin_secret", &self.admin_secret)?;
        validate_non_empty("gitops.server_deployment", &self.server_deployment)?;
        self.poll.validate("gitops.poll")
    }
}

/// TLS material for the GitOps UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Directory for `tls.crt`/`tls.key`; defaults to `<root_dir>/tls`
    pub cert_dir: Option<PathBuf>,
    /// Secret the material is written into
    pub secret_name: String,
    /// Secret manifest, relative to the manifest root
    pub secret_manifest: PathBuf,
    /// Validity of generated certificates
    pub validity_days: u32,
    /// Wait budget for the secret
    pub poll: PollConfig,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_dir: None,
            secret_name: "argocd-server-tls".to_string(),
            secret_manifest: PathBuf::from("overlays/argocd/argocd-ssl-certs.yaml"),
            validity_days: 365,
            poll: PollConfig::CRD,
        }
    }
}

impl TlsConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty("tls.secret_name", &self.secret_name)?;
        if self.secret_manifest.is_absolute() {
            return Err(Error::validation(
                "tls.secret_manifest must be relative to the manifest root",
            ));
        }
        if self.validity_days == 0 {
            return Err(Error::validation("tls.validity_days must be at least 1"));
        }
        self.poll.validate("tls.poll")
    }
}

/// Observability stack settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Namespace shared by all releases
    pub namespace: String,
    /// Chart releases, installed in order
    pub releases: Vec<HelmRelease>,
    /// Secret holding the Grafana admin password
    pub grafana_secret: String,
    /// Grafana deployment
    pub grafana_deployment: String,
    /// Hostname prefix for the Grafana UI
    pub grafana_host_prefix: String,
    /// Wait budget
    pub poll: PollConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        let release = |name: &str, chart: &str, repo_name: &str, repo_url: &str| HelmRelease {
            name: name.to_string(),
            chart: chart.to_string(),
            repo_name: repo_name.to_string(),
            repo_url: repo_url.to_string(),
            values_file: Some(PathBuf::from(format!(
                "overlays/monitoring/{name}-values.yaml"
            ))),
        };
        Self {
            namespace: "monitoring".to_string(),
            releases: vec![
                release(
                    "prometheus",
                    "prometheus-community/prometheus",
                    "prometheus-community",
                    "https://prometheus-community.github.io/helm-charts",
                ),
                release(
                    "grafana",
                    "grafana/grafana",
                    "grafana",
                    "https://grafana.github.io/helm-charts",
                ),
                release(
                    "loki-stack",
                    "grafana/loki",
                    "grafana",
                    "https://grafana.github.io/helm-charts",
                ),
            ],
            grafana_secret: "grafana".to_string(),
            grafana_deployment: "grafana".to_string(),
            grafana_host_prefix: "grafana".to_string(),
            poll: PollConfig::ENDPOINT,
        }
    }
}

impl MonitoringConfig {
    fn validate(&self) -> Result<()> {
        validate_dns_label("monitoring.namespace", &self.namespace)?;
        if self.releases.is_empty() {
            return Err(Error::validation(
                "monitoring.releases must list at least one release",
            ));
        }
        let mut seen = HashSet::new();
        for (i, release) in self.releases.iter().enumerate() {
            release.validate(&format!("monitoring.releases[{i}]"))?;
            if !seen.insert(release.name.as_str()) {
                return Err(Error::validation(format!(
                    "monitoring.releases: duplicate release {:?}",
                    release.name
                )));
            }
        }
        validate_non_empty("monitoring.grafana_secret", &self.grafana_secret)?;
        validate_non_empty("monitoring.grafana_deployment", &self.grafana_deployment)?;
        validate_dns_label("monitoring.grafana_host_prefix", &self.grafana_host_prefix)?;
        self.poll.validate("monitoring.poll")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlatformConfig::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.domain, "kindling.local");
        assert_eq!(config.gitops.https_port, 30443);
        assert_eq!(config.load_balancer.crd_poll, PollConfig::CRD);
        assert_eq!(config.gitops.poll, PollConfig::ENDPOINT);
        assert_eq!(config.monitoring.releases.len(), 3);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "domain": "dev.test", "gitops": { "https_port": 31443 } }"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("config should load");
        assert_eq!(config.domain, "dev.test");
        assert_eq!(config.gitops.https_port, 31443);
        assert_eq!(config.gitops.namespace, "argocd");
        assert_eq!(config.ingress.release.chart, "traefik/traefik");
        assert_eq!(config.host("argocd"), "argocd.dev.test");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_config(Some(&dir.path().join("nope.json")))
            .expect_err("missing explicit config should fail");
        assert!(matches!(err, Error::Filesystem { .. }));
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write config");
        let err = load_config(Some(&path)).expect_err("malformed config should fail");
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn invalid_sections_are_rejected_at_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "ingress": { "poll": { "interval_secs": 5, "max_attempts": 0 } } }"#,
        )
        .expect("write config");
        let err = load_config(Some(&path)).expect_err("zero attempts should fail");
        assert!(err.to_string().contains("ingress.poll"));
    }

    #[test]
    fn duplicate_monitoring_releases_are_rejected() {
        let mut config = PlatformConfig::default();
        let first = config.monitoring.releases[0].clone();
        config.monitoring.releases.push(first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn template_needs_a_source() {
        let mut config = PlatformConfig::default();
        config.template.url = None;
        assert!(config.validate().is_err());
        config.template.path = Some(PathBuf::from("/srv/template"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_domain_is_rejected() {
        let config = PlatformConfig {
            domain: "Not A Domain".to_string(),
            ..PlatformConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn dns_label_rules() {
        assert!(validate_dns_label("name", "demo").is_ok());
        assert!(validate_dns_label("name", "demo-2").is_ok());
        assert!(validate_dns_label("name", "").is_err());
        assert!(validate_dns_label("name", "Demo").is_err());
        assert!(validate_dns_label("name", "-demo").is_err());
        assert!(validate_dns_label("name", "demo_x").is_err());
        assert!(validate_dns_label("name", &"a".repeat(64)).is_err());
    }

    #[test]
    fn paths_are_derived_from_root_and_scratch() {
        let config = PlatformConfig {
            root_dir: PathBuf::from("/home/dev/.kindling"),
            scratch_dir: PathBuf::from("/tmp/kindling"),
            ..PlatformConfig::default()
        };
        assert_eq!(
            config.manifest_root("demo"),
            PathBuf::from("/home/dev/.kindling/k8s/demo")
        );
        assert_eq!(config.snapshot_dir("demo"), PathBuf::from("/tmp/kindling/demo"));
        assert_eq!(config.tls_dir(), PathBuf::from("/home/dev/.kindling/tls"));
    }

    #[test]
    fn expand_home_only_touches_tilde_paths() {
        assert_eq!(
            expand_home(Path::new("/etc/hosts")),
            PathBuf::from("/etc/hosts")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/x")), home.join("x"));
        }
    }
}
