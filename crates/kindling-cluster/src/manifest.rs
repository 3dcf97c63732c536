//! Manifest materialization
//!
//! The environment's manifest tree (`kind-config.yaml`, `base/`,
//! `overlays/`) is produced from a template on every provisioning or update
//! pass. The template is fetched into a scratch directory, every file is
//! rendered into `<root>.staging`, and only a fully rendered staging tree
//! replaces the previous root. A failed render leaves the old tree alone.

use std::path::{Path, PathBuf};

use git2::{Cred, CredentialType, FetchOptions, RemoteCallbacks};
use kindling_common::{Error, PlatformConfig, Result, KIND_CONFIG_FILE};
use minijinja::{context, Environment, UndefinedBehavior, Value};
use tracing::{debug, info};

const GIT_DIR: &str = ".git";

/// Kind config written when the template does not ship one: a single
/// control-plane node publishing the ingress node ports on the host
pub const DEFAULT_KIND_CONFIG: &str = "\
kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
  - role: control-plane
    extraPortMappings:
      - containerPort: 30080
        hostPort: 30080
        protocol: TCP
      - containerPort: 30443
        hostPort: 30443
        protocol: TCP
";

/// Where manifest templates come from
pub trait TemplateSource: Send + Sync {
    /// Location shown in logs and errors
    fn describe(&self) -> String;

    /// Make the template available, using `scratch` if a copy is needed.
    /// Returns the template's root directory.
    fn fetch(&self, scratch: &Path) -> Result<PathBuf>;
}

/// A git repository cloned at a branch
#[derive(Debug, Clone)]
pub struct GitTemplateSource {
    url: String,
    branch: String,
}

impl GitTemplateSource {
    /// Clone `url` at `branch`
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }
}

impl TemplateSource for GitTemplateSource {
    fn describe(&self) -> String {
        format!("{}@{}", self.url, self.branch)
    }

    fn fetch(&self, scratch: &Path) -> Result<PathBuf> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(|_url, username_from_url, allowed_types| {
            if allowed_types.contains(CredentialType::SSH_KEY) {
                return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
            }
            Cred::default()
        });

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);

        let dest = scratch.join("template");
        info!(url = %self.url, branch = %self.branch, "Cloning manifest template");
        git2::build::RepoBuilder::new()
            .fetch_options(fetch_options)
            .branch(&self.branch)
            .clone(&self.url, &dest)
            .map_err(|e| Error::template_fetch(self.describe(), e.message()))?;
        Ok(dest)
    }
}

/// A template directory on local disk
#[derive(Debug, Clone)]
pub struct LocalTemplateSource {
    path: PathBuf,
}

impl LocalTemplateSource {
    /// Use `path` as the template
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemplateSource for LocalTemplateSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self, _scratch: &Path) -> Result<PathBuf> {
        if !self.path.is_dir() {
            return Err(Error::template_fetch(
                self.describe(),
                "template directory does not exist",
            ));
        }
        Ok(self.path.clone())
    }
}

/// Renders an environment's manifest tree from a template
pub struct ManifestMaterializer {
    source: Box<dyn TemplateSource>,
    subdir: Option<PathBuf>,
    manifests_dir: PathBuf,
    domain: String,
}

impl ManifestMaterializer {
    /// Create a materializer writing `<manifests_dir>/<environment>`
    pub fn new(
        source: Box<dyn TemplateSource>,
        subdir: Option<PathBuf>,
        manifests_dir: PathBuf,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            source,
            subdir,
            manifests_dir,
            domain: domain.into(),
        }
    }

    /// Materializer for the configured template; a local path wins over the URL
    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        let template = &config.template;
        let source: Box<dyn TemplateSource> = match (&template.path, &template.url) {
            (Some(path), _) => Box::new(LocalTemplateSource::new(path.clone())),
            (None, Some(url)) => Box::new(GitTemplateSource::new(
                url.clone(),
                template.branch.clone(),
            )),
            (None, None) => return Err(Error::validation("template needs either a path or a url")),
        };
        Ok(Self::new(
            source,
            template.subdir.clone(),
            config.manifests_dir(),
            config.domain.clone(),
        ))
    }

    /// `<manifests_dir>/<environment>`
    pub fn manifest_root(&self, environment: &str) -> PathBuf {
        self.manifests_dir.join(environment)
    }

    /// Fetch, render and swap in the manifest tree for `environment`
    pub fn materialize(&self, environment: &str) -> Result<PathBuf> {
        let root = self.manifest_root(environment);
        let template = self.source.describe();

        let scratch = tempfile::tempdir().map_err(|e| Error::filesystem(std::env::temp_dir(), e))?;
        let fetched = self.source.fetch(scratch.path())?;
        let template_root = match &self.subdir {
            Some(subdir) => fetched.join(subdir),
            None => fetched,
        };
        if !template_root.is_dir() {
            return Err(Error::template_fetch(
                template,
                format!("{} is not a directory", template_root.display()),
            ));
        }

        let staging = staging_path(&root);
        remove_dir(&staging)?;

        let env = template_environment();
        let ctx = context! {
            environment => environment,
            namespace => environment,
            domain => self.domain.as_str(),
        };
        render_tree(&env, &ctx, &template_root, &staging, &template)?;

        let kind_config = staging.join(KIND_CONFIG_FILE);
        if !kind_config.exists() {
            debug!("Template has no kind config, writing the default");
            std::fs::write(&kind_config, DEFAULT_KIND_CONFIG)
                .map_err(|e| Error::filesystem(&kind_config, e))?;
        }

        remove_dir(&root)?;
        std::fs::rename(&staging, &root).map_err(|e| Error::filesystem(&root, e))?;
        info!(environment, root = %root.display(), template = %template, "Manifests materialized");
        Ok(root)
    }
}

fn staging_path(root: &Path) -> PathBuf {
    let mut name = root.file_name().unwrap_or_default().to_os_string();
    name.push(".staging");
    root.with_file_name(name)
}

fn remove_dir(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::filesystem(path, e)),
    }
}

fn template_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}

fn render_tree(
    env: &Environment<'_>,
    ctx: &Value,
    src: &Path,
    dst: &Path,
    template: &str,
) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| Error::filesystem(dst, e))?;

    let mut entries = std::fs::read_dir(src)
        .and_then(|dir| dir.collect::<std::io::Result<Vec<_>>>())
        .map_err(|e| Error::filesystem(src, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        if name == GIT_DIR {
            continue;
        }
        let name = name.to_string_lossy();
        let src_path = entry.path();
        let rendered_name = if name.contains("{{") {
            env.render_str(&name, ctx).map_err(|e| {
                Error::template_fetch(template, format!("{}: {e}", src_path.display()))
            })?
        } else {
            name.into_owned()
        };
        let dst_path = dst.join(rendered_name);

        if src_path.is_dir() {
            render_tree(env, ctx, &src_path, &dst_path, template)?;
            continue;
        }

        let bytes = std::fs::read(&src_path).map_err(|e| Error::filesystem(&src_path, e))?;
        let output = match String::from_utf8(bytes) {
            Ok(text) => env
                .render_str(&text, ctx)
                .map_err(|e| {
                    Error::template_fetch(template, format!("{}: {e}", src_path.display()))
                })?
                .into_bytes(),
            Err(not_utf8) => not_utf8.into_bytes(),
        };
        std::fs::write(&dst_path, output).map_err(|e| Error::filesystem(&dst_path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn write(path: &Path, contents: impl AsRef<[u8]>) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, contents).expect("write");
    }

    fn template(dir: &Path) -> PathBuf {
        let root = dir.join("template");
        write(
            &root.join("base/namespace.yaml"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {{ namespace }}\n",
        );
        write(
            &root.join("overlays/argocd/ingress.yaml"),
            "host: argocd.{{ domain }}\n",
        );
        write(&root.join("overlays/{{ environment }}-notes.txt"), "for {{ environment }}\n");
        root
    }

    fn materializer(source: PathBuf, manifests: &Path) -> ManifestMaterializer {
        ManifestMaterializer::new(
            Box::new(LocalTemplateSource::new(source)),
            None,
            manifests.to_path_buf(),
            "kindling.local",
        )
    }

    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).expect("read_dir") {
                let path = entry.expect("entry").path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(root).expect("prefix").to_path_buf();
                    files.insert(rel, std::fs::read(&path).expect("read"));
                }
            }
        }
        files
    }

    #[test]
    fn renders_contents_and_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let m = materializer(template(dir.path()), &dir.path().join("k8s"));

        let root = m.materialize("demo").expect("materialize");
        assert_eq!(root, dir.path().join("k8s/demo"));
        assert_eq!(
            std::fs::read_to_string(root.join("base/namespace.yaml")).expect("read"),
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: demo\n"
        );
        assert_eq!(
            std::fs::read_to_string(root.join("overlays/argocd/ingress.yaml")).expect("read"),
            "host: argocd.kindling.local\n"
        );
        assert!(root.join("overlays/demo-notes.txt").is_file());
        assert!(!dir.path().join("k8s/demo.staging").exists());
    }

    #[test]
    fn output_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let m = materializer(template(dir.path()), &dir.path().join("k8s"));
        let first = snapshot(&m.materialize("demo").expect("first"));
        let second = snapshot(&m.materialize("demo").expect("second"));
        assert_eq!(first, second);
    }

    #[test]
    fn stale_files_are_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let m = materializer(template(dir.path()), &dir.path().join("k8s"));
        let root = m.materialize("demo").expect("materialize");
        write(&root.join("overlays/leftover.yaml"), "stale\n");

        m.materialize("demo").expect("again");
        assert!(!root.join("overlays/leftover.yaml").exists());
    }

    #[test]
    fn undefined_variable_keeps_previous_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = template(dir.path());
        let m = materializer(source.clone(), &dir.path().join("k8s"));
        let root = m.materialize("demo").expect("materialize");
        let before = snapshot(&root);

        write(&source.join("base/broken.yaml"), "value: {{ not_defined }}\n");
        let err = m.materialize("demo").expect_err("strict undefined");
        assert!(matches!(err, Error::TemplateFetch { .. }));
        assert!(err.to_string().contains("broken.yaml"));
        assert_eq!(snapshot(&root), before);
    }

    #[test]
    fn default_kind_config_only_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = template(dir.path());
        let m = materializer(source.clone(), &dir.path().join("k8s"));
        let root = m.materialize("demo").expect("materialize");
        assert_eq!(
            std::fs::read_to_string(root.join(KIND_CONFIG_FILE)).expect("read"),
            DEFAULT_KIND_CONFIG
        );

        write(&source.join(KIND_CONFIG_FILE), "kind: Cluster\nname: {{ environment }}\n");
        m.materialize("demo").expect("materialize");
        assert_eq!(
            std::fs::read_to_string(root.join(KIND_CONFIG_FILE)).expect("read"),
            "kind: Cluster\nname: demo\n"
        );
    }

    #[test]
    fn binary_files_are_copied_and_git_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = template(dir.path());
        let blob = [0xff_u8, 0xfe, b'{', b'{', 0x00];
        write(&source.join("base/blob.bin"), blob);
        write(&source.join(".git/HEAD"), "ref: refs/heads/main\n");

        let root = materializer(source, &dir.path().join("k8s"))
            .materialize("demo")
            .expect("materialize");
        assert_eq!(std::fs::read(root.join("base/blob.bin")).expect("read"), blob);
        assert!(!root.join(".git").exists());
    }

    #[test]
    fn subdirectory_and_missing_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = template(dir.path());
        let m = ManifestMaterializer::new(
            Box::new(LocalTemplateSource::new(source.clone())),
            Some(PathBuf::from("overlays")),
            dir.path().join("k8s"),
            "kindling.local",
        );
        let root = m.materialize("demo").expect("materialize");
        assert!(root.join("argocd/ingress.yaml").is_file());

        let m = ManifestMaterializer::new(
            Box::new(LocalTemplateSource::new(source)),
            Some(PathBuf::from("k8s")),
            dir.path().join("k8s"),
            "kindling.local",
        );
        assert!(matches!(
            m.materialize("demo"),
            Err(Error::TemplateFetch { .. })
        ));

        let m = materializer(dir.path().join("nope"), &dir.path().join("k8s"));
        assert!(matches!(
            m.materialize("demo"),
            Err(Error::TemplateFetch { .. })
        ));
    }

    #[test]
    fn git_source_clones_branch() {
        use git2::{Repository, Signature};

        let dir = tempfile::tempdir().expect("tempdir");
        let repo_dir = dir.path().join("repo");
        write(&repo_dir.join("k8s/base/ns.yaml"), "name: {{ environment }}\n");

        let repo = Repository::init(&repo_dir).expect("init");
        let mut index = repo.index().expect("index");
        index.add_path(Path::new("k8s/base/ns.yaml")).expect("add");
        index.write().expect("write index");
        let tree = repo.find_tree(index.write_tree().expect("tree")).expect("find tree");
        let sig = Signature::now("kindling", "kindling@localhost").expect("sig");
        let commit = repo
            .commit(None, &sig, &sig, "template", &tree, &[])
            .expect("commit");
        let commit = repo.find_commit(commit).expect("find commit");
        repo.branch("main", &commit, true).expect("branch");
        repo.set_head("refs/heads/main").expect("head");

        let m = ManifestMaterializer::new(
            Box::new(GitTemplateSource::new(
                repo_dir.display().to_string(),
                "main",
            )),
            Some(PathBuf::from("k8s")),
            dir.path().join("manifests"),
            "kindling.local",
        );
        let root = m.materialize("demo").expect("materialize");
        assert_eq!(
            std::fs::read_to_string(root.join("base/ns.yaml")).expect("read"),
            "name: demo\n"
        );

        let missing = ManifestMaterializer::new(
            Box::new(GitTemplateSource::new(
                repo_dir.display().to_string(),
                "no-such-branch",
            )),
            None,
            dir.path().join("manifests"),
            "kindling.local",
        );
        assert!(matches!(
            missing.materialize("demo"),
            Err(Error::TemplateFetch { .. })
        ));
    }

    #[test]
    fn from_config_prefers_local_path() {
        let mut config = PlatformConfig::default();
        config.template.path = Some(PathBuf::from("/tmp/template"));
        let m = ManifestMaterializer::from_config(&config).expect("materializer");
        assert_eq!(m.source.describe(), "/tmp/template");

        config.template.path = None;
        let m = ManifestMaterializer::from_config(&config).expect("materializer");
        assert!(m.source.describe().ends_with("@main"));
    }
}
