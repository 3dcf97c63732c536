//! Process runner for external tools
//!
//! Every interaction with kind, kubectl, helm and kustomize goes through a
//! [`CommandRunner`]. A run never returns an error: a non-zero exit and a
//! binary that could not be spawned both come back as a [`CommandOutput`],
//! so callers branch on a single shape and decide for themselves whether a
//! failure is fatal.
//!
//! Failed outputs are classified into a small closed set of
//! [`CommandErrorKind`]s at this boundary. Installers match on the kind
//! instead of searching stderr text themselves.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Exit code reported when the program could not be found (shell convention)
pub const MISSING_BINARY_EXIT_CODE: i32 = 127;

/// Exit code reported when the process ended without one (killed by a signal)
pub const NO_EXIT_CODE: i32 = -1;

/// stderr fragments (lowercased) meaning the resource or release is already there.
///
/// kubectl: `Error from server (AlreadyExists): namespaces "argocd" already exists`
/// helm: `Error: INSTALLATION FAILED: cannot re-use a name that is still in use`
/// helm repo add: `Error: repository name (traefik) already exists, please specify a different name`
/// kind: `ERROR: failed to create cluster: node(s) already exist for a cluster with the name "demo"`
///
/// Each entry is specific to one tool. helm's `rendered manifests contain a
/// resource that already exists` is an ownership conflict and must stay a
/// failure.
const ALREADY_EXISTS_SIGNATURES: &[&str] = &[
    "(alreadyexists)",
    "cannot re-use a name that is still in use",
    "already exists, please specify a different name",
    "already exist for a cluster",
];

/// stderr fragments (lowercased) meaning the queried object does not exist.
///
/// kubectl: `Error from server (NotFound): secrets "grafana" not found`
/// helm: `Error: release: not found`
const NOT_FOUND_SIGNATURES: &[&str] = &["(notfound)", "not found", "no matching resources found"];

/// How a command line is handed to the operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Invoke the program directly with an argument vector
    #[default]
    Exec,
    /// Pass the whole line to `sh -c` (pipelines and shell builtins only)
    Shell,
}

/// A command to run, built up with the builder methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name, or the full line in [`ExecMode::Shell`]
    pub program: String,
    /// Arguments (unused in shell mode)
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Payload written to the child's stdin
    pub stdin: Option<String>,
    /// Exec or shell
    pub mode: ExecMode,
}

impl CommandSpec {
    /// A direct invocation of `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            mode: ExecMode::Exec,
        }
    }

    /// A line interpreted by `sh -c`
    pub fn shell(line: impl Into<String>) -> Self {
        Self {
            mode: ExecMode::Shell,
            ..Self::new(line)
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir`
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed `input` on stdin
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command line as a single string, for logs and errors
    pub fn command_line(&self) -> String {
        match self.mode {
            ExecMode::Shell => self.program.clone(),
            ExecMode::Exec if self.args.is_empty() => self.program.clone(),
            ExecMode::Exec => format!("{} {}", self.program, self.args.join(" ")),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Semantic classification of a failed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// The object, release or cluster already exists
    AlreadyExists,
    /// The queried object does not exist
    NotFound,
    /// The program could not be executed
    MissingBinary,
    /// Any other failure
    Failed,
}

impl CommandErrorKind {
    /// Classify a failure from its exit code and stderr
    pub fn classify(exit_code: i32, stderr: &str) -> Self {
        if exit_code == MISSING_BINARY_EXIT_CODE {
            return Self::MissingBinary;
        }
        let lower = stderr.to_ascii_lowercase();
        if ALREADY_EXISTS_SIGNATURES.iter().any(|s| lower.contains(s)) {
            Self::AlreadyExists
        } else if NOT_FOUND_SIGNATURES.iter().any(|s| lower.contains(s)) {
            Self::NotFound
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for CommandErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyExists => "already exists",
            Self::NotFound => "not found",
            Self::MissingBinary => "missing binary",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of an apply-style command that tolerates existing objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The command succeeded
    Done,
    /// The tool reported the object already exists; treated as success
    AlreadyExisted,
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Failure classification, `None` on success
    pub fn kind(&self) -> Option<CommandErrorKind> {
        if self.success() {
            None
        } else {
            Some(CommandErrorKind::classify(self.exit_code, &self.stderr))
        }
    }

    /// Turn a failed output into [`Error::ExternalCommand`]
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        match self.kind() {
            None => Ok(self),
            Some(kind) => Err(self.into_error(spec, kind)),
        }
    }

    /// Like [`check`](Self::check), but an "already exists" failure is success
    pub fn allow_existing(self, spec: &CommandSpec) -> Result<Applied> {
        match self.kind() {
            None => Ok(Applied::Done),
            Some(CommandErrorKind::AlreadyExists) => {
                info!(command = %spec, "Already exists, continuing");
                Ok(Applied::AlreadyExisted)
            }
            Some(kind) => Err(self.into_error(spec, kind)),
        }
    }

    fn into_error(self, spec: &CommandSpec, kind: CommandErrorKind) -> Error {
        Error::ExternalCommand {
            command: spec.command_line(),
            exit_code: self.exit_code,
            stderr: self.stderr.trim().to_string(),
            kind,
        }
    }

    fn spawn_failure(program: &str, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::failed(
                MISSING_BINARY_EXIT_CODE,
                format!("{program}: command not found"),
            )
        } else {
            Self::failed(NO_EXIT_CODE, format!("failed to execute {program}: {err}"))
        }
    }
}

/// Trait for executing external commands (allows mocking in tests)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    async fn run(&self, spec: &CommandSpec) -> CommandOutput;
}

/// Runner that spawns real processes with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandOutput {
        debug!(command = %spec, "Running command");

        let mut command = match spec.mode {
            ExecMode::Exec => {
                let mut c = Command::new(&spec.program);
                c.args(&spec.args);
                c
            }
            ExecMode::Shell => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(&spec.program);
                c
            }
        };
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        command
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutput::spawn_failure(&spec.program, &e),
        };

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                warn!(command = %spec, error = %e, "Failed to write stdin");
            }
            // Dropping closes the pipe so the child sees EOF
            drop(stdin);
        }

        match child.wait_with_output().await {
            Ok(output) => {
                let result = CommandOutput {
                    exit_code: output.status.code().unwrap_or(NO_EXIT_CODE),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(command = %spec, exit_code = result.exit_code, "Command finished");
                result
            }
            Err(e) => CommandOutput::failed(
                NO_EXIT_CODE,
                format!("failed to wait for {}: {e}", spec.program),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Classification
    // =========================================================================

    #[test]
    fn classifies_kubectl_already_exists() {
        let stderr = r#"Error from server (AlreadyExists): namespaces "argocd" already exists"#;
        assert_eq!(
            CommandErrorKind::classify(1, stderr),
            CommandErrorKind::AlreadyExists
        );
    }

    #[test]
    fn classifies_helm_name_in_use_as_already_exists() {
        let stderr = "Error: INSTALLATION FAILED: cannot re-use a name that is still in use";
        assert_eq!(
            CommandErrorKind::classify(1, stderr),
            CommandErrorKind::AlreadyExists
        );
    }

    #[test]
    fn classifies_kind_existing_cluster_as_already_exists() {
        let stderr = r#"ERROR: failed to create cluster: node(s) already exist for a cluster with the name "demo""#;
        assert_eq!(
            CommandErrorKind::classify(1, stderr),
            CommandErrorKind::AlreadyExists
        );
    }

    #[test]
    fn classifies_helm_existing_repository_as_already_exists() {
        let stderr =
            "Error: repository name (traefik) already exists, please specify a different name";
        assert_eq!(
            CommandErrorKind::classify(1, stderr),
            CommandErrorKind::AlreadyExists
        );
    }

    #[test]
    fn helm_ownership_conflict_is_a_failure() {
        let stderr = "Error: INSTALLATION FAILED: rendered manifests contain a resource that \
                      already exists. Unable to continue with install: Service \"traefik\" in \
                      namespace \"traefik\" exists and cannot be imported into the current release";
        assert_eq!(
            CommandErrorKind::classify(1, stderr),
            CommandErrorKind::Failed
        );
        let spec = CommandSpec::new("helm").args(["install", "traefik", "traefik/traefik"]);
        assert!(CommandOutput::failed(1, stderr).allow_existing(&spec).is_err());
    }

    #[test]
    fn classifies_not_found() {
        let stderr = r#"Error from server (NotFound): secrets "grafana" not found"#;
        assert_eq!(
            CommandErrorKind::classify(1, stderr),
            CommandErrorKind::NotFound
        );
    }

    #[test]
    fn exit_127_is_missing_binary_regardless_of_stderr() {
        assert_eq!(
            CommandErrorKind::classify(127, "sh: 1: kind: not found"),
            CommandErrorKind::MissingBinary
        );
    }

    #[test]
    fn other_failures_are_failed() {
        assert_eq!(
            CommandErrorKind::classify(1, "error: unable to recognize \"x.yaml\""),
            CommandErrorKind::Failed
        );
    }

    // =========================================================================
    // Output conversion
    // =========================================================================

    #[test]
    fn check_converts_failure_to_external_command_error() {
        let spec = CommandSpec::new("kubectl").args(["apply", "-f", "x.yaml"]);
        let err = CommandOutput::failed(1, "  boom\n")
            .check(&spec)
            .expect_err("failed output should be an error");
        match err {
            Error::ExternalCommand {
                command,
                exit_code,
                stderr,
                kind,
            } => {
                assert_eq!(command, "kubectl apply -f x.yaml");
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "boom");
                assert_eq!(kind, CommandErrorKind::Failed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn allow_existing_downgrades_already_exists() {
        let spec = CommandSpec::new("kubectl").args(["create", "namespace", "argocd"]);
        let applied = CommandOutput::failed(
            1,
            r#"Error from server (AlreadyExists): namespaces "argocd" already exists"#,
        )
            .allow_existing(&spec)
            .expect("already exists should be tolerated");
        assert_eq!(applied, Applied::AlreadyExisted);

        let applied = CommandOutput::ok("")
            .allow_existing(&spec)
            .expect("success should pass");
        assert_eq!(applied, Applied::Done);

        assert!(CommandOutput::failed(1, "forbidden")
            .allow_existing(&spec)
            .is_err());
    }

    #[test]
    fn command_line_formats_both_modes() {
        assert_eq!(
            CommandSpec::new("kind").args(["get", "clusters"]).to_string(),
            "kind get clusters"
        );
        assert_eq!(CommandSpec::new("kind").to_string(), "kind");
        assert_eq!(
            CommandSpec::shell("command -v helm").to_string(),
            "command -v helm"
        );
    }

    // =========================================================================
    // Real processes
    // =========================================================================

    #[tokio::test]
    async fn process_runner_captures_output_and_exit_code() {
        let out = ProcessRunner
            .run(&CommandSpec::shell("echo hello; echo oops >&2; exit 3"))
            .await;
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.kind(), Some(CommandErrorKind::Failed));
    }

    #[tokio::test]
    async fn process_runner_feeds_stdin() {
        let out = ProcessRunner
            .run(&CommandSpec::new("cat").stdin("kind: Cluster\n"))
            .await;
        assert!(out.success());
        assert_eq!(out.stdout, "kind: Cluster\n");
    }

    #[tokio::test]
    async fn process_runner_normalizes_missing_binary() {
        let out = ProcessRunner
            .run(&CommandSpec::new("kindling-definitely-not-installed").arg("--version"))
            .await;
        assert_eq!(out.exit_code, MISSING_BINARY_EXIT_CODE);
        assert_eq!(out.kind(), Some(CommandErrorKind::MissingBinary));
    }

    #[tokio::test]
    async fn process_runner_honours_cwd_and_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = ProcessRunner
            .run(
                &CommandSpec::shell("pwd; echo $KINDLING_TEST_VALUE")
                    .cwd(dir.path())
                    .env("KINDLING_TEST_VALUE", "42"),
            )
            .await;
        assert!(out.success());
        let lines: Vec<&str> = out.stdout.lines().collect();
        let canonical = dir.path().canonicalize().expect("canonicalize");
        assert_eq!(
            std::path::Path::new(lines[0])
                .canonicalize()
                .expect("canonicalize"),
            canonical
        );
        assert_eq!(lines[1], "42");
    }

    #[tokio::test]
    async fn mock_runner_can_be_used() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.program == "kind")
            .returning(|_| CommandOutput::ok("demo\n"));
        let out = runner
            .run(&CommandSpec::new("kind").args(["get", "clusters"]))
            .await;
        assert_eq!(out.stdout, "demo\n");
    }
}
