//! Clone the generated repository, point its `go.mod` at the new module path,
//! and push the change.
//!
//! Every git invocation runs with an explicit working directory; the process
//! working directory is never changed. The clone lives under a scoped
//! temporary root that is removed whether the workflow succeeds or not.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info};

use crate::github::{GitHubClient, GitHubError};
use crate::http::HttpClient;
use crate::secrets::{CredentialError, CredentialResolver, SecretsBackend};

pub const MANIFEST_FILE: &str = "go.mod";
pub const MODULE_KEYWORD: &str = "module";
pub const COMMIT_MESSAGE: &str = "Update go.mod module path";
pub const DEFAULT_GIT_HOST: &str = "github.com";

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("error fetching GitHub token: {0}")]
    TokenFetch(#[source] CredentialError),
    #[error("error fetching GitHub username: {0}")]
    IdentityFetch(#[source] GitHubError),
    #[error("error creating working directory: {0}")]
    WorkDir(#[source] std::io::Error),
    #[error("error cloning repository: {0}")]
    Clone(String),
    #[error("error changing directory: {0}")]
    DirectoryChange(String),
    #[error("error reading {MANIFEST_FILE} file: {0}")]
    ManifestRead(#[source] std::io::Error),
    #[error("no `{MODULE_KEYWORD}` line found in {MANIFEST_FILE}")]
    ModuleLineMissing,
    #[error("error writing to {MANIFEST_FILE} file: {0}")]
    ManifestWrite(#[source] std::io::Error),
    #[error("error adding {MANIFEST_FILE} file to git: {0}")]
    Stage(String),
    #[error("error committing changes: {0}")]
    Commit(String),
    #[error("error pushing changes: {0}")]
    Push(String),
    #[error("error removing the cloned repository: {0}")]
    Cleanup(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl GitCommand {
    pub fn new<I, A>(args: I, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
        }
    }

    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CommandError(pub String);

pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &GitCommand) -> Result<(), CommandError>;
}

impl<F> CommandRunner for F
where
    F: Fn(&GitCommand) -> Result<(), CommandError> + Send + Sync,
{
    fn run(&self, command: &GitCommand) -> Result<(), CommandError> {
        self(command)
    }
}

/// Runs the `git` executable found on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl CommandRunner for GitCli {
    fn run(&self, command: &GitCommand) -> Result<(), CommandError> {
        let output = Command::new("git")
            .args(&command.args)
            .current_dir(&command.cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| CommandError(format!("failed to run git: {e}")))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CommandError(format!(
            "git {} failed ({}): {}",
            command.subcommand(),
            output.status,
            stderr.trim()
        )))
    }
}

pub struct CloneRewritePush<S, H, C> {
    credentials: Arc<CredentialResolver<S>>,
    github: Arc<GitHubClient<H>>,
    runner: C,
    git_host: String,
    work_dir: PathBuf,
}

impl<S, H, C> CloneRewritePush<S, H, C>
where
    S: SecretsBackend,
    H: HttpClient,
    C: CommandRunner,
{
    pub fn new(
        credentials: Arc<CredentialResolver<S>>,
        github: Arc<GitHubClient<H>>,
        runner: C,
        git_host: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            credentials,
            github,
            runner,
            git_host: git_host.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn run(&self, name: &str) -> Result<(), CloneError> {
        let token = self
            .credentials
            .github_token()
            .map_err(CloneError::TokenFetch)?;
        let identity = self
            .github
            .authenticated_login(&token)
            .map_err(CloneError::IdentityFetch)?;

        let root = tempfile::Builder::new()
            .prefix(&format!("autobuild-{name}-"))
            .tempdir_in(&self.work_dir)
            .map_err(CloneError::WorkDir)?;

        let url = clone_url(&self.git_host, &token, &identity, name);
        info!(name, owner = %identity, host = %self.git_host, "cloning repository");
        self.git(["clone", "--", url.as_str(), name], root.path(), &token)
            .map_err(CloneError::Clone)?;

        let repo_dir = enter(&root.path().join(name))?;

        let module_path = format!("{}/{}/{}", self.git_host, identity, name);
        rewrite_manifest(&repo_dir.join(MANIFEST_FILE), &module_path)?;
        debug!(module = %module_path, "rewrote module line");

        self.git(["add", MANIFEST_FILE], &repo_dir, &token)
            .map_err(CloneError::Stage)?;
        self.git(["commit", "-m", COMMIT_MESSAGE], &repo_dir, &token)
            .map_err(CloneError::Commit)?;
        self.git(["push"], &repo_dir, &token)
            .map_err(CloneError::Push)?;
        info!(name, "pushed module path update");

        leave(root)
    }

    fn git<const N: usize>(&self, args: [&str; N], cwd: &Path, token: &str) -> Result<(), String> {
        let command = GitCommand::new(args, cwd);
        debug!(subcommand = command.subcommand(), cwd = %cwd.display(), "running git");
        self.runner
            .run(&command)
            .map_err(|err| redact(&err.0, token))
    }
}

pub fn clone_url(host: &str, token: &str, identity: &str, name: &str) -> String {
    format!("https://{token}@{host}/{identity}/{name}.git")
}

/// Replaces the first `module` line of a go.mod with `module <module_path>`.
///
/// Every other line, including line endings, is left byte-identical.
/// Returns `None` when the manifest has no module declaration.
pub fn rewrite_module_line(contents: &str, module_path: &str) -> Option<String> {
    let index = contents.split('\n').position(is_module_line)?;
    let rewritten: Vec<String> = contents
        .split('\n')
        .enumerate()
        .map(|(i, line)| {
            if i != index {
                return line.to_string();
            }
            let carriage_return = if line.ends_with('\r') { "\r" } else { "" };
            format!("{MODULE_KEYWORD} {module_path}{carriage_return}")
        })
        .collect();
    Some(rewritten.join("\n"))
}

fn is_module_line(line: &str) -> bool {
    line.strip_prefix(MODULE_KEYWORD)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

fn rewrite_manifest(path: &Path, module_path: &str) -> Result<(), CloneError> {
    let contents = fs::read_to_string(path).map_err(CloneError::ManifestRead)?;
    let rewritten =
        rewrite_module_line(&contents, module_path).ok_or(CloneError::ModuleLineMissing)?;
    fs::write(path, rewritten).map_err(CloneError::ManifestWrite)
}

fn enter(dir: &Path) -> Result<PathBuf, CloneError> {
    let metadata = fs::metadata(dir)
        .map_err(|e| CloneError::DirectoryChange(format!("{}: {e}", dir.display())))?;
    if !metadata.is_dir() {
        return Err(CloneError::DirectoryChange(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(dir.to_path_buf())
}

fn leave(root: TempDir) -> Result<(), CloneError> {
    if !root.path().is_dir() {
        return Err(CloneError::DirectoryChange(format!(
            "{} no longer exists",
            root.path().display()
        )));
    }
    root.close().map_err(CloneError::Cleanup)
}

fn redact(message: &str, token: &str) -> String {
    if token.is_empty() {
        return message.to_string();
    }
    message.replace(token, "***")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::http::{HttpRequest, HttpResponse, TransportError};
    use crate::secrets::{CredentialCache, GITHUB_TOKEN_KEY, InMemorySecrets};

    const GO_MOD: &str = "module example.com/old\n\ngo 1.22\n\nrequire github.com/pkg/errors v0.9.1\n";

    type Calls = Arc<Mutex<Vec<GitCommand>>>;

    fn credentials() -> Arc<CredentialResolver<InMemorySecrets>> {
        Arc::new(CredentialResolver::new(
            InMemorySecrets::from_pairs([(GITHUB_TOKEN_KEY, "s3cret")]),
            Arc::new(CredentialCache::new()),
            "github_token",
        ))
    }

    fn github(
        status: u16,
    ) -> Arc<GitHubClient<impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError>>> {
        let http = move |_: &HttpRequest| -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse::new(status, r#"{"login":"acme-bot"}"#))
        };
        Arc::new(GitHubClient::new(http, "https://api.github.test"))
    }

    /// Records git calls; `clone` materializes a repository holding `manifest`.
    fn fake_git(
        manifest: Option<&'static str>,
        fail_on: Option<&'static str>,
    ) -> (impl Fn(&GitCommand) -> Result<(), CommandError>, Calls) {
        let calls: Calls = Arc::default();
        let sink = Arc::clone(&calls);
        let runner = move |command: &GitCommand| -> Result<(), CommandError> {
            sink.lock().expect("lock").push(command.clone());
            if fail_on == Some(command.subcommand()) {
                return Err(CommandError(format!(
                    "fatal: {} rejected for https://s3cret@github.com",
                    command.subcommand()
                )));
            }
            if command.subcommand() == "clone" {
                let repo = command.cwd.join(command.args.last().expect("clone target"));
                fs::create_dir_all(&repo).expect("create clone");
                if let Some(manifest) = manifest {
                    fs::write(repo.join(MANIFEST_FILE), manifest).expect("write manifest");
                }
            }
            Ok(())
        };
        (runner, calls)
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).expect("read work dir").count()
    }

    #[test]
    fn rewrites_first_module_line_only() {
        let contents = "// generated\nmodule example.com/old\ngo 1.22\nmodule example.com/second\n";
        let rewritten =
            rewrite_module_line(contents, "github.com/acme-bot/svc-orders").expect("module line");
        assert_eq!(
            rewritten,
            "// generated\nmodule github.com/acme-bot/svc-orders\ngo 1.22\nmodule example.com/second\n"
        );
    }

    #[test]
    fn rewrite_preserves_surrounding_bytes() {
        let contents = "module example.com/old\r\n\r\ngo 1.22\r\n";
        let rewritten = rewrite_module_line(contents, "github.com/a/b").expect("module line");
        assert_eq!(rewritten, "module github.com/a/b\r\n\r\ngo 1.22\r\n");

        let no_trailing_newline = rewrite_module_line("go 1.22\nmodule x", "github.com/a/b");
        assert_eq!(no_trailing_newline.as_deref(), Some("go 1.22\nmodule github.com/a/b"));
    }

    #[test]
    fn module_keyword_must_be_a_whole_word() {
        assert_eq!(rewrite_module_line("modules x\ngo 1.22\n", "github.com/a/b"), None);
        assert!(rewrite_module_line("module\tx\n", "github.com/a/b").is_some());
    }

    #[test]
    fn clone_url_embeds_token_and_identity() {
        assert_eq!(
            clone_url("github.com", "tok", "acme-bot", "svc-orders"),
            "https://tok@github.com/acme-bot/svc-orders.git"
        );
    }

    #[test]
    fn happy_path_rewrites_pushes_and_cleans_up() {
        let work_dir = tempfile::tempdir().expect("work dir");
        let (runner, calls) = fake_git(Some(GO_MOD), None);

        // Capture the manifest as it looked when `git add` ran.
        let staged = Arc::new(Mutex::new(String::new()));
        let staged_sink = Arc::clone(&staged);
        let runner = move |command: &GitCommand| -> Result<(), CommandError> {
            if command.subcommand() == "add" {
                let manifest = fs::read_to_string(command.cwd.join(MANIFEST_FILE))
                    .expect("manifest readable");
                *staged_sink.lock().expect("lock") = manifest;
            }
            runner(command)
        };

        let workflow =
            CloneRewritePush::new(credentials(), github(200), runner, "github.com", work_dir.path());
        workflow.run("svc-orders").expect("workflow succeeds");

        let staged = staged.lock().expect("lock").clone();
        assert!(staged.starts_with("module github.com/acme-bot/svc-orders\n"));
        assert!(staged.ends_with("\n\ngo 1.22\n\nrequire github.com/pkg/errors v0.9.1\n"));

        let subcommands: Vec<String> = calls
            .lock()
            .expect("lock")
            .iter()
            .map(|c| c.subcommand().to_string())
            .collect();
        assert_eq!(subcommands, ["clone", "add", "commit", "push"]);
        assert_eq!(entries(work_dir.path()), 0);
    }

    #[test]
    fn git_commands_run_inside_the_clone() {
        let work_dir = tempfile::tempdir().expect("work dir");
        let (runner, calls) = fake_git(Some(GO_MOD), None);
        let workflow =
            CloneRewritePush::new(credentials(), github(200), runner, "github.com", work_dir.path());
        workflow.run("svc-orders").expect("workflow succeeds");

        let calls = calls.lock().expect("lock");
        assert_eq!(
            calls[0].args,
            [
                "clone",
                "--",
                "https://s3cret@github.com/acme-bot/svc-orders.git",
                "svc-orders"
            ]
        );
        for command in &calls[1..] {
            assert!(command.cwd.ends_with("svc-orders"), "{:?}", command.cwd);
        }
        assert_eq!(calls[2].args, ["commit", "-m", COMMIT_MESSAGE]);
    }

    #[test]
    fn identity_failure_reports_status_and_skips_clone() {
        let work_dir = tempfile::tempdir().expect("work dir");
        let (runner, calls) = fake_git(Some(GO_MOD), None);
        let workflow =
            CloneRewritePush::new(credentials(), github(403), runner, "github.com", work_dir.path());

        let err = workflow.run("svc-orders").expect_err("identity failure");
        assert!(matches!(err, CloneError::IdentityFetch(_)));
        assert!(err.to_string().contains("403"));
        assert!(calls.lock().expect("lock").is_empty());
    }

    #[test]
    fn push_failure_still_removes_working_copy() {
        let work_dir = tempfile::tempdir().expect("work dir");
        let (runner, _) = fake_git(Some(GO_MOD), Some("push"));
        let workflow =
            CloneRewritePush::new(credentials(), github(200), runner, "github.com", work_dir.path());

        let err = workflow.run("svc-orders").expect_err("push failure");
        assert!(matches!(err, CloneError::Push(_)));
        assert!(!err.to_string().contains("s3cret"));
        assert_eq!(entries(work_dir.path()), 0);
    }

    #[test]
    fn unusable_work_dir_is_not_a_clone_error() {
        let parent = tempfile::tempdir().expect("parent");
        let (runner, calls) = fake_git(Some(GO_MOD), None);
        let workflow = CloneRewritePush::new(
            credentials(),
            github(200),
            runner,
            "github.com",
            parent.path().join("missing"),
        );

        let err = workflow.run("svc-orders").expect_err("no work dir");
        assert!(matches!(err, CloneError::WorkDir(_)));
        assert!(err.to_string().starts_with("error creating working directory"));
        assert!(calls.lock().expect("lock").is_empty());
    }

    #[test]
    fn missing_clone_directory_is_a_directory_change_error() {
        let work_dir = tempfile::tempdir().expect("work dir");
        let runner = |_: &GitCommand| -> Result<(), CommandError> { Ok(()) };
        let workflow =
            CloneRewritePush::new(credentials(), github(200), runner, "github.com", work_dir.path());

        let err = workflow.run("svc-orders").expect_err("no clone");
        assert!(matches!(err, CloneError::DirectoryChange(_)));
        assert_eq!(entries(work_dir.path()), 0);
    }

    #[test]
    fn manifest_errors_are_distinguished() {
        let work_dir = tempfile::tempdir().expect("work dir");
        let (runner, calls) = fake_git(None, None);
        let workflow =
            CloneRewritePush::new(credentials(), github(200), runner, "github.com", work_dir.path());
        let err = workflow.run("svc-orders").expect_err("no manifest");
        assert!(matches!(err, CloneError::ManifestRead(_)));
        assert_eq!(calls.lock().expect("lock").len(), 1);

        let (runner, _) = fake_git(Some("go 1.22\n"), None);
        let workflow =
            CloneRewritePush::new(credentials(), github(200), runner, "github.com", work_dir.path());
        let err = workflow.run("svc-orders").expect_err("no module line");
        assert!(matches!(err, CloneError::ModuleLineMissing));
    }

    #[test]
    fn each_git_step_has_its_own_error() {
        for (step, expected) in [("clone", "cloning"), ("add", "adding"), ("commit", "committing")] {
            let work_dir = tempfile::tempdir().expect("work dir");
            let (runner, _) = fake_git(Some(GO_MOD), Some(step));
            let workflow = CloneRewritePush::new(
                credentials(),
                github(200),
                runner,
                "github.com",
                work_dir.path(),
            );
            let err = workflow.run("svc-orders").expect_err("git failure");
            assert!(err.to_string().contains(expected), "{step}: {err}");
        }
    }

    #[test]
    fn git_cli_reports_spawn_failures() {
        let missing = std::env::temp_dir().join("autobuild-missing-dir-for-test");
        let err = GitCli
            .run(&GitCommand::new(["status"], missing))
            .expect_err("missing cwd");
        assert!(err.0.starts_with("failed to run git"));
    }
}
