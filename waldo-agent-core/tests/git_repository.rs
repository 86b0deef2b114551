use std::path::Path;

use serial_test::serial;
use tempfile::tempdir;
use waldo_agent_core::contract::ProcessRunner;
use waldo_agent_core::git::{self, GitAccess, SystemProcessRunner};

fn git(runner: &SystemProcessRunner, args: &[&str]) {
    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    runner.run("git", &args).unwrap();
}

/// A repository with a single commit on `feature/login`.
fn init_repository(dir: &Path) -> SystemProcessRunner {
    let runner = SystemProcessRunner::in_dir(dir);
    git(&runner, &["init", "-q"]);
    git(&runner, &["config", "user.email", "ci@example.com"]);
    git(&runner, &["config", "user.name", "CI"]);
    git(&runner, &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    git(&runner, &["add", "README.md"]);
    git(&runner, &["commit", "-q", "-m", "initial"]);
    git(&runner, &["checkout", "-q", "-b", "feature/login"]);
    runner
}

/// Sets an environment variable for the lifetime of the guard, then puts
/// back whatever was there before.
struct EnvVarGuard {
    key: &'static str,
    previous: Option<std::ffi::OsString>,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        let previous = std::env::var_os(key);
        std::env::set_var(key, value);
        Self { key, previous }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => std::env::set_var(self.key, value),
            None => std::env::remove_var(self.key),
        }
    }
}

#[test]
#[serial]
fn resolves_commit_and_branch_of_real_repository() {
    if which::which("git").is_err() {
        eprintln!("git not installed, skipping");
        return;
    }

    let dir = tempdir().unwrap();
    let runner = init_repository(dir.path());

    let info = git::resolve(&runner, 0);
    assert_eq!(info.access, GitAccess::Ok);
    assert_eq!(info.commit.len(), 40);
    assert!(info.commit.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(info.branch, "feature/login");
}

#[test]
#[serial]
fn skipping_past_history_leaves_provenance_empty() {
    if which::which("git").is_err() {
        return;
    }

    let dir = tempdir().unwrap();
    let runner = init_repository(dir.path());

    let info = git::resolve(&runner, 1);
    assert_eq!(info.access, GitAccess::Ok);
    assert_eq!(info.commit, "");
    assert_eq!(info.branch, "");
}

#[test]
#[serial]
fn plain_directory_is_not_a_repository() {
    if which::which("git").is_err() {
        return;
    }

    let before = std::env::var_os("GIT_CEILING_DIRECTORIES");
    let dir = tempdir().unwrap();
    let runner = SystemProcessRunner::in_dir(dir.path());
    {
        let _ceiling = EnvVarGuard::set("GIT_CEILING_DIRECTORIES", dir.path().parent().unwrap());
        let info = git::resolve(&runner, 0);
        assert_eq!(info.access, GitAccess::NotGitRepository);
    }
    assert_eq!(std::env::var_os("GIT_CEILING_DIRECTORIES"), before);
}
