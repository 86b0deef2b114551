//! Git provenance inferred from the local repository.
//!
//! Everything here shells out through a [`ProcessRunner`], so the fallback
//! chain can be tested against canned `git` output.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::contract::{ProcessOutput, ProcessRunner};
use crate::error::ProcessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitAccess {
    Ok,
    NoGitCommandFound,
    NotGitRepository,
}

impl GitAccess {
    /// Name sent to the service in the `gitAccess` query parameter.
    pub fn name(&self) -> &'static str {
        match self {
            GitAccess::Ok => "ok",
            GitAccess::NoGitCommandFound => "noGitCommandFound",
            GitAccess::NotGitRepository => "notGitRepository",
        }
    }
}

impl fmt::Display for GitAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    pub access: GitAccess,
    pub branch: String,
    pub commit: String,
}

impl GitInfo {
    fn unavailable(access: GitAccess) -> Self {
        Self {
            access,
            branch: String::new(),
            commit: String::new(),
        }
    }
}

/// Runs executables with [`std::process::Command`], optionally in a fixed directory.
#[derive(Debug, Clone, Default)]
pub struct SystemProcessRunner {
    current_dir: Option<PathBuf>,
}

impl SystemProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command inside `dir` instead of the process working directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            current_dir: Some(dir.into()),
        }
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|source| ProcessError::Launch {
            program: program.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        let stderr = String::from_utf8_lossy(&output.stderr)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        if !output.status.success() {
            return Err(ProcessError::Exit {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

fn git_program() -> &'static str {
    if cfg!(windows) {
        "git.exe"
    } else {
        "git"
    }
}

fn git(runner: &dyn ProcessRunner, args: &[&str]) -> Result<String, ProcessError> {
    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    let output = runner.run(git_program(), &args);
    match &output {
        Ok(out) => debug!(?args, stdout = %out.stdout, "git succeeded"),
        Err(e) => debug!(?args, error = %e, "git failed"),
    }
    output.map(|out| out.stdout)
}

/// Infer commit and branch, skipping `skip_count` leading log entries.
pub fn resolve(runner: &dyn ProcessRunner, skip_count: u32) -> GitInfo {
    if runner.locate(git_program()).is_none() {
        warn!("git executable not found on PATH");
        return GitInfo::unavailable(GitAccess::NoGitCommandFound);
    }

    if git(runner, &["rev-parse"]).is_err() {
        warn!("Not inside a git repository");
        return GitInfo::unavailable(GitAccess::NotGitRepository);
    }

    let commit = infer_commit(runner, skip_count);
    let branch = if commit.is_empty() {
        String::new()
    } else {
        infer_branch(runner, &commit)
    };

    info!(branch = %branch, commit = %commit, skip_count, "Inferred git provenance");
    GitInfo {
        access: GitAccess::Ok,
        branch,
        commit,
    }
}

fn infer_commit(runner: &dyn ProcessRunner, skip_count: u32) -> String {
    let skip = format!("--skip={skip_count}");
    match git(runner, &["log", "--format=%H", &skip, "-1"]) {
        Ok(hash) if is_full_hash(hash.trim()) => hash.trim().to_string(),
        Ok(hash) => {
            warn!(output = %hash, "git log did not return a commit hash");
            String::new()
        }
        // Typically a shallow clone without enough history to skip into.
        Err(e) => {
            warn!(error = %e, skip_count, "Unable to read commit from git log");
            String::new()
        }
    }
}

/// SHA-1 or SHA-256 object name.
fn is_full_hash(value: &str) -> bool {
    (value.len() == 40 || value.len() == 64) && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn infer_branch(runner: &dyn ProcessRunner, commit: &str) -> String {
    let strategies: [(&str, fn(&dyn ProcessRunner, &str) -> String); 3] = [
        ("for-each-ref", branch_from_for_each_ref),
        ("name-rev", branch_from_name_rev),
        ("rev-parse", branch_from_rev_parse),
    ];

    for (strategy, infer) in strategies {
        let branch = infer(runner, commit);
        if !branch.is_empty() {
            debug!(strategy, branch = %branch, "Branch inferred");
            return branch;
        }
    }
    String::new()
}

fn branch_from_for_each_ref(runner: &dyn ProcessRunner, commit: &str) -> String {
    let points_at = format!("--points-at={commit}");
    match git(runner, &["for-each-ref", &points_at, "--format=%(refname)"]) {
        // Several branches may point at the commit; the first listed wins.
        Ok(listing) => branch_names_from_refs(&listing)
            .into_iter()
            .next()
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

fn branch_from_name_rev(runner: &dyn ProcessRunner, commit: &str) -> String {
    match git(runner, &["name-rev", "--always", "--name-only", commit]) {
        Ok(name) => name_rev_to_branch_name(&name),
        Err(_) => String::new(),
    }
}

fn branch_from_rev_parse(runner: &dyn ProcessRunner, _commit: &str) -> String {
    match git(runner, &["rev-parse", "--abbrev-ref", "HEAD"]) {
        Ok(name) if name.trim() != "HEAD" => name.trim().to_string(),
        _ => String::new(),
    }
}

/// Branch names from `for-each-ref` output, de-duplicated in listing order.
pub fn branch_names_from_refs(listing: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in listing.lines().filter_map(ref_name_to_branch_name) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn ref_name_to_branch_name(ref_name: &str) -> Option<String> {
    let ref_name = ref_name.trim();
    let branch = if let Some(local) = ref_name.strip_prefix("refs/heads/") {
        local
    } else if let Some(remote) = ref_name.strip_prefix("refs/remotes/") {
        strip_remote(remote)?
    } else {
        return None;
    };

    (!branch.is_empty() && branch != "HEAD").then(|| branch.to_string())
}

fn name_rev_to_branch_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with("tags/") {
        return String::new();
    }

    let branch = match name.strip_prefix("remotes/") {
        Some(remote) => match strip_remote(remote) {
            Some(branch) => branch,
            None => return String::new(),
        },
        None => name,
    };

    if branch == "HEAD" {
        String::new()
    } else {
        branch.to_string()
    }
}

/// `origin/feature/x` → `feature/x`.
fn strip_remote(name: &str) -> Option<&str> {
    name.split_once('/').map(|(_, branch)| branch)
}
