use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Command,
};

use crate::error::{MultidevError, Result};

/// Git output lines that mean a push changed nothing on the remote.
const UP_TO_DATE_MARKERS: &[&str] = &["Everything up-to-date"];

/// Result of pushing the merged branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// New commits reached the remote; carries git's report.
    Pushed(String),
    /// The remote already had everything.
    UpToDate,
}

/// Thin wrapper that runs git with argument vectors, never through a shell.
#[derive(Debug, Clone)]
pub struct Git {
    /// The git executable.
    program: PathBuf,
}

impl Default for Git {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Git {
    /// Use `program` as the git executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run git with `args` in `cwd`. Returns combined stdout and stderr.
    fn run(&self, cwd: &Path, args: &[OsString]) -> Result<String> {
        let command = format!(
            "{} {}",
            self.program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = Command::new(&self.program)
            .current_dir(cwd)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_MERGE_AUTOEDIT", "no")
            .output()
            .map_err(|e| MultidevError::GitCommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let message = [stderr.trim(), stdout.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(MultidevError::GitCommandFailed { command, message });
        }

        Ok([stdout.trim(), stderr.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Run git against the checkout at `clone_dir` using explicit
    /// `--git-dir`/`--work-tree` options.
    fn run_in(&self, clone_dir: &Path, args: &[&str]) -> Result<String> {
        let mut git_dir = OsString::from("--git-dir=");
        git_dir.push(clone_dir.join(".git"));
        let mut work_tree = OsString::from("--work-tree=");
        work_tree.push(clone_dir);

        let mut full = vec![git_dir, work_tree];
        full.extend(args.iter().map(OsString::from));
        self.run(clone_dir, &full)
    }

    /// Clone `url` into `clone_dir`, running from `build_dir`.
    pub fn clone(&self, build_dir: &Path, url: &str, clone_dir: &Path) -> Result<String> {
        let args = [
            OsString::from("clone"),
            OsString::from(url),
            clone_dir.as_os_str().to_owned(),
        ];
        self.run(build_dir, &args)
    }

    /// Create and check out `branch` in the checkout at `clone_dir`.
    pub fn checkout_new_branch(&self, clone_dir: &Path, branch: &str) -> Result<String> {
        self.run_in(clone_dir, &["checkout", "-b", branch])
    }

    /// Merge `branch` from `url` into the current branch without opening an
    /// editor for the merge message.
    pub fn pull(&self, clone_dir: &Path, url: &str, branch: &str) -> Result<String> {
        self.run_in(clone_dir, &["pull", "--no-rebase", "--no-edit", url, branch])
    }

    /// Push the local `branch` to the same-named branch on `origin`.
    pub fn push(&self, clone_dir: &Path, branch: &str) -> Result<PushOutcome> {
        let refspec = format!("{branch}:{branch}");
        let report = self.run_in(clone_dir, &["push", "origin", &refspec])?;
        if report.trim().is_empty() || UP_TO_DATE_MARKERS.iter().any(|m| report.contains(m)) {
            return Ok(PushOutcome::UpToDate);
        }
        Ok(PushOutcome::Pushed(report))
    }
}
