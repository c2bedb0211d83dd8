//! Git adapter for the orchestrator.
//!
//! Branch creation, merges, and conflict handling all go through a small,
//! explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of merging another ref into the current branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Merge completed (or was already up to date).
    Clean,
    /// Merge stopped with these unmerged paths; the merge is still in progress.
    Conflicted(Vec<String>),
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Return the full HEAD SHA.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Number of commits reachable from HEAD but not from `since`.
    pub fn commits_since(&self, since: &str) -> Result<u32> {
        let range = format!("{since}..HEAD");
        let out = self.run_capture(&["rev-list", "--count", &range])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse rev-list count '{}'", out.trim()))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is clean, allowing entries with any of the given prefixes.
    #[instrument(skip_all)]
    pub fn ensure_clean_except_prefixes(&self, allowed_prefixes: &[&str]) -> Result<()> {
        let disallowed: Vec<StatusEntry> = self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| {
                !allowed_prefixes
                    .iter()
                    .any(|prefix| entry.path.starts_with(prefix))
            })
            .collect();
        if disallowed.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(disallowed_count = disallowed.len(), "worktree not clean");
        let mut msg = String::from("working tree not clean:\n");
        for entry in disallowed {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create `branch` at `base` and check it out.
    #[instrument(skip_all, fields(branch, base))]
    pub fn checkout_new_branch(&self, branch: &str, base: &str) -> Result<()> {
        debug!(branch, base, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch, base])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    pub fn add_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Fetch one branch from `remote`, updating `refs/remotes/<remote>/<branch>`.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["fetch", remote, branch])?;
        Ok(())
    }

    /// Push `branch` to `remote` and set upstream.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "pushing branch");
        self.run_checked(&["push", "-u", remote, branch])?;
        Ok(())
    }

    /// Bring local `branch` up to date with `remote/branch` (fast-forward only).
    #[instrument(skip_all, fields(remote, branch))]
    pub fn update_local_branch(&self, remote: &str, branch: &str) -> Result<()> {
        if self.current_branch()? == branch {
            self.fetch(remote, branch)?;
            let upstream = format!("{remote}/{branch}");
            self.run_checked(&["merge", "--ff-only", &upstream])?;
        } else {
            let refspec = format!("{branch}:{branch}");
            self.run_checked(&["fetch", remote, &refspec])?;
        }
        Ok(())
    }

    /// Merge `reference` into the current branch.
    ///
    /// On conflicts the merge is left in progress so the caller can resolve or abort it.
    #[instrument(skip_all, fields(reference))]
    pub fn merge(&self, reference: &str) -> Result<MergeResult> {
        let output = self.run(&["merge", "--no-edit", reference])?;
        if output.status.success() {
            debug!(reference, "merge clean");
            return Ok(MergeResult::Clean);
        }
        let conflicts = self.unmerged_paths()?;
        if conflicts.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git merge {reference} failed: {}", stderr.trim()));
        }
        debug!(reference, conflicts = conflicts.len(), "merge conflicted");
        Ok(MergeResult::Conflicted(conflicts))
    }

    /// Paths with unmerged index entries.
    pub fn unmerged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Resolve `path` with the incoming side of the merge and stage it.
    ///
    /// If the incoming side deleted the file, the deletion is staged.
    pub fn take_theirs(&self, path: &str) -> Result<()> {
        let checkout = self.run(&["checkout", "--theirs", "--", path])?;
        if checkout.status.success() {
            self.run_checked(&["add", "--", path])?;
        } else {
            debug!(path, "no incoming version, staging removal");
            self.run_checked(&["rm", "--quiet", "--", path])?;
        }
        Ok(())
    }

    /// Abort an in-progress merge. No-op when no merge is in progress.
    pub fn merge_abort(&self) -> Result<()> {
        if !self.workdir.join(".git").join("MERGE_HEAD").exists() {
            return Ok(());
        }
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    /// Conclude an in-progress merge with the default message.
    pub fn commit_merge(&self) -> Result<()> {
        self.run_checked(&["commit", "--no-edit"])?;
        Ok(())
    }

    /// Tracked files in the working tree that still contain conflict markers.
    pub fn files_with_conflict_markers(&self) -> Result<Vec<String>> {
        let output = self.run(&["grep", "-l", "-E", "-e", "^(<<<<<<<|>>>>>>>)( |$)"])?;
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::to_string)
                .collect()),
            Some(1) => Ok(Vec::new()),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(anyhow!("git grep for conflict markers failed: {}", stderr.trim()))
            }
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
