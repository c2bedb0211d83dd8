//! Code-review platform adapter.
//!
//! [`ReviewPlatform`] covers the four calls the PR lifecycle needs. The
//! production implementation shells out to the `gh` CLI and parses its JSON
//! output; tests script responses in memory.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::types::{MergeReadiness, Mergeability, PrState, PrStatus};
use crate::io::process::{CommandRequest, run_command};

const GH_TIMEOUT: Duration = Duration::from_secs(120);
const GH_OUTPUT_LIMIT: usize = 256 * 1024;

/// Parameters for opening a change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

pub trait ReviewPlatform {
    /// Number of an open PR whose head is `head`, if any.
    fn find_open(&self, head: &str) -> Result<Option<u64>>;
    fn create(&self, request: &PrRequest) -> Result<u64>;
    fn status(&self, pr: u64) -> Result<PrStatus>;
    /// Merge with `method` (`squash`, `merge` or `rebase`). Errors when the platform refuses.
    fn merge(&self, pr: u64, method: &str) -> Result<()>;
    fn state(&self, pr: u64) -> Result<PrState>;
}

/// `gh` CLI backed platform, run from the repository root.
#[derive(Debug, Clone)]
pub struct GhPlatform {
    workdir: PathBuf,
}

impl GhPlatform {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn gh(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        let mut cmd = Command::new("gh");
        cmd.args(args).current_dir(&self.workdir);
        let request = CommandRequest {
            stdin,
            ..CommandRequest::new(GH_TIMEOUT, GH_OUTPUT_LIMIT)
        };
        let output =
            run_command(cmd, &request).with_context(|| format!("spawn gh {}", args.join(" ")))?;
        if !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("gh {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output.stdout_text())
    }
}

impl ReviewPlatform for GhPlatform {
    #[instrument(skip_all, fields(head))]
    fn find_open(&self, head: &str) -> Result<Option<u64>> {
        let out = self.gh(
            &["pr", "list", "--head", head, "--state", "open", "--json", "number"],
            None,
        )?;
        let rows: Vec<NumberRow> = serde_json::from_str(&out).context("parse gh pr list")?;
        Ok(rows.first().map(|row| row.number))
    }

    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create(&self, request: &PrRequest) -> Result<u64> {
        let out = self.gh(
            &[
                "pr",
                "create",
                "--head",
                &request.head,
                "--base",
                &request.base,
                "--title",
                &request.title,
                "--body-file",
                "-",
            ],
            Some(request.body.as_bytes()),
        )?;
        let number = parse_pr_number(&out)?;
        debug!(pr = number, "created PR");
        Ok(number)
    }

    #[instrument(skip_all, fields(pr))]
    fn status(&self, pr: u64) -> Result<PrStatus> {
        let out = self.gh(
            &[
                "pr",
                "view",
                &pr.to_string(),
                "--json",
                "mergeable,mergeStateStatus",
            ],
            None,
        )?;
        parse_status_json(&out)
    }

    #[instrument(skip_all, fields(pr, method))]
    fn merge(&self, pr: u64, method: &str) -> Result<()> {
        let flag = format!("--{method}");
        self.gh(&["pr", "merge", &pr.to_string(), &flag], None)?;
        Ok(())
    }

    #[instrument(skip_all, fields(pr))]
    fn state(&self, pr: u64) -> Result<PrState> {
        let out = self.gh(&["pr", "view", &pr.to_string(), "--json", "state"], None)?;
        parse_state_json(&out)
    }
}

#[derive(Debug, Deserialize)]
struct NumberRow {
    number: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    #[serde(default)]
    mergeable: String,
    #[serde(default)]
    merge_state_status: String,
}

#[derive(Debug, Deserialize)]
struct StateView {
    state: String,
}

/// Extract the PR number from `gh pr create` output (the PR URL).
pub fn parse_pr_number(output: &str) -> Result<u64> {
    let url = output
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| line.contains("/pull/"))
        .ok_or_else(|| anyhow!("no PR URL in gh output: {}", output.trim()))?;
    let tail = url
        .rsplit("/pull/")
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    tail.parse()
        .with_context(|| format!("parse PR number from '{url}'"))
}

/// Map `gh pr view --json mergeable,mergeStateStatus` output onto [`PrStatus`].
pub fn parse_status_json(json: &str) -> Result<PrStatus> {
    let view: StatusView = serde_json::from_str(json).context("parse gh pr view status")?;
    let mergeability = match view.mergeable.as_str() {
        "MERGEABLE" => Mergeability::Ready,
        "CONFLICTING" => Mergeability::Conflicting,
        _ => Mergeability::Indeterminate,
    };
    let readiness = match view.merge_state_status.as_str() {
        "CLEAN" => MergeReadiness::Clean,
        "UNSTABLE" | "HAS_HOOKS" => MergeReadiness::Degraded,
        other => {
            if !matches!(other, "BLOCKED" | "BEHIND" | "DIRTY" | "DRAFT" | "UNKNOWN") {
                warn!(status = other, "unrecognized merge state status");
            }
            MergeReadiness::Blocked
        }
    };
    Ok(PrStatus {
        mergeability,
        readiness,
    })
}

pub fn parse_state_json(json: &str) -> Result<PrState> {
    let view: StateView = serde_json::from_str(json).context("parse gh pr view state")?;
    match view.state.as_str() {
        "OPEN" => Ok(PrState::Open),
        "MERGED" => Ok(PrState::Merged),
        "CLOSED" => Ok(PrState::Closed),
        other => Err(anyhow!("unknown PR state '{other}'")),
    }
}
