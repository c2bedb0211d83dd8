//! Orchestrator configuration stored at `.planning/conductor.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::sentinel::Sentinels;

/// Orchestrator configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that work
/// with the `claude` CLI, `gh`, and a docker compose test stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Trunk branch that plan branches are based on and merged into.
    pub trunk: String,
    /// Remote that branches are pushed to.
    pub remote: String,
    /// Prefix for every branch the orchestrator creates.
    pub branch_prefix: String,
    /// Maximum length of the objective slug in plan branch names.
    pub slug_max_len: usize,

    pub agent: AgentConfig,
    pub pr: PrConfig,
    pub conflicts: ConflictConfig,
    pub infra: InfraConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that starts a fresh agent session; the prompt is written to stdin.
    pub command: Vec<String>,
    /// Wall-clock budget for one session.
    pub timeout_secs: u64,
    /// Bytes of session output kept in memory and in the session log.
    pub output_limit_bytes: usize,
    pub success_sentinel: String,
    pub failure_sentinel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrConfig {
    pub poll_interval_secs: u64,
    /// Total polling budget before giving up on a merge.
    pub merge_timeout_secs: u64,
    /// Delay before re-checking state after a failed merge command.
    pub merge_recheck_delay_secs: u64,
    /// `squash`, `merge`, or `rebase`.
    pub merge_method: String,
    /// Maximum characters of the objective used in PR titles.
    pub title_max_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConflictConfig {
    /// Optional build command run after agent-assisted repair (e.g. `["cargo","check"]`).
    pub build_command: Vec<String>,
    pub build_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InfraConfig {
    /// Verify-command fragments that mark a task as infra-dependent.
    pub signatures: Vec<String>,
    /// Removes leftovers from an earlier run with the same namespace.
    pub clear_command: Vec<String>,
    pub start_command: Vec<String>,
    pub stop_command: Vec<String>,
    pub health_attempts: u32,
    pub health_interval_secs: u64,
    pub command_timeout_secs: u64,
    /// Each check is a command that exits 0 once its service is ready.
    pub health_checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    pub name: String,
    pub command: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            trunk: "main".to_string(),
            remote: "origin".to_string(),
            branch_prefix: "plan".to_string(),
            slug_max_len: 40,
            agent: AgentConfig::default(),
            pr: PrConfig::default(),
            conflicts: ConflictConfig::default(),
            infra: InfraConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: strings(&["claude", "-p", "--dangerously-skip-permissions"]),
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
            success_sentinel: "TASK_COMPLETE".to_string(),
            failure_sentinel: "TASK_FAILED".to_string(),
        }
    }
}

impl Default for PrConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            merge_timeout_secs: 30 * 60,
            merge_recheck_delay_secs: 5,
            merge_method: "squash".to_string(),
            title_max_len: 72,
        }
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            build_command: Vec::new(),
            build_timeout_secs: 15 * 60,
        }
    }
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            signatures: strings(&["playwright", "cypress run", "test:e2e", "test:integration"]),
            clear_command: strings(&[
                "docker",
                "compose",
                "-p",
                "{namespace}",
                "down",
                "-v",
                "--remove-orphans",
            ]),
            start_command: strings(&["docker", "compose", "-p", "{namespace}", "up", "-d"]),
            stop_command: strings(&["docker", "compose", "-p", "{namespace}", "down", "-v"]),
            health_attempts: 30,
            health_interval_secs: 2,
            command_timeout_secs: 5 * 60,
            health_checks: vec![
                HealthCheck {
                    name: "api".to_string(),
                    command: strings(&["curl", "-sf", "http://localhost:8080/health"]),
                },
                HealthCheck {
                    name: "web".to_string(),
                    command: strings(&["curl", "-sf", "http://localhost:3000"]),
                },
            ],
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trunk.trim().is_empty() {
            return Err(anyhow!("trunk must not be empty"));
        }
        if self.slug_max_len == 0 {
            return Err(anyhow!("slug_max_len must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.success_sentinel.trim().is_empty()
            || self.agent.failure_sentinel.trim().is_empty()
        {
            return Err(anyhow!("agent sentinels must not be empty"));
        }
        if self.agent.success_sentinel == self.agent.failure_sentinel {
            return Err(anyhow!("agent success and failure sentinels must differ"));
        }
        if !matches!(self.pr.merge_method.as_str(), "squash" | "merge" | "rebase") {
            return Err(anyhow!(
                "pr.merge_method must be squash, merge, or rebase (got '{}')",
                self.pr.merge_method
            ));
        }
        if self.infra.start_command.is_empty() || self.infra.stop_command.is_empty() {
            return Err(anyhow!("infra.start_command and infra.stop_command must be set"));
        }
        Ok(())
    }

    pub fn sentinels(&self) -> Sentinels {
        Sentinels {
            success: self.agent.success_sentinel.clone(),
            failure: self.agent.failure_sentinel.clone(),
        }
    }
}

impl PrConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }

    pub fn recheck_delay(&self) -> Duration {
        Duration::from_secs(self.merge_recheck_delay_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
