//! Test infrastructure provisioning commands.
//!
//! The backend only knows how to run the configured start/health/stop
//! commands for a namespace. Session bookkeeping lives in `crate::infra`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::config::{HealthCheck, InfraConfig};
use crate::io::process::{CommandRequest, command_from_argv, run_command};

const INFRA_OUTPUT_LIMIT: usize = 64 * 1024;

/// Provisioning backend. Must be shareable with the Ctrl-C handler thread.
pub trait InfraBackend: Send + Sync {
    /// Remove leftovers from an earlier run in the same namespace.
    fn clear(&self, namespace: &str) -> Result<()>;
    fn start(&self, namespace: &str) -> Result<()>;
    /// True once the checked service reports ready.
    fn health(&self, namespace: &str, check: &HealthCheck) -> Result<bool>;
    fn stop(&self, namespace: &str) -> Result<()>;
}

/// Backend that runs the command templates from [`InfraConfig`].
#[derive(Debug, Clone)]
pub struct CommandInfra {
    config: InfraConfig,
    workdir: PathBuf,
}

impl CommandInfra {
    pub fn new(config: InfraConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workdir: workdir.into(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    fn run_template(&self, what: &str, argv: &[String], namespace: &str) -> Result<()> {
        if argv.is_empty() {
            debug!(what, "no command configured");
            return Ok(());
        }
        let cmd = command_from_argv(argv, &[("namespace", namespace)], &self.workdir)
            .with_context(|| format!("build infra {what} command"))?;
        let output = run_command(cmd, &CommandRequest::new(self.timeout(), INFRA_OUTPUT_LIMIT))
            .with_context(|| format!("run infra {what} command"))?;
        if !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "infra {what} failed (exit {:?}{}): {}",
                output.status.code(),
                if output.timed_out { ", timed out" } else { "" },
                stderr.trim()
            ));
        }
        Ok(())
    }
}

impl InfraBackend for CommandInfra {
    #[instrument(skip_all, fields(namespace))]
    fn clear(&self, namespace: &str) -> Result<()> {
        self.run_template("clear", &self.config.clear_command, namespace)
    }

    #[instrument(skip_all, fields(namespace))]
    fn start(&self, namespace: &str) -> Result<()> {
        self.run_template("start", &self.config.start_command, namespace)
    }

    fn health(&self, namespace: &str, check: &HealthCheck) -> Result<bool> {
        let cmd = command_from_argv(&check.command, &[("namespace", namespace)], &self.workdir)
            .with_context(|| format!("build health check '{}'", check.name))?;
        let output = run_command(cmd, &CommandRequest::new(self.timeout(), INFRA_OUTPUT_LIMIT))
            .with_context(|| format!("run health check '{}'", check.name))?;
        if !output.success() {
            debug!(service = %check.name, exit_code = ?output.status.code(), "not ready");
        }
        Ok(output.success())
    }

    #[instrument(skip_all, fields(namespace))]
    fn stop(&self, namespace: &str) -> Result<()> {
        let result = self.run_template("stop", &self.config.stop_command, namespace);
        if let Err(err) = &result {
            warn!(err = %err, "infra stop failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn templates_receive_namespace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = InfraConfig {
            clear_command: Vec::new(),
            start_command: sh("echo {namespace} > started"),
            stop_command: sh("rm started"),
            ..InfraConfig::default()
        };
        let infra = CommandInfra::new(config, temp.path());
        infra.clear("ns-1").expect("clear is a no-op");
        infra.start("ns-1").expect("start");
        let started = std::fs::read_to_string(temp.path().join("started")).expect("read");
        assert_eq!(started.trim(), "ns-1");
        infra.stop("ns-1").expect("stop");
        assert!(!temp.path().join("started").exists());
    }

    #[test]
    fn health_reports_exit_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let infra = CommandInfra::new(InfraConfig::default(), temp.path());
        let ready = HealthCheck {
            name: "ok".to_string(),
            command: vec!["true".to_string()],
        };
        let down = HealthCheck {
            name: "down".to_string(),
            command: vec!["false".to_string()],
        };
        assert!(infra.health("ns", &ready).expect("health"));
        assert!(!infra.health("ns", &down).expect("health"));
    }

    #[test]
    fn failing_start_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = InfraConfig {
            start_command: sh("echo boom >&2; exit 1"),
            ..InfraConfig::default()
        };
        let err = CommandInfra::new(config, temp.path())
            .start("ns")
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
