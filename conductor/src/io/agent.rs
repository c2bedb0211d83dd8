//! Execution agent abstraction.
//!
//! The [`Agent`] trait decouples dispatch from the agent backend (a CLI that
//! reads its prompt on stdin). Tests use scripted agents that return canned
//! transcripts and apply file changes without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, CommandRequest, command_from_argv, run_command};

/// One fresh agent session.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    /// Unit label for logs (e.g. `03-02-task-1`).
    pub label: String,
    pub prompt: String,
    /// Where the session transcript is written once the session ends.
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// What the session printed, plus how it ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentTranscript {
    pub stdout: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Abstraction over agent backends. One call is one isolated session.
pub trait Agent {
    fn run(&self, request: &AgentRequest) -> Result<AgentTranscript>;
}

/// Agent that spawns a configured command and writes the prompt to its stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(label = %request.label, timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &AgentRequest) -> Result<AgentTranscript> {
        info!(workdir = %request.workdir.display(), "starting agent session");
        let cmd = command_from_argv(&self.command, &[], &request.workdir)
            .context("build agent command")?;
        let command_request = CommandRequest {
            stdin: Some(request.prompt.as_bytes()),
            tee_path: Some(stream_path(&request.log_path)),
            ..CommandRequest::new(request.timeout, request.output_limit_bytes)
        };
        let output = run_command(cmd, &command_request)
            .with_context(|| format!("run agent for {}", request.label))?;

        write_session_log(&request.log_path, &output, request.output_limit_bytes)?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "agent session timed out"
            );
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited non-zero");
        } else {
            debug!("agent session finished");
        }

        Ok(AgentTranscript {
            stdout: output.stdout_text(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}

/// Live stdout stream written while the session runs (`<log>.stream`).
pub fn stream_path(log_path: &Path) -> PathBuf {
    let mut name = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".stream");
    log_path.with_file_name(name)
}

/// Write the session transcript, capped at `output_limit` bytes.
pub fn write_session_log(path: &Path, output: &CommandOutput, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create session log dir {}", parent.display()))?;
    }
    let buf = output.render_log("agent");
    let contents = if buf.len() > output_limit {
        let mut cut = output_limit;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut)
    } else {
        buf
    };
    fs::write(path, contents).with_context(|| format!("write session log {}", path.display()))
}
