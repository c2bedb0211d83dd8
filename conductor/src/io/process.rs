//! Helpers for running child processes with timeouts and bounded output.

use std::fs::File;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How to run one child process.
#[derive(Debug, Clone)]
pub struct CommandRequest<'a> {
    pub stdin: Option<&'a [u8]>,
    pub timeout: Duration,
    /// Trailing bytes of stdout/stderr kept in memory; earlier output is
    /// drained and counted.
    pub output_limit_bytes: usize,
    /// When set, stdout lines are also written here as they arrive.
    pub tee_path: Option<PathBuf>,
}

impl<'a> CommandRequest<'a> {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            stdin: None,
            timeout,
            output_limit_bytes,
            tee_path: None,
        }
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Render stdout and stderr as a session log, noting truncation and timeouts.
    pub fn render_log(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout: {} earlier bytes dropped]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr: {} earlier bytes dropped]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        buf
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read on separate threads while the child runs. A child that
/// outlives `request.timeout` is killed and reported with `timed_out = true`.
#[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), tee = request.tee_path.is_some()))]
pub fn run_command(mut cmd: Command, request: &CommandRequest<'_>) -> Result<CommandOutput> {
    if request.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let tee = match &request.tee_path {
        Some(path) => Some(create_tee(path)?),
        None => None,
    };

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = request.stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping stdin closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = request.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_lines_limited(stdout, limit, tee));
    let stderr_handle = thread::spawn(move || read_lines_limited(stderr, limit, None));

    let mut timed_out = false;
    let status = match child.wait_timeout(request.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Build a `Command` from an argv vector, replacing `{placeholder}` tokens.
pub fn command_from_argv(
    argv: &[String],
    replacements: &[(&str, &str)],
    workdir: &Path,
) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must not be empty"))?;
    let expand = |arg: &String| {
        replacements.iter().fold(arg.clone(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
    };
    let mut cmd = Command::new(expand(program));
    cmd.args(args.iter().map(expand)).current_dir(workdir);
    Ok(cmd)
}

fn create_tee(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create tee dir {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create tee file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line, keeping the last `limit` bytes and optionally
/// tee-ing every line to a file (flushed per line for live observability).
///
/// Sentinels and error summaries come at the end of a session, so the tail
/// is what survives truncation.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    mut tee: Option<BufWriter<File>>,
) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut collected: VecDeque<u8> = VecDeque::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read output")?;
        if n == 0 {
            break;
        }

        if let Some(writer) = tee.as_mut() {
            if let Err(e) = writer.write_all(&line).and_then(|_| writer.flush()) {
                warn!(err = %e, "failed to write tee file; disabling tee");
                tee = None;
            }
        }

        collected.extend(&line);
        let excess = collected.len().saturating_sub(limit);
        collected.drain(..excess);
        truncated += excess;
    }

    Ok((collected.into(), truncated))
}
