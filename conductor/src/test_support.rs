//! Test doubles and fixture repositories.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! integration tests in `tests/`.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{MergeReadiness, Mergeability, PrState, PrStatus};
use crate::io::agent::{Agent, AgentRequest, AgentTranscript};
use crate::io::clock::Clock;
use crate::io::config::HealthCheck;
use crate::io::git::Git;
use crate::io::infra_backend::InfraBackend;
use crate::io::layout::PlanningPaths;
use crate::io::platform::{PrRequest, ReviewPlatform};

const SUCCESS: &str = "TASK_COMPLETE";

/// A real git repository on `main` with a bare `origin` remote, in a temp dir.
pub struct TestRepo {
    temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let root = temp.path().join("work");
        let origin = temp.path().join("origin.git");
        fs::create_dir_all(&root).context("create work dir")?;

        git_in(temp.path(), &["init", "--bare", "-b", "main", "origin.git"])?;
        git_in(&root, &["init", "-b", "main"])?;
        git_in(&root, &["config", "user.email", "conductor@example.com"])?;
        git_in(&root, &["config", "user.name", "Conductor Tests"])?;
        git_in(&root, &["config", "commit.gpgsign", "false"])?;
        let origin_url = origin.display().to_string();
        git_in(&root, &["remote", "add", "origin", &origin_url])?;

        let repo = Self { temp, root };
        repo.commit_file("README.md", "# fixture\n", "initial commit")?;
        repo.run_git(&["push", "-u", "origin", "main"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }

    pub fn paths(&self) -> PlanningPaths {
        PlanningPaths::new(&self.root)
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read_file(&self, rel: &str) -> Result<String> {
        let path = self.root.join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<()> {
        self.write_file(rel, contents)?;
        self.run_git(&["add", "--", rel])?;
        self.run_git(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    /// Stage and commit everything in the work tree.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.run_git(&["add", "-A"])?;
        self.run_git(&["commit", "-q", "-m", message])?;
        Ok(())
    }

    /// Write `.planning/phases/<dir>/<file>`.
    pub fn write_planning(&self, dir: &str, file: &str, contents: &str) -> Result<()> {
        self.write_file(&format!(".planning/phases/{dir}/{file}"), contents)
    }

    pub fn run_git(&self, args: &[&str]) -> Result<String> {
        git_in(&self.root, args)
    }

    /// Commit `contents` to `rel` directly on origin's `branch` through a scratch clone.
    pub fn commit_on_origin(&self, branch: &str, rel: &str, contents: &str) -> Result<()> {
        let scratch = self.temp.path().join("scratch");
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        let origin_url = self.temp.path().join("origin.git").display().to_string();
        let scratch_str = scratch.display().to_string();
        git_in(
            self.temp.path(),
            &["clone", "-q", "-b", branch, &origin_url, &scratch_str],
        )?;
        git_in(&scratch, &["config", "user.email", "other@example.com"])?;
        git_in(&scratch, &["config", "user.name", "Other Dev"])?;
        git_in(&scratch, &["config", "commit.gpgsign", "false"])?;
        let path = scratch.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        git_in(&scratch, &["add", "--", rel])?;
        git_in(&scratch, &["commit", "-q", "-m", "upstream change"])?;
        git_in(&scratch, &["push", "-q", "origin", branch])?;
        Ok(())
    }
}

fn git_in(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// One scripted agent session: may touch the repo, returns the transcript stdout.
pub type AgentStep = Box<dyn FnOnce(&AgentRequest) -> Result<String> + Send>;

/// Agent double. Queued steps run first; once the queue is empty a
/// cooperative agent completes whatever it is asked to do.
pub struct ScriptedAgent {
    steps: Mutex<VecDeque<AgentStep>>,
    cooperative: bool,
    calls: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    /// Completes every task, writes summaries and repairs conflicts.
    pub fn cooperative() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            cooperative: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Only runs queued steps; errors when they run out.
    pub fn strict() -> Self {
        Self {
            cooperative: false,
            ..Self::cooperative()
        }
    }

    pub fn push(&self, step: impl FnOnce(&AgentRequest) -> Result<String> + Send + 'static) {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Box::new(step));
    }

    /// Queue a session that only prints `stdout`.
    pub fn push_reply(&self, stdout: &str) {
        let stdout = stdout.to_string();
        self.push(move |_| Ok(stdout));
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|req| req.label.clone())
            .collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|req| req.prompt.clone())
            .collect()
    }
}

impl Agent for ScriptedAgent {
    fn run(&self, request: &AgentRequest) -> Result<AgentTranscript> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let step = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let stdout = match step {
            Some(step) => step(request)?,
            None if self.cooperative => cooperative_session(request)?,
            None => return Err(anyhow!("no scripted session left for {}", request.label)),
        };
        Ok(AgentTranscript {
            stdout,
            exit_code: Some(0),
            timed_out: false,
        })
    }
}

/// What a well-behaved agent does for each kind of session.
fn cooperative_session(request: &AgentRequest) -> Result<String> {
    if request.label.ends_with("-summary") {
        write_summary(request)?;
    } else if request.label.starts_with("conflict-") {
        strip_markers_in_prompt_files(request)?;
    } else {
        commit_work(request, &format!("work/{}.txt", request.label))?;
    }
    Ok(format!("done\n{SUCCESS}\n"))
}

/// Write the summary file named in a summary prompt.
fn write_summary(request: &AgentRequest) -> Result<()> {
    let rel = backticked_after(&request.prompt, "Write the summary to ")
        .ok_or_else(|| anyhow!("summary prompt without path"))?;
    let path = request.workdir.join(rel);
    fs::write(&path, "# Summary\n\nAll tasks complete.\n")
        .with_context(|| format!("write {}", path.display()))
}

/// Create and commit a file, the way an agent finishing a task would.
pub fn commit_work(request: &AgentRequest, rel: &str) -> Result<()> {
    let path = request.workdir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, format!("{}\n", request.label))?;
    let git = Git::new(&request.workdir);
    git.add_paths(&[rel.to_string()])?;
    git.commit_staged(&format!("feat({}): work", request.label))?;
    Ok(())
}

/// Keep both sides of every conflict in the files a repair prompt lists.
fn strip_markers_in_prompt_files(request: &AgentRequest) -> Result<()> {
    for rel in prompt_file_list(&request.prompt) {
        let path = request.workdir.join(&rel);
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let kept: Vec<&str> = text
            .lines()
            .filter(|line| {
                !(line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>"))
            })
            .collect();
        fs::write(&path, format!("{}\n", kept.join("\n")))?;
    }
    Ok(())
}

/// Files listed in the `<files>` block of a prompt.
fn prompt_file_list(prompt: &str) -> Vec<String> {
    let Some(start) = prompt.find("<files>") else {
        return Vec::new();
    };
    let rest = &prompt[start + "<files>".len()..];
    let end = rest.find("</files>").unwrap_or(rest.len());
    rest[..end]
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(str::to_string)
        .collect()
}

fn backticked_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = text[start..].strip_prefix('`')?;
    let end = rest.find('`')?;
    Some(&rest[..end])
}

#[derive(Default)]
struct PlatformState {
    next_number: u64,
    existing: HashMap<String, u64>,
    created: Vec<PrRequest>,
    statuses: VecDeque<PrStatus>,
    merge_failures: VecDeque<(String, PrState)>,
    pending_state: Option<PrState>,
    merged: Vec<u64>,
    merge_calls: u32,
    status_calls: u32,
    state_calls: u32,
}

/// Review platform double with a scripted status sequence.
///
/// The last queued status repeats; with none queued PRs report ready and clean.
pub struct ScriptedPlatform {
    state: Mutex<PlatformState>,
}

impl Default for ScriptedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlatformState {
                next_number: 100,
                ..PlatformState::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut PlatformState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = PrStatus>) {
        self.with(|s| s.statuses.extend(statuses));
    }

    pub fn set_existing(&self, head: &str, pr: u64) {
        self.with(|s| {
            s.existing.insert(head.to_string(), pr);
        });
    }

    /// Make the next merge call fail; a later state query reports `state_after`.
    pub fn fail_next_merge(&self, message: &str, state_after: PrState) {
        self.with(|s| s.merge_failures.push_back((message.to_string(), state_after)));
    }

    pub fn created(&self) -> Vec<PrRequest> {
        self.with(|s| s.created.clone())
    }

    pub fn merged(&self) -> Vec<u64> {
        self.with(|s| s.merged.clone())
    }

    pub fn merge_calls(&self) -> u32 {
        self.with(|s| s.merge_calls)
    }

    pub fn status_calls(&self) -> u32 {
        self.with(|s| s.status_calls)
    }

    pub fn state_calls(&self) -> u32 {
        self.with(|s| s.state_calls)
    }
}

impl ReviewPlatform for ScriptedPlatform {
    fn find_open(&self, head: &str) -> Result<Option<u64>> {
        Ok(self.with(|s| s.existing.get(head).copied()))
    }

    fn create(&self, request: &PrRequest) -> Result<u64> {
        Ok(self.with(|s| {
            s.created.push(request.clone());
            let number = s.next_number;
            s.next_number += 1;
            number
        }))
    }

    fn status(&self, _pr: u64) -> Result<PrStatus> {
        Ok(self.with(|s| {
            s.status_calls += 1;
            let status = if s.statuses.len() > 1 {
                s.statuses.pop_front()
            } else {
                s.statuses.front().copied()
            };
            status.unwrap_or(PrStatus {
                mergeability: Mergeability::Ready,
                readiness: MergeReadiness::Clean,
            })
        }))
    }

    fn merge(&self, pr: u64, _method: &str) -> Result<()> {
        self.with(|s| {
            s.merge_calls += 1;
            match s.merge_failures.pop_front() {
                Some((message, state_after)) => {
                    s.pending_state = Some(state_after);
                    if state_after == PrState::Merged {
                        s.merged.push(pr);
                    }
                    Err(anyhow!(message))
                }
                None => {
                    s.merged.push(pr);
                    Ok(())
                }
            }
        })
    }

    fn state(&self, pr: u64) -> Result<PrState> {
        Ok(self.with(|s| {
            s.state_calls += 1;
            if let Some(state) = s.pending_state.take() {
                return state;
            }
            if s.merged.contains(&pr) {
                PrState::Merged
            } else {
                PrState::Open
            }
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfraMode {
    Ready,
    NeverReady,
    FailingStart,
}

/// Infra backend double that counts lifecycle calls.
#[derive(Debug)]
pub struct RecordingInfra {
    mode: InfraMode,
    clears: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    health_calls: AtomicU32,
    namespaces: Mutex<Vec<String>>,
}

impl RecordingInfra {
    fn with_mode(mode: InfraMode) -> Self {
        Self {
            mode,
            clears: AtomicU32::new(0),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            health_calls: AtomicU32::new(0),
            namespaces: Mutex::new(Vec::new()),
        }
    }

    pub fn ready() -> Self {
        Self::with_mode(InfraMode::Ready)
    }

    pub fn never_ready() -> Self {
        Self::with_mode(InfraMode::NeverReady)
    }

    pub fn failing_start() -> Self {
        Self::with_mode(InfraMode::FailingStart)
    }

    pub fn clears(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> u32 {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl InfraBackend for RecordingInfra {
    fn clear(&self, _namespace: &str) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self, namespace: &str) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.namespaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(namespace.to_string());
        if self.mode == InfraMode::FailingStart {
            return Err(anyhow!("compose up failed"));
        }
        Ok(())
    }

    fn health(&self, _namespace: &str, _check: &HealthCheck) -> Result<bool> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.mode == InfraMode::Ready)
    }

    fn stop(&self, _namespace: &str) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Clock that advances only when slept on.
#[derive(Debug)]
pub struct FakeClock {
    start: Instant,
    elapsed: Mutex<Duration>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    pub fn total_slept(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.total_slept()
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner()) += duration;
    }
}
