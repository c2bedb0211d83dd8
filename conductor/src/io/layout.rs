//! `.planning/` directory layout and plan file discovery.
//!
//! ```text
//! .planning/
//!   ROADMAP.md
//!   conductor.toml
//!   phases/03-auth/03-01-PLAN.md
//!   phases/03-auth/03-01-SUMMARY.md
//!   logs/            (git-ignored session transcripts)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::core::ids::ItemId;
use crate::core::plan_record::{PlanRecord, parse_plan};
use crate::core::roadmap::milestone_phases;
use crate::error::ConductorError;

static UNIT_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)*)-(\d+(?:\.\d+)*)-(PLAN|SUMMARY)\.md$").expect("unit file regex")
});

const LOGS_GITIGNORE: &str = "*\n";

/// Absolute paths for everything the orchestrator reads or writes.
#[derive(Debug, Clone)]
pub struct PlanningPaths {
    pub root: PathBuf,
    pub planning_dir: PathBuf,
    pub phases_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub roadmap_path: PathBuf,
    pub config_path: PathBuf,
}

impl PlanningPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let planning_dir = root.join(".planning");
        Self {
            root: root.clone(),
            phases_dir: planning_dir.join("phases"),
            logs_dir: planning_dir.join("logs"),
            roadmap_path: planning_dir.join("ROADMAP.md"),
            config_path: planning_dir.join("conductor.toml"),
            planning_dir,
        }
    }

    /// Path of a session log for `label` (e.g. `03-02-task-1`).
    pub fn session_log(&self, label: &str) -> PathBuf {
        self.logs_dir.join(format!("{label}.log"))
    }
}

/// A phase directory such as `.planning/phases/03-auth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDir {
    pub id: ItemId,
    pub name: String,
    pub path: PathBuf,
}

/// A `<phase>-<plan>-PLAN.md` or `-SUMMARY.md` file inside a phase directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    pub phase: ItemId,
    pub plan: ItemId,
    pub path: PathBuf,
}

impl UnitFile {
    /// `03-02` style label used in branch names, logs and commit messages.
    pub fn label(&self) -> String {
        format!("{}-{}", self.phase.as_str(), self.plan.as_str())
    }
}

/// Phase directories sorted by id. A missing phases dir yields an empty list.
pub fn list_phase_dirs(phases_dir: &Path) -> Result<Vec<PhaseDir>> {
    if !phases_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in
        fs::read_dir(phases_dir).with_context(|| format!("read {}", phases_dir.display()))?
    {
        let entry = entry.with_context(|| format!("read entry in {}", phases_dir.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(id) = ItemId::from_prefix(&name) {
            dirs.push(PhaseDir { id, name, path });
        }
    }
    dirs.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));
    Ok(dirs)
}

/// Plan definition files in a phase directory, sorted by plan id.
pub fn list_plan_files(phase_dir: &Path) -> Result<Vec<UnitFile>> {
    list_unit_files(phase_dir, "PLAN")
}

/// Completion artifacts in a phase directory, sorted by plan id.
pub fn list_summary_files(phase_dir: &Path) -> Result<Vec<UnitFile>> {
    list_unit_files(phase_dir, "SUMMARY")
}

fn list_unit_files(phase_dir: &Path, kind: &str) -> Result<Vec<UnitFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(phase_dir).with_context(|| format!("read {}", phase_dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", phase_dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(caps) = UNIT_FILE_RE.captures(&name) else {
            continue;
        };
        if &caps[3] != kind {
            continue;
        }
        let (Some(phase), Some(plan)) = (ItemId::parse(&caps[1]), ItemId::parse(&caps[2])) else {
            continue;
        };
        files.push(UnitFile {
            phase,
            plan,
            path: entry.path(),
        });
    }
    files.sort_by(|a, b| a.plan.cmp(&b.plan));
    Ok(files)
}

/// Companion completion artifact for a plan file.
pub fn summary_path(plan_path: &Path) -> PathBuf {
    let name = plan_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let summary = match name.strip_suffix("-PLAN.md") {
        Some(stem) => format!("{stem}-SUMMARY.md"),
        None => format!("{name}-SUMMARY.md"),
    };
    plan_path.with_file_name(summary)
}

/// Read and parse a plan definition.
pub fn read_plan(path: &Path) -> Result<PlanRecord> {
    let text = fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let record = parse_plan(&text);
    debug!(
        plan = %path.display(),
        tasks = record.tasks.len(),
        files = record.files.len(),
        "parsed plan"
    );
    Ok(record)
}

/// Phase ids of a milestone, read from the roadmap.
pub fn read_milestone_phases(paths: &PlanningPaths, version: &str) -> Result<Vec<ItemId>> {
    let text = fs::read_to_string(&paths.roadmap_path)
        .with_context(|| format!("read roadmap {}", paths.roadmap_path.display()))?;
    milestone_phases(&text, version).ok_or_else(|| {
        ConductorError::Resolution {
            kind: "milestone",
            id: version.to_string(),
            searched: paths.roadmap_path.clone(),
        }
        .into()
    })
}

/// Create the logs dir with a `.gitignore` that ignores everything in it.
pub fn ensure_logs_dir(paths: &PlanningPaths) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("create directory {}", paths.logs_dir.display()))?;
    let gitignore = paths.logs_dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, LOGS_GITIGNORE)
            .with_context(|| format!("write file {}", gitignore.display()))?;
    }
    Ok(())
}
