//! Work item resolution: identifiers and paths to phases and plans on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::ids::ItemId;
use crate::core::plan_record::PlanRecord;
use crate::core::types::Completion;
use crate::error::ConductorError;
use crate::io::layout::{
    PlanningPaths, UnitFile, list_phase_dirs, list_plan_files, list_summary_files, read_plan,
    read_milestone_phases, summary_path,
};

/// Integer digits used by phase and plan directory names.
const ID_WIDTH: usize = 2;

/// A resolved phase directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub id: ItemId,
    pub name: String,
    pub dir: PathBuf,
}

/// A resolved plan with its definition parsed once.
#[derive(Debug, Clone)]
pub struct Plan {
    pub phase: ItemId,
    pub id: ItemId,
    pub path: PathBuf,
    pub summary_path: PathBuf,
    pub record: PlanRecord,
}

impl Plan {
    fn load(file: UnitFile) -> Result<Self> {
        let record = read_plan(&file.path)?;
        Ok(Self {
            summary_path: summary_path(&file.path),
            phase: file.phase,
            id: file.plan,
            path: file.path,
            record,
        })
    }

    /// `03-02` style label.
    pub fn label(&self) -> String {
        format!("{}-{}", self.phase.as_str(), self.id.as_str())
    }

    /// A plan is complete once its summary artifact exists.
    pub fn is_complete(&self) -> bool {
        self.summary_path.exists()
    }
}

/// A roadmap phase and its directory, if the phase has been created yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestonePhase {
    pub id: ItemId,
    pub phase: Option<Phase>,
}

/// Resolve a phase from a bare, zero-padded or decimal id, or a directory path.
///
/// An id that matches no directory is retried zero-padded (`3` → `03`,
/// `2.1` → `02.1`) before failing.
pub fn resolve_phase(paths: &PlanningPaths, id_or_path: &str) -> Result<Phase> {
    let raw = id_or_path.trim();
    if let Some(phase) = phase_from_path(paths, raw) {
        debug!(phase = %phase.id, dir = %phase.dir.display(), "resolved phase from path");
        return Ok(phase);
    }

    let not_found = || ConductorError::Resolution {
        kind: "phase",
        id: raw.to_string(),
        searched: paths.phases_dir.clone(),
    };
    let id = ItemId::parse(raw).ok_or_else(not_found)?;
    let dirs = list_phase_dirs(&paths.phases_dir)?;

    for candidate in [raw.to_string(), id.padded(ID_WIDTH)] {
        let prefix = format!("{candidate}-");
        let mut matches = dirs.iter().filter(|dir| dir.name.starts_with(&prefix));
        if let Some(dir) = matches.next() {
            if matches.next().is_some() {
                warn!(id = %candidate, "several phase directories match, using the first");
            }
            debug!(id = %candidate, dir = %dir.path.display(), "resolved phase");
            return Ok(Phase {
                id: dir.id.clone(),
                name: dir.name.clone(),
                dir: dir.path.clone(),
            });
        }
    }
    Err(not_found().into())
}

fn phase_from_path(paths: &PlanningPaths, raw: &str) -> Option<Phase> {
    if !raw.contains(std::path::MAIN_SEPARATOR) && !raw.contains('/') {
        return None;
    }
    let given = Path::new(raw);
    let dir = if given.is_dir() {
        given.to_path_buf()
    } else {
        let under_root = paths.root.join(given);
        if !under_root.is_dir() {
            return None;
        }
        under_root
    };
    let name = dir.file_name()?.to_string_lossy().to_string();
    let id = ItemId::from_prefix(&name)?;
    Some(Phase { id, name, dir })
}

/// Resolve one plan of a phase by id, with the same padding retry.
pub fn resolve_plan(phase: &Phase, id: &str) -> Result<Plan> {
    let raw = id.trim();
    let not_found = || ConductorError::Resolution {
        kind: "plan",
        id: raw.to_string(),
        searched: phase.dir.clone(),
    };
    let wanted = ItemId::parse(raw).ok_or_else(not_found)?;
    let files = list_plan_files(&phase.dir)?;
    for candidate in [raw.to_string(), wanted.padded(ID_WIDTH)] {
        if let Some(file) = files.iter().find(|f| f.plan.as_str() == candidate) {
            return Plan::load(file.clone());
        }
    }
    Err(not_found().into())
}

/// All plans of a phase, sorted by id.
pub fn load_plans(phase: &Phase) -> Result<Vec<Plan>> {
    list_plan_files(&phase.dir)?
        .into_iter()
        .map(Plan::load)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("load plans of phase {}", phase.id))
}

/// Completion derived from plan and summary counts.
pub fn phase_completion(phase: &Phase) -> Result<Completion> {
    let plans = list_plan_files(&phase.dir)?.len();
    let summaries = list_summary_files(&phase.dir)?.len();
    Ok(Completion::from_counts(plans, summaries))
}

/// Phases of a milestone in roadmap order, paired with their directories.
pub fn resolve_milestone(paths: &PlanningPaths, version: &str) -> Result<Vec<MilestonePhase>> {
    let ids = read_milestone_phases(paths, version)?;
    if ids.is_empty() {
        warn!(milestone = version, "milestone lists no phases");
    }
    let dirs = list_phase_dirs(&paths.phases_dir)?;
    Ok(ids
        .into_iter()
        .map(|id| {
            let phase = dirs.iter().find(|dir| dir.id == id).map(|dir| Phase {
                id: dir.id.clone(),
                name: dir.name.clone(),
                dir: dir.path.clone(),
            });
            MilestonePhase { id, phase }
        })
        .collect())
}
