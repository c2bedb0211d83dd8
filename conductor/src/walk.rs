//! Hierarchy walking: which plans of a phase run, and in what order.

use anyhow::Result;
use tracing::{debug, info};

use crate::core::resume::{Decision, WalkMode, decide};
use crate::error::ConductorError;
use crate::resolve::{Phase, Plan, load_plans};

/// One plan and what the walk decided for it.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub plan: Plan,
    pub decision: Decision,
}

/// Ordered decisions for every plan of one phase.
#[derive(Debug, Clone)]
pub struct WalkPlan {
    pub phase: Phase,
    pub entries: Vec<WalkEntry>,
}

impl WalkPlan {
    /// Decide over plans already sorted by id.
    pub fn build(phase: Phase, plans: Vec<Plan>, mode: &WalkMode) -> Self {
        let units: Vec<_> = plans
            .iter()
            .map(|plan| (plan.id.clone(), plan.is_complete()))
            .collect();
        let decisions = decide(&units, mode);
        let entries = plans
            .into_iter()
            .zip(decisions)
            .map(|(plan, decision)| {
                debug!(plan = %plan.label(), ?decision, "walk decision");
                WalkEntry { plan, decision }
            })
            .collect();
        Self { phase, entries }
    }

    pub fn to_run(&self) -> impl Iterator<Item = &Plan> {
        self.entries
            .iter()
            .filter(|entry| entry.decision.runs())
            .map(|entry| &entry.plan)
    }

    pub fn run_count(&self) -> usize {
        self.to_run().count()
    }

    pub fn skip_count(&self) -> usize {
        self.entries.len() - self.run_count()
    }
}

/// Load the plans of `phase` and decide which ones run.
///
/// A `--plan` filter that names no plan of the phase is a resolution error.
pub fn walk_phase(phase: &Phase, mode: &WalkMode) -> Result<WalkPlan> {
    let plans = load_plans(phase)?;
    if let Some(only) = &mode.only {
        if !plans.iter().any(|plan| &plan.id == only) {
            return Err(ConductorError::Resolution {
                kind: "plan",
                id: only.to_string(),
                searched: phase.dir.clone(),
            }
            .into());
        }
    }
    let walk = WalkPlan::build(phase.clone(), plans, mode);
    info!(
        phase = %phase.id,
        run = walk.run_count(),
        skipped = walk.skip_count(),
        "walked phase"
    );
    Ok(walk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::ItemId;
    use crate::io::layout::PlanningPaths;
    use crate::resolve::resolve_phase;
    use std::fs;

    fn phase_with(complete: &[&str], total: usize) -> (tempfile::TempDir, Phase) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = PlanningPaths::new(temp.path());
        let dir = paths.phases_dir.join("01-core");
        fs::create_dir_all(&dir).expect("mkdir");
        for n in 1..=total {
            fs::write(dir.join(format!("01-{n:02}-PLAN.md")), "<objective>x</objective>")
                .expect("plan");
        }
        for id in complete {
            fs::write(dir.join(format!("01-{id}-SUMMARY.md")), "done").expect("summary");
        }
        let phase = resolve_phase(&paths, "1").expect("phase");
        (temp, phase)
    }

    fn labels(walk: &WalkPlan) -> Vec<String> {
        walk.to_run().map(Plan::label).collect()
    }

    #[test]
    fn resume_runs_only_remaining_plans() {
        let (_temp, phase) = phase_with(&["01", "02"], 3);
        let mode = WalkMode {
            resume: true,
            only: None,
        };
        let walk = walk_phase(&phase, &mode).expect("walk");
        assert_eq!(labels(&walk), vec!["01-03"]);
        assert_eq!(walk.skip_count(), 2);
    }

    #[test]
    fn plan_filter_overrides_resume() {
        let (_temp, phase) = phase_with(&[], 3);
        let mode = WalkMode {
            resume: true,
            only: ItemId::parse("2"),
        };
        let walk = walk_phase(&phase, &mode).expect("walk");
        assert_eq!(labels(&walk), vec!["01-02"]);
    }

    #[test]
    fn unknown_plan_filter_is_resolution_error() {
        let (_temp, phase) = phase_with(&[], 2);
        let mode = WalkMode {
            resume: false,
            only: ItemId::parse("9"),
        };
        let err = walk_phase(&phase, &mode).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConductorError>(),
            Some(ConductorError::Resolution { kind: "plan", .. })
        ));
    }
}
