//! Branch strategy: which branch each plan commits to, and what it is based on.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::branch_name::{plan_branch_name, run_branch_name};
use crate::core::ids::ItemId;
use crate::core::overlap::shared_files;
use crate::core::types::BranchStrategy;
use crate::io::config::ConductorConfig;
use crate::io::git::Git;
use crate::resolve::Plan;

/// A branch to work on and the ref it starts from when created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTarget {
    pub name: String,
    pub base: String,
}

/// Tracks branch bases across the plans of a run.
#[derive(Debug, Clone)]
pub struct BranchPlanner {
    strategy: BranchStrategy,
    trunk: String,
    prefix: String,
    slug_max_len: usize,
    /// Branch produced by the previous plan (chain only).
    chain_tip: Option<String>,
    run_branch: String,
}

impl BranchPlanner {
    /// `run_label` names the run-wide branch (`milestone-v1.0`, `phase-03`).
    pub fn new(strategy: BranchStrategy, config: &ConductorConfig, run_label: &str) -> Self {
        Self {
            strategy,
            trunk: config.trunk.clone(),
            prefix: config.branch_prefix.clone(),
            slug_max_len: config.slug_max_len,
            chain_tip: None,
            run_branch: run_branch_name(&config.branch_prefix, run_label),
        }
    }

    /// Plans get their own branch and PR unless the run uses one branch.
    pub fn per_plan_branches(&self) -> bool {
        self.strategy != BranchStrategy::Single
    }

    /// The run-wide branch (single strategy only).
    pub fn run_target(&self) -> Option<BranchTarget> {
        (self.strategy == BranchStrategy::Single).then(|| BranchTarget {
            name: self.run_branch.clone(),
            base: self.trunk.clone(),
        })
    }

    /// Branch for `plan`. Under `single` this is the run-wide branch.
    pub fn target_for(&self, plan: &Plan) -> BranchTarget {
        match self.strategy {
            BranchStrategy::Single => BranchTarget {
                name: self.run_branch.clone(),
                base: self.trunk.clone(),
            },
            BranchStrategy::Independent => BranchTarget {
                name: self.plan_branch(plan),
                base: self.trunk.clone(),
            },
            BranchStrategy::Chain => BranchTarget {
                name: self.plan_branch(plan),
                base: self
                    .chain_tip
                    .clone()
                    .unwrap_or_else(|| self.trunk.clone()),
            },
        }
    }

    /// Record the branch a plan produced. A merged branch's work is on trunk,
    /// so the next chained plan starts from trunk again.
    pub fn record_landed(&mut self, branch: &str, merged: bool) {
        if self.strategy != BranchStrategy::Chain {
            return;
        }
        self.chain_tip = if merged {
            None
        } else {
            Some(branch.to_string())
        };
    }

    fn plan_branch(&self, plan: &Plan) -> String {
        plan_branch_name(
            &self.prefix,
            plan.phase.as_str(),
            plan.id.as_str(),
            plan.record.objective_line(),
            self.slug_max_len,
        )
    }
}

/// Check out `target`, creating it from its base unless it already exists.
///
/// Reusing an existing branch lets a re-run continue a partially completed plan.
#[instrument(skip_all, fields(branch = %target.name, base = %target.base))]
pub fn checkout_target(git: &Git, target: &BranchTarget) -> Result<()> {
    if git.current_branch()? == target.name {
        return Ok(());
    }
    let result = if git.branch_exists(&target.name)? {
        info!("reusing existing branch");
        git.checkout_branch(&target.name)
    } else {
        info!("creating branch");
        git.checkout_new_branch(&target.name, &target.base)
    };
    result.with_context(|| format!("check out {}", target.name))
}

/// A file that more than one phase declares it modifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRisk {
    pub file: String,
    pub phases: Vec<ItemId>,
}

/// Files shared across phases; empty unless the strategy branches every plan from trunk.
pub fn conflict_risks(
    strategy: BranchStrategy,
    phase_files: &[(ItemId, Vec<String>)],
) -> Vec<ConflictRisk> {
    if strategy != BranchStrategy::Independent {
        return Vec::new();
    }
    let risks: Vec<ConflictRisk> = shared_files(phase_files)
        .into_iter()
        .map(|(file, phases)| ConflictRisk { file, phases })
        .collect();
    if !risks.is_empty() {
        warn!(files = risks.len(), "phases share declared files");
    }
    risks
}

/// Human-readable conflict-risk report with a recommendation.
pub fn render_risk_report(risks: &[ConflictRisk]) -> String {
    let mut out = String::from("Conflict risk: files declared by more than one phase\n");
    for risk in risks {
        let phases: Vec<&str> = risk.phases.iter().map(ItemId::as_str).collect();
        out.push_str(&format!("  {} (phases {})\n", risk.file, phases.join(", ")));
    }
    out.push_str(
        "Recommendation: use --branch-strategy chain, or --auto-merge so each plan lands before the next starts.\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan_record::parse_plan;
    use std::path::PathBuf;

    fn plan(phase: &str, id: &str, objective: &str) -> Plan {
        Plan {
            phase: ItemId::parse(phase).expect("phase"),
            id: ItemId::parse(id).expect("plan"),
            path: PathBuf::from("p"),
            summary_path: PathBuf::from("s"),
            record: parse_plan(&format!("<objective>{objective}</objective>")),
        }
    }

    fn planner(strategy: BranchStrategy) -> BranchPlanner {
        BranchPlanner::new(strategy, &ConductorConfig::default(), "milestone-v1.0")
    }

    #[test]
    fn independent_always_bases_on_trunk() {
        let mut p = planner(BranchStrategy::Independent);
        let first = p.target_for(&plan("03", "01", "Add login"));
        p.record_landed(&first.name, false);
        let second = p.target_for(&plan("03", "02", "Add logout"));
        assert_eq!(first.name, "plan/03-01-add-login");
        assert_eq!(second.base, "main");
    }

    #[test]
    fn chain_bases_on_previous_branch_until_merged() {
        let mut p = planner(BranchStrategy::Chain);
        let first = p.target_for(&plan("03", "01", "Add login"));
        assert_eq!(first.base, "main");
        p.record_landed(&first.name, false);

        let second = p.target_for(&plan("04", "01", "Billing"));
        assert_eq!(second.base, "plan/03-01-add-login");
        p.record_landed(&second.name, true);

        let third = p.target_for(&plan("04", "02", "Invoices"));
        assert_eq!(third.base, "main");
    }

    #[test]
    fn single_uses_one_run_branch() {
        let p = planner(BranchStrategy::Single);
        let target = p.target_for(&plan("03", "01", "Add login"));
        assert_eq!(target.name, "plan/milestone-v1-0");
        assert_eq!(p.run_target(), Some(target));
        assert!(!p.per_plan_branches());
    }

    #[test]
    fn plan_branch_names_are_stable() {
        let p = planner(BranchStrategy::Independent);
        let a = p.target_for(&plan("03", "02", "Wire session store"));
        let b = p.target_for(&plan("03", "02", "Wire session store"));
        assert_eq!(a, b);
        assert_eq!(p.target_for(&plan("03", "02", "")).name, "plan/03-02");
    }

    #[test]
    fn risks_only_reported_for_independent() {
        let files = vec![
            (ItemId::parse("1").expect("id"), vec!["src/lib.rs".to_string()]),
            (ItemId::parse("2").expect("id"), vec!["src/lib.rs".to_string()]),
        ];
        let risks = conflict_risks(BranchStrategy::Independent, &files);
        assert_eq!(risks.len(), 1);
        assert!(render_risk_report(&risks).contains("src/lib.rs (phases 1, 2)"));
        assert!(conflict_risks(BranchStrategy::Chain, &files).is_empty());
    }
}
