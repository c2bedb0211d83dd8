//! Milestone orchestration: walk phases and plans, dispatch, open and land PRs.
//!
//! Everything the run will do is decided up front, on trunk, before the first
//! branch is checked out. Branch checkouts change which summaries exist on
//! disk, so decisions are never recomputed mid-run.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::branching::{
    BranchPlanner, BranchTarget, ConflictRisk, checkout_target, conflict_risks,
    render_risk_report,
};
use crate::conflicts::ConflictResolver;
use crate::core::ids::ItemId;
use crate::core::infra_detect::requires_infra;
use crate::core::plan_record::PlanRecord;
use crate::core::resume::{Decision, WalkMode, decide};
use crate::core::types::{BranchStrategy, Completion};
use crate::dispatch::Gateway;
use crate::error::ConductorError;
use crate::exit_codes;
use crate::infra::{ExitHooks, InfraGate, InfraSession};
use crate::io::agent::Agent;
use crate::io::clock::Clock;
use crate::io::config::ConductorConfig;
use crate::io::git::Git;
use crate::io::infra_backend::InfraBackend;
use crate::io::layout::{PlanningPaths, ensure_logs_dir};
use crate::io::platform::ReviewPlatform;
use crate::io::prompt::PromptEngine;
use crate::pr::{PrController, PrOutcome};
use crate::resolve::{
    MilestonePhase, Plan, load_plans, phase_completion, resolve_milestone, resolve_phase,
};
use crate::walk::{WalkEntry, WalkPlan, walk_phase};

/// What the run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// A phase id (`3`, `03`, `2.1`) or a phase directory path.
    Phase(String),
    /// A roadmap milestone version (`v1.0`).
    Milestone(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub target: RunTarget,
    pub dry_run: bool,
    /// Run only this plan of the phase.
    pub only_plan: Option<String>,
    /// Resume after the completed units (`--continue`).
    pub resume: bool,
    pub strategy: BranchStrategy,
    pub auto_merge: bool,
}

impl RunOptions {
    pub fn new(target: RunTarget) -> Self {
        Self {
            target,
            dry_run: false,
            only_plan: None,
            resume: false,
            strategy: BranchStrategy::default(),
            auto_merge: false,
        }
    }
}

/// External collaborators of a run.
pub struct Services<'a> {
    pub agent: &'a dyn Agent,
    pub platform: &'a dyn ReviewPlatform,
    pub infra: Arc<dyn InfraBackend>,
    pub clock: &'a dyn Clock,
    pub hooks: ExitHooks,
}

/// Final status of one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Executed. `pr` is `None` under the single-branch strategy.
    Completed { pr: Option<PrOutcome> },
    Skipped(Decision),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanReport {
    pub label: String,
    pub branch: Option<String>,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completed={} skipped={} failed={}",
            self.completed, self.skipped, self.failed
        )
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Every selected unit was attempted.
    Finished,
    /// A phase has no plans yet; nothing after it ran.
    NeedsPlanning { phase: String },
    /// A unit failed in a way that halts the run.
    Failed { unit: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub plans: Vec<PlanReport>,
    /// PR for the run-wide branch (single strategy).
    pub run_pr: Option<PrOutcome>,
    pub summary: RunSummary,
    pub stop: RunStop,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        match self.stop {
            RunStop::NeedsPlanning { .. } => exit_codes::NEEDS_PLANNING,
            RunStop::Failed { .. } => exit_codes::FAILURE,
            RunStop::Finished if self.summary.failed > 0 => exit_codes::FAILURE,
            RunStop::Finished => exit_codes::OK,
        }
    }
}

/// Progress notifications for the caller.
#[derive(Debug)]
pub enum RunEvent<'r> {
    ConflictRisk(&'r [ConflictRisk]),
    Plan(&'r PlanReport),
}

/// One step of the prepared run.
#[derive(Debug, Clone)]
enum PhaseStep {
    Walk(WalkPlan),
    NeedsPlanning(ItemId),
}

/// Resolve the target and decide every phase and plan before anything runs.
fn prepare(paths: &PlanningPaths, options: &RunOptions) -> Result<(String, Vec<PhaseStep>)> {
    let only = options
        .only_plan
        .as_deref()
        .map(|raw| ItemId::parse(raw).ok_or_else(|| anyhow!("invalid plan id '{raw}'")))
        .transpose()?;
    let plan_mode = WalkMode {
        resume: options.resume,
        only,
    };

    let (run_label, slots) = match &options.target {
        RunTarget::Phase(raw) => {
            let phase = resolve_phase(paths, raw)?;
            let label = format!("phase-{}", phase.id);
            let slot = MilestonePhase {
                id: phase.id.clone(),
                phase: Some(phase),
            };
            (label, vec![slot])
        }
        RunTarget::Milestone(version) => {
            if plan_mode.only.is_some() {
                return Err(anyhow!("--plan cannot be combined with --milestone"));
            }
            (format!("milestone-{version}"), resolve_milestone(paths, version)?)
        }
    };

    let mut completions = Vec::with_capacity(slots.len());
    for slot in &slots {
        let completion = match &slot.phase {
            Some(phase) => phase_completion(phase)?,
            None => Completion::NeedsPlanning,
        };
        completions.push(completion);
    }
    let units: Vec<(ItemId, bool)> = slots
        .iter()
        .zip(&completions)
        .map(|(slot, completion)| (slot.id.clone(), completion.is_complete()))
        .collect();
    let phase_mode = WalkMode {
        resume: options.resume,
        only: None,
    };
    let decisions = decide(&units, &phase_mode);

    let mut steps = Vec::new();
    for ((slot, completion), decision) in slots.into_iter().zip(completions).zip(decisions) {
        let Some(phase) = slot.phase else {
            if decision.runs() {
                steps.push(PhaseStep::NeedsPlanning(slot.id));
                break;
            }
            continue;
        };
        if decision == Decision::SkipResume {
            info!(phase = %phase.id, "phase skipped by resume position");
            let entries = load_plans(&phase)?
                .into_iter()
                .map(|plan| WalkEntry {
                    plan,
                    decision: Decision::SkipResume,
                })
                .collect();
            steps.push(PhaseStep::Walk(WalkPlan { phase, entries }));
            continue;
        }
        if completion == Completion::NeedsPlanning {
            steps.push(PhaseStep::NeedsPlanning(phase.id));
            break;
        }
        steps.push(PhaseStep::Walk(walk_phase(&phase, &plan_mode)?));
    }
    Ok((run_label, steps))
}

/// Declared files of the plans that will run, per phase.
fn risks_for(strategy: BranchStrategy, steps: &[PhaseStep]) -> Vec<ConflictRisk> {
    let phase_files: Vec<(ItemId, Vec<String>)> = steps
        .iter()
        .filter_map(|step| match step {
            PhaseStep::Walk(walk) => Some(walk),
            PhaseStep::NeedsPlanning(_) => None,
        })
        .map(|walk| {
            let mut files: Vec<String> = Vec::new();
            for plan in walk.to_run() {
                for file in &plan.record.files {
                    if !files.contains(file) {
                        files.push(file.clone());
                    }
                }
            }
            (walk.phase.id.clone(), files)
        })
        .collect();
    conflict_risks(strategy, &phase_files)
}

fn pr_title(plan: &Plan) -> String {
    let objective = plan.record.objective_line();
    if objective.is_empty() {
        plan.label()
    } else {
        format!("{}: {objective}", plan.label())
    }
}

fn decision_text(decision: Decision) -> &'static str {
    match decision {
        Decision::Run => "run",
        Decision::SkipComplete => "skip (complete)",
        Decision::SkipResume => "skip (resume)",
        Decision::SkipFiltered => "skip (filtered)",
    }
}

/// Describe what a run would do without touching git, the agent or the platform.
pub fn dry_run(root: &Path, config: &ConductorConfig, options: &RunOptions) -> Result<String> {
    let paths = PlanningPaths::new(root);
    let (run_label, steps) = prepare(&paths, options)?;
    let mut planner = BranchPlanner::new(options.strategy, config, &run_label);
    let infra = &config.infra;

    let mut out = format!(
        "Dry run: {run_label} (strategy {}, auto-merge {})\n",
        options.strategy,
        if options.auto_merge { "on" } else { "off" }
    );
    if let Some(target) = planner.run_target() {
        out.push_str(&format!(
            "Run branch: {} from {}\n",
            target.name, target.base
        ));
    }

    let mut run_labels = Vec::new();
    for step in &steps {
        let walk = match step {
            PhaseStep::NeedsPlanning(id) => {
                out.push_str(&format!("\nPhase {id}: needs planning; the run stops here\n"));
                continue;
            }
            PhaseStep::Walk(walk) => walk,
        };
        out.push_str(&format!(
            "\nPhase {} ({}): {} to run, {} skipped\n",
            walk.phase.id,
            walk.phase.name,
            walk.run_count(),
            walk.skip_count()
        ));
        for entry in &walk.entries {
            let plan = &entry.plan;
            out.push_str(&format!(
                "  {} {}",
                plan.label(),
                decision_text(entry.decision)
            ));
            if !entry.decision.runs() {
                out.push('\n');
                continue;
            }
            run_labels.push(plan.label());
            let target = planner.target_for(plan);
            out.push_str(&format!(": {}\n", plan.record.objective_line()));
            if planner.per_plan_branches() {
                out.push_str(&format!(
                    "    branch {} from {}\n",
                    target.name, target.base
                ));
            }
            if plan.record.tasks.is_empty() {
                let flag = if plan
                    .record
                    .verification
                    .iter()
                    .any(|check| requires_infra(check, &infra.signatures))
                {
                    " [infra]"
                } else {
                    ""
                };
                out.push_str(&format!("    whole plan in one session{flag}\n"));
            }
            for (index, task) in plan.record.tasks.iter().enumerate() {
                let flag = if requires_infra(&task.verify, &infra.signatures) {
                    " [infra]"
                } else {
                    ""
                };
                out.push_str(&format!("    task {}: {}{flag}\n", index + 1, task.name));
            }
            if planner.per_plan_branches() {
                let merge = if options.auto_merge {
                    "auto-merge"
                } else {
                    "left open"
                };
                out.push_str(&format!(
                    "    PR {} -> {} ({merge})\n",
                    target.name, target.base
                ));
                planner.record_landed(&target.name, options.auto_merge);
            }
        }
    }

    if let Some(target) = planner.run_target() {
        if !run_labels.is_empty() {
            out.push_str(&format!(
                "\nPR {} -> {} covering {}\n",
                target.name,
                target.base,
                run_labels.join(", ")
            ));
        }
    }

    let risks = risks_for(options.strategy, &steps);
    if !risks.is_empty() {
        out.push('\n');
        out.push_str(&render_risk_report(&risks));
    }
    Ok(out)
}

/// Execute a run end to end.
///
/// Unit failures are reported in the returned [`RunReport`]; only preflight
/// and resolution problems are returned as errors.
#[instrument(skip_all, fields(target = ?options.target, strategy = %options.strategy))]
pub fn run<F: FnMut(RunEvent<'_>)>(
    root: &Path,
    config: &ConductorConfig,
    options: &RunOptions,
    services: &Services<'_>,
    mut on_event: F,
) -> Result<RunReport> {
    let paths = PlanningPaths::new(root);
    let git = Git::new(root);
    let (run_label, steps) = prepare(&paths, options)?;

    ensure_logs_dir(&paths)?;
    git.ensure_clean_except_prefixes(&[".planning/logs/"])?;
    let original = git.current_branch()?;
    git.checkout_branch(&config.trunk)?;
    git.update_local_branch(&config.remote, &config.trunk)?;

    let risks = risks_for(options.strategy, &steps);
    if !risks.is_empty() {
        on_event(RunEvent::ConflictRisk(&risks));
    }

    let prompts = PromptEngine::new(config.sentinels())?;
    let gateway = Gateway::new(services.agent, &git, &paths, config, &prompts);
    let resolver = ConflictResolver::new(&git, &gateway, &prompts, config);
    let controller = PrController::new(services.platform, &git, services.clock, config);
    let gate = InfraGate::new(
        Arc::clone(&services.infra),
        &config.infra,
        services.clock,
        services.hooks.clone(),
    );
    let mut session = InfraSession::new();

    let mut runner = Runner {
        config,
        options,
        git: &git,
        gateway: &gateway,
        prompts: &prompts,
        resolver: &resolver,
        controller: &controller,
        gate: &gate,
        planner: BranchPlanner::new(options.strategy, config, &run_label),
        plans: Vec::new(),
        summary: RunSummary::default(),
    };
    let outcome = runner.execute(&steps, &mut session, &mut on_event);
    session.teardown();

    if let Err(err) = git.checkout_branch(&original) {
        warn!(branch = %original, err = %err, "could not restore original branch");
    }

    let (stop, run_pr) = outcome?;
    let report = RunReport {
        plans: runner.plans,
        run_pr,
        summary: runner.summary,
        stop,
    };
    info!(summary = %report.summary, stop = ?report.stop, "run finished");
    Ok(report)
}

/// Mutable state of one run.
struct Runner<'r> {
    config: &'r ConductorConfig,
    options: &'r RunOptions,
    git: &'r Git,
    gateway: &'r Gateway<'r>,
    prompts: &'r PromptEngine,
    resolver: &'r ConflictResolver<'r>,
    controller: &'r PrController<'r>,
    gate: &'r InfraGate<'r>,
    planner: BranchPlanner,
    plans: Vec<PlanReport>,
    summary: RunSummary,
}

impl Runner<'_> {
    fn execute<F: FnMut(RunEvent<'_>)>(
        &mut self,
        steps: &[PhaseStep],
        session: &mut InfraSession,
        on_event: &mut F,
    ) -> Result<(RunStop, Option<PrOutcome>)> {
        let run_target = self.planner.run_target();
        if let Some(target) = &run_target {
            checkout_target(self.git, target)?;
        }

        let mut landed: Vec<&Plan> = Vec::new();
        let mut stop = RunStop::Finished;
        'phases: for step in steps {
            let walk = match step {
                PhaseStep::NeedsPlanning(id) => {
                    warn!(phase = %id, "phase needs planning; stopping");
                    stop = RunStop::NeedsPlanning {
                        phase: id.to_string(),
                    };
                    break;
                }
                PhaseStep::Walk(walk) => walk,
            };
            info!(phase = %walk.phase.id, run = walk.run_count(), "starting phase");
            for entry in &walk.entries {
                let plan = &entry.plan;
                if !entry.decision.runs() {
                    self.summary.skipped += 1;
                    self.report(
                        on_event,
                        PlanReport {
                            label: plan.label(),
                            branch: None,
                            status: UnitStatus::Skipped(entry.decision),
                        },
                    );
                    continue;
                }

                let target = self.planner.target_for(plan);
                match self.execute_plan(plan, &target, session) {
                    Ok(pr) => {
                        let status = match pr {
                            Some(PrOutcome::TimedOut {
                                pr: number,
                                attempts,
                                ref reason,
                            }) => {
                                let err = ConductorError::MergeTimeout {
                                    pr: number,
                                    attempts,
                                    reason: reason.clone(),
                                };
                                warn!(plan = %plan.label(), err = %err, "PR did not merge");
                                self.summary.failed += 1;
                                UnitStatus::Failed {
                                    reason: err.to_string(),
                                }
                            }
                            _ => {
                                self.summary.completed += 1;
                                UnitStatus::Completed { pr: pr.clone() }
                            }
                        };
                        if self.planner.per_plan_branches() {
                            let merged = matches!(pr, Some(PrOutcome::Merged { .. }));
                            self.planner.record_landed(&target.name, merged);
                        }
                        landed.push(plan);
                        self.report(
                            on_event,
                            PlanReport {
                                label: plan.label(),
                                branch: Some(target.name.clone()),
                                status,
                            },
                        );
                    }
                    Err(err) => {
                        let reason = format!("{err:#}");
                        warn!(plan = %plan.label(), reason = %reason, "plan failed; halting run");
                        self.summary.failed += 1;
                        self.report(
                            on_event,
                            PlanReport {
                                label: plan.label(),
                                branch: Some(target.name.clone()),
                                status: UnitStatus::Failed {
                                    reason: reason.clone(),
                                },
                            },
                        );
                        stop = RunStop::Failed {
                            unit: plan.label(),
                            reason,
                        };
                        break 'phases;
                    }
                }
            }
        }

        let run_pr = match &run_target {
            Some(target) if !landed.is_empty() => Some(self.land_run_branch(target, &landed)?),
            _ => None,
        };
        if let Some(PrOutcome::TimedOut { reason, .. }) = &run_pr {
            warn!(reason = %reason, "run PR did not merge");
            self.summary.failed += 1;
        }
        Ok((stop, run_pr))
    }

    fn report<F: FnMut(RunEvent<'_>)>(&mut self, on_event: &mut F, report: PlanReport) {
        on_event(RunEvent::Plan(&report));
        self.plans.push(report);
    }

    /// Execute one plan on its branch and, with per-plan branches, land its PR.
    #[instrument(skip_all, fields(plan = %plan.label(), branch = %target.name))]
    fn execute_plan(
        &self,
        plan: &Plan,
        target: &BranchTarget,
        session: &mut InfraSession,
    ) -> Result<Option<PrOutcome>> {
        checkout_target(self.git, target)?;
        let run = self.gateway.run_plan(plan, self.gate, session)?;
        info!(
            sessions = run.sessions,
            inferred = run.inferred,
            committed = run.committed_artifacts,
            "plan executed"
        );
        if !self.planner.per_plan_branches() {
            return Ok(None);
        }

        self.git.push(&self.config.remote, &target.name)?;
        let body = self
            .prompts
            .render_pr_body(&[plan.label()], &[&plan.record])?;
        let pr = self
            .controller
            .open(&target.name, &target.base, &pr_title(plan), body)?;
        let topic = plan.record.objective_line();
        self.land(pr, target, topic).map(Some)
    }

    fn land(&self, pr: u64, target: &BranchTarget, topic: &str) -> Result<PrOutcome> {
        if !self.options.auto_merge {
            return Ok(PrOutcome::Open { pr });
        }
        let mut resolve = || -> Result<()> {
            self.resolver.resolve(&target.name, topic).map(|_| ())
        };
        self.controller
            .drive_to_merge(pr, &target.base, &mut resolve)
    }

    /// Push the run-wide branch and open one PR for every plan that ran.
    fn land_run_branch(&self, target: &BranchTarget, landed: &[&Plan]) -> Result<PrOutcome> {
        checkout_target(self.git, target)?;
        self.git.push(&self.config.remote, &target.name)?;
        let labels: Vec<String> = landed.iter().map(|plan| plan.label()).collect();
        let records: Vec<&PlanRecord> = landed.iter().map(|plan| &plan.record).collect();
        let body = self.prompts.render_pr_body(&labels, &records)?;
        let title = format!("{}: {}", target.name, labels.join(", "));
        let pr = self
            .controller
            .open(&target.name, &target.base, &title, body)?;
        let topic = landed
            .first()
            .map(|plan| plan.record.objective_line())
            .unwrap_or_default();
        self.land(pr, target, topic)
    }
}

/// Map an error that escaped the run to an exit code.
pub fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ConductorError>() {
        Some(ConductorError::NeedsPlanning { .. }) => exit_codes::NEEDS_PLANNING,
        _ => exit_codes::FAILURE,
    }
}
