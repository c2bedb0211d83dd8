//! `conductor` CLI: run a phase or a milestone of planned work through an agent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;

use conductor::core::types::BranchStrategy;
use conductor::error::ConductorError;
use conductor::exit_codes;
use conductor::infra::ExitHooks;
use conductor::io::agent::CommandAgent;
use conductor::io::clock::SystemClock;
use conductor::io::config::{ConductorConfig, load_config, write_config};
use conductor::io::infra_backend::{CommandInfra, InfraBackend};
use conductor::io::layout::PlanningPaths;
use conductor::io::platform::GhPlatform;
use conductor::logging;
use conductor::orchestrate::{
    self, PlanReport, RunEvent, RunOptions, RunReport, RunStop, RunTarget, Services, UnitStatus,
    exit_code_for_error,
};
use conductor::pr::PrOutcome;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Drive a coding agent through the planned phases of a milestone"
)]
struct Cli {
    /// Phase id (`3`, `03`, `2.1`) or phase directory.
    #[arg(required_unless_present_any = ["milestone", "init_config"], conflicts_with = "milestone")]
    phase: Option<String>,

    /// Run every phase the roadmap lists for this milestone version.
    #[arg(long, value_name = "VERSION")]
    milestone: Option<String>,

    /// Print what would run without touching git, the agent, or the platform.
    #[arg(long)]
    dry_run: bool,

    /// Run only this plan of the phase.
    #[arg(long = "plan", value_name = "ID", conflicts_with = "milestone")]
    plan: Option<String>,

    /// Resume after the plans that already have summaries.
    #[arg(long = "continue")]
    resume: bool,

    #[arg(long, value_name = "STRATEGY", default_value = "independent")]
    branch_strategy: BranchStrategy,

    /// Poll each PR and merge it once it is mergeable.
    #[arg(long)]
    auto_merge: bool,

    /// Repository root containing `.planning/`.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `.planning/conductor.toml`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the default config file and exit.
    #[arg(long)]
    init_config: bool,

    /// Debug logging (overridden by `RUST_LOG`).
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("resolve root {}", cli.root.display()))?;
    let paths = PlanningPaths::new(&root);
    let config_path = cli.config.unwrap_or_else(|| paths.config_path.clone());

    if cli.init_config {
        if config_path.exists() {
            return Err(anyhow!("{} already exists", config_path.display()));
        }
        write_config(&config_path, &ConductorConfig::default())?;
        println!("config: wrote {}", config_path.display());
        return Ok(exit_codes::OK);
    }
    let config = load_config(&config_path)?;

    let target = match (cli.milestone, cli.phase) {
        (Some(version), _) => RunTarget::Milestone(version),
        (None, Some(phase)) => RunTarget::Phase(phase),
        (None, None) => return Err(anyhow!("a phase or --milestone is required")),
    };
    let options = RunOptions {
        target,
        dry_run: cli.dry_run,
        only_plan: cli.plan,
        resume: cli.resume,
        strategy: cli.branch_strategy,
        auto_merge: cli.auto_merge,
    };

    if options.dry_run {
        print!("{}", orchestrate::dry_run(&root, &config, &options)?);
        return Ok(exit_codes::OK);
    }

    let hooks = ExitHooks::default();
    {
        let handler_hooks = hooks.clone();
        ctrlc::set_handler(move || {
            eprintln!("interrupted; running cleanup");
            handler_hooks.run_all();
            std::process::exit(exit_codes::INTERRUPTED);
        })
        .context("install Ctrl-C handler")?;
    }

    let agent = CommandAgent::new(config.agent.command.clone());
    let platform = GhPlatform::new(&root);
    let infra: Arc<dyn InfraBackend> = Arc::new(CommandInfra::new(config.infra.clone(), &root));
    let clock = SystemClock;
    let services = Services {
        agent: &agent,
        platform: &platform,
        infra,
        clock: &clock,
        hooks,
    };

    info!(root = %root.display(), "starting run");
    let report = orchestrate::run(&root, &config, &options, &services, print_event)?;
    print_report(&report);
    Ok(report.exit_code())
}

fn print_event(event: RunEvent<'_>) {
    match event {
        RunEvent::ConflictRisk(risks) => {
            print!("{}", conductor::branching::render_risk_report(risks));
        }
        RunEvent::Plan(plan) => println!("{}", plan_line(plan)),
    }
}

fn plan_line(plan: &PlanReport) -> String {
    let branch = plan.branch.as_deref().unwrap_or("-");
    match &plan.status {
        UnitStatus::Completed { pr } => {
            format!("plan: {} completed branch={branch}{}", plan.label, pr_text(pr.as_ref()))
        }
        UnitStatus::Skipped(decision) => format!("plan: {} skipped ({decision:?})", plan.label),
        UnitStatus::Failed { reason } => {
            format!("plan: {} failed branch={branch} reason={reason}", plan.label)
        }
    }
}

fn pr_text(pr: Option<&PrOutcome>) -> String {
    match pr {
        None => String::new(),
        Some(PrOutcome::Merged { pr }) => format!(" pr=#{pr} merged"),
        Some(PrOutcome::Open { pr }) => format!(" pr=#{pr} open"),
        Some(PrOutcome::TimedOut { pr, .. }) => format!(" pr=#{pr} not merged"),
    }
}

fn print_report(report: &RunReport) {
    if let Some(pr) = &report.run_pr {
        println!("run:{}", pr_text(Some(pr)));
    }
    println!("summary: {}", report.summary);
    match &report.stop {
        RunStop::Finished => {}
        RunStop::NeedsPlanning { phase } => {
            let err = ConductorError::NeedsPlanning {
                phase: phase.clone(),
            };
            eprintln!("stopped: {err}");
        }
        RunStop::Failed { unit, reason } => eprintln!("stopped: {unit} failed: {reason}"),
    }
}
