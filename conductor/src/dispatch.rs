//! Agent dispatch gateway.
//!
//! Every unit of work goes to a fresh agent session. The session's outcome
//! comes from its sentinels; sessions that print neither only count when the
//! repository shows evidence of work.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::sentinel::{SideEffects, Verdict, corroborate, interpret};
use crate::core::types::AgentOutcome;
use crate::error::ConductorError;
use crate::infra::{InfraGate, InfraSession};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::config::ConductorConfig;
use crate::io::git::Git;
use crate::io::layout::PlanningPaths;
use crate::io::prompt::{PromptEngine, UnitRef};
use crate::resolve::Plan;

/// Outcome of one session plus the judgment after corroboration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub outcome: AgentOutcome,
    pub verdict: Verdict,
}

/// What a successful plan execution did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanRun {
    pub sessions: usize,
    /// Sessions judged successful from side effects alone.
    pub inferred: usize,
    pub committed_artifacts: bool,
}

/// Sends units of work to the agent, one session at a time.
pub struct Gateway<'a> {
    agent: &'a dyn Agent,
    git: &'a Git,
    paths: &'a PlanningPaths,
    config: &'a ConductorConfig,
    prompts: &'a PromptEngine,
}

impl<'a> Gateway<'a> {
    pub fn new(
        agent: &'a dyn Agent,
        git: &'a Git,
        paths: &'a PlanningPaths,
        config: &'a ConductorConfig,
        prompts: &'a PromptEngine,
    ) -> Self {
        Self {
            agent,
            git,
            paths,
            config,
            prompts,
        }
    }

    /// Run one session and judge it.
    ///
    /// `artifact` is the completion artifact the session may create; its
    /// appearance counts as side-effect evidence.
    #[instrument(skip_all, fields(label))]
    pub fn dispatch(
        &self,
        label: &str,
        prompt: &str,
        artifact: Option<&Path>,
    ) -> Result<DispatchResult> {
        let start_sha = self.git.head_sha()?;
        let artifact_before = artifact.is_some_and(Path::exists);

        let request = AgentRequest {
            workdir: self.paths.root.clone(),
            label: label.to_string(),
            prompt: prompt.to_string(),
            log_path: self.paths.session_log(label),
            timeout: Duration::from_secs(self.config.agent.timeout_secs),
            output_limit_bytes: self.config.agent.output_limit_bytes,
        };
        let transcript = self.agent.run(&request)?;

        let mut outcome = interpret(&transcript.stdout, &self.config.sentinels());
        if transcript.timed_out && outcome != AgentOutcome::Success {
            outcome = AgentOutcome::Failure {
                reason: format!(
                    "session timed out after {}s",
                    self.config.agent.timeout_secs
                ),
            };
        }

        let effects = SideEffects {
            new_commits: self.git.commits_since(&start_sha)?,
            artifact_created: !artifact_before && artifact.is_some_and(Path::exists),
        };
        let verdict = corroborate(&outcome, effects);
        match (&outcome, &verdict) {
            (AgentOutcome::Ambiguous, Verdict::Succeeded { .. }) => warn!(
                new_commits = effects.new_commits,
                artifact_created = effects.artifact_created,
                "no sentinel printed; success inferred from side effects"
            ),
            (_, Verdict::Failed { reason }) => warn!(reason = %reason, "session failed"),
            _ => info!(new_commits = effects.new_commits, "session succeeded"),
        }
        Ok(DispatchResult { outcome, verdict })
    }

    /// Execute every task of `plan`, then the summary session, then commit artifacts.
    ///
    /// Any failed session stops the plan with `AgentFailure`. A summary
    /// session that reports success without writing the artifact also fails.
    #[instrument(skip_all, fields(plan = %plan.label()))]
    pub fn run_plan(
        &self,
        plan: &Plan,
        infra: &InfraGate<'_>,
        session: &mut InfraSession,
    ) -> Result<PlanRun> {
        let label = plan.label();
        let plan_path = self.relative(&plan.path);
        let unit = UnitRef {
            phase: plan.phase.as_str(),
            plan: plan.id.as_str(),
            plan_path: &plan_path,
        };
        let base_sha = self.git.head_sha()?;
        let mut run = PlanRun::default();

        if plan.record.tasks.is_empty() {
            if infra.checks_require(&plan.record.verification) {
                infra.ensure(session)?;
            }
            let prompt = self
                .prompts
                .render_plan(unit, &plan.record, session.namespace())?;
            let result = self.dispatch(&format!("{label}-plan"), &prompt, None)?;
            self.accept(&mut run, &label, result)?;
        } else {
            for (index, task) in plan.record.tasks.iter().enumerate() {
                let number = index + 1;
                info!(task = number, name = %task.name, "dispatching task");
                if infra.task_requires(task) {
                    infra.ensure(session)?;
                }
                let prompt = self.prompts.render_task(
                    unit,
                    &plan.record,
                    number,
                    task,
                    session.namespace(),
                )?;
                let result = self.dispatch(&format!("{label}-task-{number}"), &prompt, None)?;
                self.accept(&mut run, &format!("{label} task {number}"), result)?;
            }
        }

        let summary_rel = self.relative(&plan.summary_path);
        let prompt = self
            .prompts
            .render_summary(unit, &plan.record, &summary_rel, &base_sha)?;
        let result = self.dispatch(
            &format!("{label}-summary"),
            &prompt,
            Some(&plan.summary_path),
        )?;
        self.accept(&mut run, &format!("{label} summary"), result)?;
        if !plan.summary_path.exists() {
            return Err(ConductorError::AgentFailure {
                unit: label,
                reason: format!("summary session did not write {summary_rel}"),
            }
            .into());
        }

        self.git.add_all()?;
        run.committed_artifacts = self
            .git
            .commit_staged(&format!("docs({label}): complete plan"))?;
        info!(sessions = run.sessions, inferred = run.inferred, "plan complete");
        Ok(run)
    }

    fn accept(&self, run: &mut PlanRun, unit: &str, result: DispatchResult) -> Result<()> {
        run.sessions += 1;
        match result.verdict {
            Verdict::Succeeded { inferred } => {
                if inferred {
                    run.inferred += 1;
                }
                Ok(())
            }
            Verdict::Failed { reason } => Err(ConductorError::AgentFailure {
                unit: unit.to_string(),
                reason,
            }
            .into()),
        }
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.paths.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::infra::ExitHooks;
    use crate::io::agent::CommandAgent;
    use crate::io::config::InfraConfig;
    use crate::resolve::{resolve_phase, resolve_plan};
    use crate::test_support::{FakeClock, RecordingInfra, ScriptedAgent, TestRepo, commit_work};

    const PLAN: &str = "---\nfiles_modified: [src/a.rs]\n---\n\
<objective>\nSet up the project\n</objective>\n\
<task>\n<name>Create module</name>\n<files>src/a.rs</files>\n<action>Write it</action>\n<verify>cargo test</verify>\n</task>\n\
<task>\n<name>Browser check</name>\n<files>web/app.js</files>\n<action>Wire the page</action>\n<verify>npx playwright test</verify>\n</task>\n";

    struct Fixture {
        repo: TestRepo,
        config: ConductorConfig,
        prompts: PromptEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = TestRepo::new().expect("repo");
            repo.write_planning("01-setup", "01-01-PLAN.md", PLAN)
                .expect("plan");
            repo.commit_all("add plan").expect("commit");
            let config = ConductorConfig::default();
            let prompts = PromptEngine::new(config.sentinels()).expect("prompts");
            Self {
                repo,
                config,
                prompts,
            }
        }

        fn plan(&self) -> Plan {
            let phase = resolve_phase(&self.repo.paths(), "1").expect("phase");
            resolve_plan(&phase, "1").expect("plan")
        }

        fn infra_config(&self) -> InfraConfig {
            InfraConfig {
                health_checks: Vec::new(),
                ..self.config.infra.clone()
            }
        }
    }

    #[test]
    fn ambiguous_session_with_commit_is_inferred_success() {
        let fx = Fixture::new();
        let git = fx.repo.git();
        let paths = fx.repo.paths();
        let agent = ScriptedAgent::strict();
        agent.push(|req| {
            commit_work(req, "src/a.rs")?;
            Ok("finished, I think".to_string())
        });
        let gateway = Gateway::new(&agent, &git, &paths, &fx.config, &fx.prompts);

        let result = gateway.dispatch("01-01-task-1", "do it", None).expect("dispatch");
        assert_eq!(result.outcome, AgentOutcome::Ambiguous);
        assert_eq!(result.verdict, Verdict::Succeeded { inferred: true });
    }

    #[test]
    fn ambiguous_session_without_evidence_fails() {
        let fx = Fixture::new();
        let git = fx.repo.git();
        let paths = fx.repo.paths();
        let agent = ScriptedAgent::strict();
        agent.push_reply("I looked around.");
        let gateway = Gateway::new(&agent, &git, &paths, &fx.config, &fx.prompts);

        let result = gateway.dispatch("01-01-task-1", "do it", None).expect("dispatch");
        assert!(matches!(result.verdict, Verdict::Failed { .. }));
    }

    /// A verbose session overflows the capture limit; its closing sentinel still decides.
    #[test]
    fn failure_sentinel_after_long_output_wins_over_commits() {
        let mut fx = Fixture::new();
        fx.config.agent.output_limit_bytes = 4096;
        let git = fx.repo.git();
        let paths = fx.repo.paths();
        let script = "cat >/dev/null; \
            echo work > work.txt && git add work.txt && git commit -q -m work; \
            i=0; while [ $i -lt 500 ]; do echo \"progress line $i\"; i=$((i+1)); done; \
            echo 'TASK_FAILED: tests do not pass'";
        let agent = CommandAgent::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()]);
        let gateway = Gateway::new(&agent, &git, &paths, &fx.config, &fx.prompts);
        let before = git.head_sha().expect("head");

        let result = gateway.dispatch("01-01-task-1", "do it", None).expect("dispatch");

        assert_eq!(git.commits_since(&before).expect("commits"), 1);
        assert_eq!(
            result.outcome,
            AgentOutcome::Failure {
                reason: "tests do not pass".to_string()
            }
        );
        assert!(matches!(result.verdict, Verdict::Failed { .. }));
    }

    #[test]
    fn run_plan_dispatches_tasks_then_summary_and_commits() {
        let fx = Fixture::new();
        let git = fx.repo.git();
        let paths = fx.repo.paths();
        let agent = ScriptedAgent::cooperative();
        let gateway = Gateway::new(&agent, &git, &paths, &fx.config, &fx.prompts);
        let infra = Arc::new(RecordingInfra::ready());
        let infra_config = fx.infra_config();
        let clock = FakeClock::new();
        let gate = InfraGate::new(infra.clone(), &infra_config, &clock, ExitHooks::default());
        let mut session = InfraSession::new();

        let plan = fx.plan();
        let run = gateway.run_plan(&plan, &gate, &mut session).expect("run plan");

        assert_eq!(
            agent.labels(),
            vec!["01-01-task-1", "01-01-task-2", "01-01-summary"]
        );
        assert_eq!(run.sessions, 3);
        assert_eq!(run.inferred, 0);
        assert!(run.committed_artifacts);
        assert!(plan.summary_path.exists());
        assert!(git.status_porcelain().expect("status").is_empty());

        // Only the playwright task needs the stack; its prompt names the namespace.
        assert_eq!(infra.starts(), 1);
        let prompts = agent.prompts();
        assert!(!prompts[0].contains("### Test Infrastructure"));
        let namespace = session.namespace().expect("started").to_string();
        assert_eq!(infra.namespaces(), vec![namespace.clone()]);
        assert!(prompts[1].contains(&namespace));
        session.teardown();
        assert_eq!(infra.stops(), 1);
    }

    #[test]
    fn failed_task_stops_the_plan() {
        let fx = Fixture::new();
        let git = fx.repo.git();
        let paths = fx.repo.paths();
        let agent = ScriptedAgent::strict();
        agent.push_reply("TASK_FAILED: missing toolchain");
        let gateway = Gateway::new(&agent, &git, &paths, &fx.config, &fx.prompts);
        let infra_config = fx.infra_config();
        let clock = FakeClock::new();
        let gate = InfraGate::new(
            Arc::new(RecordingInfra::ready()),
            &infra_config,
            &clock,
            ExitHooks::default(),
        );

        let err = gateway
            .run_plan(&fx.plan(), &gate, &mut InfraSession::new())
            .unwrap_err();
        match err.downcast_ref::<ConductorError>() {
            Some(ConductorError::AgentFailure { unit, reason }) => {
                assert_eq!(unit, "01-01 task 1");
                assert_eq!(reason, "missing toolchain");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(agent.labels().len(), 1);
    }

    #[test]
    fn summary_claimed_but_not_written_is_failure() {
        let fx = Fixture::new();
        let git = fx.repo.git();
        let paths = fx.repo.paths();
        let agent = ScriptedAgent::cooperative();
        agent.push(|req| {
            commit_work(req, "src/a.rs")?;
            Ok("TASK_COMPLETE".to_string())
        });
        agent.push(|req| {
            commit_work(req, "web/app.js")?;
            Ok("TASK_COMPLETE".to_string())
        });
        agent.push_reply("TASK_COMPLETE");
        let gateway = Gateway::new(&agent, &git, &paths, &fx.config, &fx.prompts);
        let infra_config = InfraConfig {
            signatures: Vec::new(),
            ..fx.infra_config()
        };
        let clock = FakeClock::new();
        let gate = InfraGate::new(
            Arc::new(RecordingInfra::ready()),
            &infra_config,
            &clock,
            ExitHooks::default(),
        );

        let err = gateway
            .run_plan(&fx.plan(), &gate, &mut InfraSession::new())
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("summary session did not write"),
            "{err:#}"
        );
    }
}
