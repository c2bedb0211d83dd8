//! Merge-conflict resolution for a branch whose PR conflicts with trunk.
//!
//! Trunk is merged into the branch. Unrelated files take trunk's version,
//! related files go to an agent repair session, and the merge is only
//! committed once no conflict markers remain. Every failure path aborts the
//! merge and restores the branch the caller had checked out.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::conflict_rules::{ConflictSet, RuleTable, Topic, has_conflict_markers};
use crate::core::types::AgentOutcome;
use crate::dispatch::Gateway;
use crate::error::ConductorError;
use crate::io::config::ConductorConfig;
use crate::io::git::{Git, MergeResult};
use crate::io::process::{CommandRequest, command_from_argv, run_command};
use crate::io::prompt::PromptEngine;

const BUILD_OUTPUT_LIMIT: usize = 256 * 1024;

/// What a successful resolution did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Trunk merged without conflicts.
    pub clean: bool,
    pub conflicts: ConflictSet,
}

pub struct ConflictResolver<'a> {
    git: &'a Git,
    gateway: &'a Gateway<'a>,
    prompts: &'a PromptEngine,
    config: &'a ConductorConfig,
    rules: &'a RuleTable,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(
        git: &'a Git,
        gateway: &'a Gateway<'a>,
        prompts: &'a PromptEngine,
        config: &'a ConductorConfig,
    ) -> Self {
        Self {
            git,
            gateway,
            prompts,
            config,
            rules: RuleTable::default_table(),
        }
    }

    /// Merge trunk into `branch`, resolve conflicts, commit and push.
    ///
    /// `topic` (usually the plan objective) decides platform-specific rules.
    #[instrument(skip_all, fields(branch))]
    pub fn resolve(&self, branch: &str, topic: &str) -> Result<Resolution> {
        let original = self.git.current_branch()?;
        self.git
            .checkout_branch(branch)
            .with_context(|| format!("check out {branch} for conflict resolution"))?;

        let result = self.merge_trunk(branch, topic);
        if result.is_err() {
            if let Err(err) = self.git.merge_abort() {
                warn!(err = %err, "merge abort failed");
            }
        }
        if let Err(err) = self.git.checkout_branch(&original) {
            warn!(branch = %original, err = %err, "could not restore original branch");
            if result.is_ok() {
                return Err(err.context("restore branch after conflict resolution"));
            }
        }
        result
    }

    fn merge_trunk(&self, branch: &str, topic: &str) -> Result<Resolution> {
        let remote = &self.config.remote;
        let trunk = &self.config.trunk;
        self.git.fetch(remote, trunk)?;
        let paths = match self.git.merge(&format!("{remote}/{trunk}"))? {
            MergeResult::Clean => {
                info!("trunk merged cleanly");
                self.git.push(remote, branch)?;
                return Ok(Resolution {
                    clean: true,
                    conflicts: ConflictSet::default(),
                });
            }
            MergeResult::Conflicted(paths) => paths,
        };

        let topic_tokens = Topic::from_texts([branch, topic]);
        let set = self.rules.partition(&paths, &topic_tokens);
        info!(
            unrelated = set.unrelated.len(),
            related = set.related.len(),
            "classified conflicts"
        );

        for path in &set.unrelated {
            self.git
                .take_theirs(path)
                .with_context(|| format!("take trunk version of {path}"))?;
        }

        if !set.related.is_empty() {
            self.repair(branch, topic, &set.related)?;
        }

        let remaining = self.remaining_markers(&paths)?;
        if !remaining.is_empty() {
            return Err(ConductorError::ConflictUnresolvable {
                branch: branch.to_string(),
                files: remaining,
            }
            .into());
        }

        self.git.commit_merge()?;
        self.git.push(remote, branch)?;
        info!("conflicts resolved and pushed");
        Ok(Resolution {
            clean: false,
            conflicts: set,
        })
    }

    fn repair(&self, branch: &str, topic: &str, related: &[String]) -> Result<()> {
        let prompt = self
            .prompts
            .render_conflict(branch, &self.config.trunk, topic, related)?;
        let label = format!("conflict-{}", branch.replace('/', "-"));
        let result = self.gateway.dispatch(&label, &prompt, None)?;
        if let AgentOutcome::Failure { reason } = result.outcome {
            return Err(ConductorError::AgentFailure {
                unit: format!("conflict repair on {branch}"),
                reason,
            }
            .into());
        }
        self.run_build()?;
        self.git.add_paths(related)
    }

    fn run_build(&self) -> Result<()> {
        let argv = &self.config.conflicts.build_command;
        if argv.is_empty() {
            return Ok(());
        }
        let cmd = command_from_argv(argv, &[], self.git.workdir())?;
        let timeout = Duration::from_secs(self.config.conflicts.build_timeout_secs);
        let output = run_command(cmd, &CommandRequest::new(timeout, BUILD_OUTPUT_LIMIT))
            .context("run post-repair build")?;
        if !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "build failed after conflict repair: {}",
                stderr.trim()
            ));
        }
        Ok(())
    }

    /// Files still carrying markers: the conflicted set, unmerged index
    /// entries, and any tracked file in the tree.
    fn remaining_markers(&self, conflicted: &[String]) -> Result<Vec<String>> {
        let mut remaining: Vec<String> = Vec::new();
        let mut push = |path: String| {
            if !remaining.contains(&path) {
                remaining.push(path);
            }
        };
        for path in conflicted {
            let full = self.git.workdir().join(path);
            if let Ok(text) = fs::read_to_string(&full) {
                if has_conflict_markers(&text) {
                    push(path.clone());
                }
            }
        }
        for path in self.git.unmerged_paths()? {
            push(path);
        }
        for path in self.git.files_with_conflict_markers()? {
            push(path);
        }
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, TestRepo};

    const BRANCH: &str = "plan/01-01-core-rewrite";

    /// `a.test` and `b.core` changed on both the branch and trunk.
    fn diverged_repo() -> TestRepo {
        let repo = TestRepo::new().expect("repo");
        repo.commit_file("a.test", "base\n", "add test").expect("commit");
        repo.commit_file("b.core", "base\n", "add core").expect("commit");
        repo.run_git(&["push", "-q", "origin", "main"]).expect("push");

        repo.run_git(&["checkout", "-q", "-b", BRANCH]).expect("branch");
        repo.commit_file("a.test", "branch side\n", "branch test")
            .expect("commit");
        repo.commit_file("b.core", "branch side\n", "branch core")
            .expect("commit");

        repo.commit_on_origin("main", "a.test", "trunk side\n")
            .expect("upstream");
        repo.commit_on_origin("main", "b.core", "trunk side\n")
            .expect("upstream");
        repo.run_git(&["checkout", "-q", "main"]).expect("back to main");
        repo
    }

    #[test]
    fn unrelated_taken_from_trunk_and_related_repaired() {
        let repo = diverged_repo();
        let git = repo.git();
        let paths = repo.paths();
        let config = ConductorConfig::default();
        let prompts = PromptEngine::new(config.sentinels()).expect("prompts");
        let agent = ScriptedAgent::cooperative();
        let gateway = Gateway::new(&agent, &git, &paths, &config, &prompts);
        let resolver = ConflictResolver::new(&git, &gateway, &prompts, &config);

        let resolution = resolver.resolve(BRANCH, "core rewrite").expect("resolve");

        assert!(!resolution.clean);
        assert_eq!(resolution.conflicts.unrelated, vec!["a.test"]);
        assert_eq!(resolution.conflicts.related, vec!["b.core"]);
        assert_eq!(agent.labels(), vec!["conflict-plan-01-01-core-rewrite"]);
        assert!(agent.prompts()[0].contains("- b.core"));
        assert!(!agent.prompts()[0].contains("- a.test"));
        assert_eq!(git.current_branch().expect("branch"), "main");

        git.checkout_branch(BRANCH).expect("checkout");
        assert_eq!(repo.read_file("a.test").expect("read"), "trunk side\n");
        let core = repo.read_file("b.core").expect("read");
        assert!(!has_conflict_markers(&core));
        assert!(core.contains("branch side") && core.contains("trunk side"));
    }

    #[test]
    fn marker_residue_is_unresolvable_and_merge_is_aborted() {
        let repo = diverged_repo();
        let git = repo.git();
        let paths = repo.paths();
        let config = ConductorConfig::default();
        let prompts = PromptEngine::new(config.sentinels()).expect("prompts");
        let agent = ScriptedAgent::strict();
        agent.push_reply("All resolved.\nTASK_COMPLETE");
        let gateway = Gateway::new(&agent, &git, &paths, &config, &prompts);
        let resolver = ConflictResolver::new(&git, &gateway, &prompts, &config);

        let err = resolver.resolve(BRANCH, "core rewrite").unwrap_err();
        match err.downcast_ref::<ConductorError>() {
            Some(ConductorError::ConflictUnresolvable { branch, files }) => {
                assert_eq!(branch, BRANCH);
                assert!(files.contains(&"b.core".to_string()), "{files:?}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(git.current_branch().expect("branch"), "main");

        git.checkout_branch(BRANCH).expect("checkout");
        assert_eq!(repo.read_file("b.core").expect("read"), "branch side\n");
    }

    #[test]
    fn explicit_repair_failure_aborts() {
        let repo = diverged_repo();
        let git = repo.git();
        let paths = repo.paths();
        let config = ConductorConfig::default();
        let prompts = PromptEngine::new(config.sentinels()).expect("prompts");
        let agent = ScriptedAgent::strict();
        agent.push_reply("TASK_FAILED: both sides rewrite the same function");
        let gateway = Gateway::new(&agent, &git, &paths, &config, &prompts);
        let resolver = ConflictResolver::new(&git, &gateway, &prompts, &config);

        let err = resolver.resolve(BRANCH, "core rewrite").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConductorError>(),
            Some(ConductorError::AgentFailure { .. })
        ));
        assert!(git.unmerged_paths().expect("unmerged").is_empty());
    }

    #[test]
    fn clean_merge_needs_no_agent() {
        let repo = TestRepo::new().expect("repo");
        repo.run_git(&["checkout", "-q", "-b", BRANCH]).expect("branch");
        repo.commit_file("src/lib.rs", "fn a() {}\n", "branch work")
            .expect("commit");
        repo.commit_on_origin("main", "docs/notes.md", "notes\n")
            .expect("upstream");

        let git = repo.git();
        let paths = repo.paths();
        let config = ConductorConfig::default();
        let prompts = PromptEngine::new(config.sentinels()).expect("prompts");
        let agent = ScriptedAgent::strict();
        let gateway = Gateway::new(&agent, &git, &paths, &config, &prompts);
        let resolver = ConflictResolver::new(&git, &gateway, &prompts, &config);

        let resolution = resolver.resolve(BRANCH, "core rewrite").expect("resolve");
        assert!(resolution.clean);
        assert!(agent.labels().is_empty());
        assert_eq!(repo.read_file("docs/notes.md").expect("read"), "notes\n");
    }
}
