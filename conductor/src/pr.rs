//! PR lifecycle: open a change request and, optionally, poll it to a merge.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::pr_poll::{PollAction, WaitReason, attempt_budget, next_action};
use crate::core::types::PrState;
use crate::io::clock::Clock;
use crate::io::config::ConductorConfig;
use crate::io::git::Git;
use crate::io::platform::{PrRequest, ReviewPlatform};

/// Terminal result of the PR lifecycle for one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrOutcome {
    Merged { pr: u64 },
    /// Opened and left for review (no auto-merge).
    Open { pr: u64 },
    /// Not merged within the polling budget, or conflict resolution failed.
    TimedOut { pr: u64, attempts: u32, reason: String },
}

impl PrOutcome {
    pub fn pr(&self) -> u64 {
        match self {
            PrOutcome::Merged { pr } | PrOutcome::Open { pr } | PrOutcome::TimedOut { pr, .. } => {
                *pr
            }
        }
    }
}

pub struct PrController<'a> {
    platform: &'a dyn ReviewPlatform,
    git: &'a Git,
    clock: &'a dyn Clock,
    config: &'a ConductorConfig,
}

impl<'a> PrController<'a> {
    pub fn new(
        platform: &'a dyn ReviewPlatform,
        git: &'a Git,
        clock: &'a dyn Clock,
        config: &'a ConductorConfig,
    ) -> Self {
        Self {
            platform,
            git,
            clock,
            config,
        }
    }

    /// Open a PR from `head` into `base`, reusing one that is already open.
    #[instrument(skip_all, fields(head, base))]
    pub fn open(&self, head: &str, base: &str, title: &str, body: String) -> Result<u64> {
        if let Some(pr) = self.platform.find_open(head)? {
            info!(pr, "reusing open PR");
            return Ok(pr);
        }
        let request = PrRequest {
            head: head.to_string(),
            base: base.to_string(),
            title: truncate_title(title, self.config.pr.title_max_len),
            body,
        };
        let pr = self
            .platform
            .create(&request)
            .with_context(|| format!("open PR for {head}"))?;
        info!(pr, "opened PR");
        Ok(pr)
    }

    /// Poll `pr` until it merges or the budget runs out.
    ///
    /// `resolve_conflicts` is called whenever the PR reports conflicts; a
    /// failure there ends the loop immediately with `TimedOut`.
    #[instrument(skip_all, fields(pr, base))]
    pub fn drive_to_merge(
        &self,
        pr: u64,
        base: &str,
        resolve_conflicts: &mut dyn FnMut() -> Result<()>,
    ) -> Result<PrOutcome> {
        let interval = self.config.pr.poll_interval();
        let attempts = attempt_budget(self.config.pr.merge_timeout(), interval);
        info!(attempts, interval_secs = interval.as_secs(), "polling for merge");

        for attempt in 1..=attempts {
            let status = self.platform.status(pr)?;
            match next_action(status) {
                PollAction::Merge => return self.merge(pr, base, attempt),
                PollAction::ResolveConflicts => {
                    info!(attempt, "PR conflicts with base, resolving");
                    if let Err(err) = resolve_conflicts() {
                        warn!(err = %format!("{err:#}"), "conflict resolution failed");
                        return Ok(PrOutcome::TimedOut {
                            pr,
                            attempts: attempt,
                            reason: format!("conflict resolution failed: {err:#}"),
                        });
                    }
                }
                PollAction::Wait(WaitReason::Blocked) => {
                    debug!(attempt, "waiting on required checks or reviews");
                }
                PollAction::Wait(WaitReason::Computing) => {
                    debug!(attempt, "waiting on mergeability");
                }
            }
            if attempt < attempts {
                self.clock.sleep(interval);
            }
        }

        warn!(attempts, "merge budget exhausted");
        Ok(PrOutcome::TimedOut {
            pr,
            attempts,
            reason: "not mergeable within the polling budget".to_string(),
        })
    }

    fn merge(&self, pr: u64, base: &str, attempt: u32) -> Result<PrOutcome> {
        let method = &self.config.pr.merge_method;
        match self.platform.merge(pr, method) {
            Ok(()) => {
                info!(method = %method, "merged");
            }
            Err(err) => {
                warn!(err = %err, "merge command failed, re-checking state");
                self.clock.sleep(self.config.pr.recheck_delay());
                if self.platform.state(pr)? != PrState::Merged {
                    return Ok(PrOutcome::TimedOut {
                        pr,
                        attempts: attempt,
                        reason: format!("merge failed: {err:#}"),
                    });
                }
                info!("PR merged despite command failure");
            }
        }
        self.git
            .update_local_branch(&self.config.remote, base)
            .with_context(|| format!("update local {base} after merge"))?;
        Ok(PrOutcome::Merged { pr })
    }
}

/// Cut `title` to `max_len` characters on a char boundary.
pub fn truncate_title(title: &str, max_len: usize) -> String {
    let title = title.trim();
    if title.chars().count() <= max_len {
        return title.to_string();
    }
    title
        .chars()
        .take(max_len)
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MergeReadiness, Mergeability, PrStatus};
    use crate::test_support::{FakeClock, ScriptedPlatform, TestRepo};
    use std::time::Duration;

    fn status(mergeability: Mergeability, readiness: MergeReadiness) -> PrStatus {
        PrStatus {
            mergeability,
            readiness,
        }
    }

    fn config() -> ConductorConfig {
        let mut config = ConductorConfig::default();
        config.pr.poll_interval_secs = 10;
        config.pr.merge_timeout_secs = 60;
        config
    }

    /// Indeterminate, then blocked, then clean: exactly one merge call.
    #[test]
    fn polls_until_clean_then_merges_once() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let platform = ScriptedPlatform::new();
        platform.push_statuses([
            status(Mergeability::Indeterminate, MergeReadiness::Blocked),
            status(Mergeability::Ready, MergeReadiness::Blocked),
            status(Mergeability::Ready, MergeReadiness::Clean),
        ]);
        let clock = FakeClock::new();
        let cfg = config();
        let controller = PrController::new(&platform, &git, &clock, &cfg);

        let mut resolve = || -> Result<()> { panic!("no conflicts expected") };
        let outcome = controller
            .drive_to_merge(7, "main", &mut resolve)
            .expect("drive");
        assert_eq!(outcome, PrOutcome::Merged { pr: 7 });
        assert_eq!(platform.merge_calls(), 1);
        assert_eq!(clock.total_slept(), Duration::from_secs(20));
    }

    #[test]
    fn budget_exhaustion_times_out() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let platform = ScriptedPlatform::new();
        platform.push_statuses([status(Mergeability::Ready, MergeReadiness::Blocked)]);
        let clock = FakeClock::new();
        let cfg = config();
        let controller = PrController::new(&platform, &git, &clock, &cfg);

        let mut resolve = || -> Result<()> { Ok(()) };
        let outcome = controller
            .drive_to_merge(3, "main", &mut resolve)
            .expect("drive");
        assert!(matches!(outcome, PrOutcome::TimedOut { attempts: 6, .. }));
        assert_eq!(platform.merge_calls(), 0);
        assert_eq!(platform.status_calls(), 6);
    }

    #[test]
    fn conflicts_are_resolved_then_polling_continues() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let platform = ScriptedPlatform::new();
        platform.push_statuses([
            status(Mergeability::Conflicting, MergeReadiness::Blocked),
            status(Mergeability::Ready, MergeReadiness::Degraded),
        ]);
        let clock = FakeClock::new();
        let cfg = config();
        let controller = PrController::new(&platform, &git, &clock, &cfg);

        let mut resolved = 0;
        let mut resolve = || -> Result<()> {
            resolved += 1;
            Ok(())
        };
        let outcome = controller
            .drive_to_merge(5, "main", &mut resolve)
            .expect("drive");
        assert_eq!(outcome, PrOutcome::Merged { pr: 5 });
        assert_eq!(resolved, 1);
    }

    #[test]
    fn failed_resolution_is_terminal() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let platform = ScriptedPlatform::new();
        platform.push_statuses([status(Mergeability::Conflicting, MergeReadiness::Blocked)]);
        let clock = FakeClock::new();
        let cfg = config();
        let controller = PrController::new(&platform, &git, &clock, &cfg);

        let mut resolve = || -> Result<()> { Err(anyhow::anyhow!("markers remain")) };
        let outcome = controller
            .drive_to_merge(5, "main", &mut resolve)
            .expect("drive");
        match outcome {
            PrOutcome::TimedOut { attempts, reason, .. } => {
                assert_eq!(attempts, 1);
                assert!(reason.contains("markers remain"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(platform.status_calls(), 1);
    }

    #[test]
    fn failed_merge_rechecks_state_once() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let platform = ScriptedPlatform::new();
        platform.push_statuses([status(Mergeability::Ready, MergeReadiness::Clean)]);
        platform.fail_next_merge("base branch was modified", PrState::Merged);
        let clock = FakeClock::new();
        let cfg = config();
        let controller = PrController::new(&platform, &git, &clock, &cfg);

        let mut resolve = || -> Result<()> { Ok(()) };
        let outcome = controller
            .drive_to_merge(9, "main", &mut resolve)
            .expect("drive");
        assert_eq!(outcome, PrOutcome::Merged { pr: 9 });
        assert_eq!(platform.state_calls(), 1);
        assert_eq!(clock.total_slept(), cfg.pr.recheck_delay());
    }

    #[test]
    fn open_reuses_existing_and_truncates_title() {
        let repo = TestRepo::new().expect("repo");
        let git = repo.git();
        let platform = ScriptedPlatform::new();
        platform.set_existing("plan/01-01-x", 41);
        let clock = FakeClock::new();
        let mut cfg = config();
        cfg.pr.title_max_len = 10;
        let controller = PrController::new(&platform, &git, &clock, &cfg);

        assert_eq!(
            controller
                .open("plan/01-01-x", "main", "t", String::new())
                .expect("open"),
            41
        );
        let pr = controller
            .open("plan/01-02-y", "main", "01-02: a very long title", String::new())
            .expect("open");
        assert_eq!(platform.created()[0].title, "01-02: a v");
        assert_eq!(platform.created()[0].head, "plan/01-02-y");
        assert_ne!(pr, 41);
    }
}
