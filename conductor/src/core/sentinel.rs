//! Agent completion protocol.
//!
//! A session signals its result by printing a success or failure sentinel.
//! Sessions that print neither are `Ambiguous`, and only count as successful
//! when corroborated by side effects (see [`corroborate`]).

use serde::Serialize;

use crate::core::types::AgentOutcome;

/// Sentinel tokens the agent is instructed to print at session end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sentinels {
    pub success: String,
    pub failure: String,
}

/// Interpret a transcript. Success wins over failure when both appear.
pub fn interpret(transcript: &str, sentinels: &Sentinels) -> AgentOutcome {
    if transcript.contains(&sentinels.success) {
        return AgentOutcome::Success;
    }
    if let Some(index) = transcript.rfind(&sentinels.failure) {
        let tail = &transcript[index + sentinels.failure.len()..];
        let line = tail.lines().next().unwrap_or("");
        let reason = line.trim().trim_start_matches(':').trim();
        let reason = if reason.is_empty() {
            "no reason given".to_string()
        } else {
            reason.to_string()
        };
        return AgentOutcome::Failure { reason };
    }
    AgentOutcome::Ambiguous
}

/// Observable effects of a dispatch, gathered after the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideEffects {
    /// Commits created on the current branch during the session.
    pub new_commits: u32,
    /// The unit's completion artifact did not exist before and exists now.
    pub artifact_created: bool,
}

impl SideEffects {
    pub fn any(&self) -> bool {
        self.new_commits > 0 || self.artifact_created
    }
}

/// Final judgment on one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// `inferred` is true when success came from side effects, not a sentinel.
    Succeeded { inferred: bool },
    Failed { reason: String },
}

/// Combine a sentinel outcome with side-effect evidence.
///
/// Ambiguous sessions succeed only with evidence. This heuristic can be fooled
/// by an agent that commits partial work and then stops silently.
pub fn corroborate(outcome: &AgentOutcome, effects: SideEffects) -> Verdict {
    match outcome {
        AgentOutcome::Success => Verdict::Succeeded { inferred: false },
        AgentOutcome::Failure { reason } => Verdict::Failed {
            reason: reason.clone(),
        },
        AgentOutcome::Ambiguous if effects.any() => Verdict::Succeeded { inferred: true },
        AgentOutcome::Ambiguous => Verdict::Failed {
            reason: "ambiguous outcome without corroborating side effects".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> Sentinels {
        Sentinels {
            success: "TASK_COMPLETE".to_string(),
            failure: "TASK_FAILED".to_string(),
        }
    }

    #[test]
    fn success_sentinel_wins() {
        let out = "working...\nTASK_FAILED: flaky\nretried\nTASK_COMPLETE\n";
        assert_eq!(interpret(out, &sentinels()), AgentOutcome::Success);
    }

    #[test]
    fn failure_sentinel_captures_reason() {
        let out = "did stuff\nTASK_FAILED: migrations do not apply\nbye";
        assert_eq!(
            interpret(out, &sentinels()),
            AgentOutcome::Failure {
                reason: "migrations do not apply".to_string()
            }
        );
    }

    #[test]
    fn failure_without_reason_gets_placeholder() {
        assert_eq!(
            interpret("TASK_FAILED", &sentinels()),
            AgentOutcome::Failure {
                reason: "no reason given".to_string()
            }
        );
    }

    #[test]
    fn missing_sentinels_are_ambiguous() {
        assert_eq!(
            interpret("all good I think", &sentinels()),
            AgentOutcome::Ambiguous
        );
    }

    #[test]
    fn ambiguous_requires_side_effects() {
        let none = SideEffects::default();
        assert!(matches!(
            corroborate(&AgentOutcome::Ambiguous, none),
            Verdict::Failed { .. }
        ));

        let commits = SideEffects {
            new_commits: 2,
            artifact_created: false,
        };
        assert_eq!(
            corroborate(&AgentOutcome::Ambiguous, commits),
            Verdict::Succeeded { inferred: true }
        );

        let artifact = SideEffects {
            new_commits: 0,
            artifact_created: true,
        };
        assert_eq!(
            corroborate(&AgentOutcome::Ambiguous, artifact),
            Verdict::Succeeded { inferred: true }
        );
    }

    #[test]
    fn explicit_failure_ignores_side_effects() {
        let effects = SideEffects {
            new_commits: 3,
            artifact_created: true,
        };
        let outcome = AgentOutcome::Failure {
            reason: "nope".to_string(),
        };
        assert_eq!(
            corroborate(&outcome, effects),
            Verdict::Failed {
                reason: "nope".to_string()
            }
        );
    }
}
