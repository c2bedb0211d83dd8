//! Pure decision logic for the merge polling loop.

use std::time::Duration;

use crate::core::types::{MergeReadiness, Mergeability, PrStatus};

/// Why the loop keeps waiting on this observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Checks or reviews are still pending.
    Blocked,
    /// The platform has not finished computing mergeability.
    Computing,
}

/// What the loop should do after one status observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    Wait(WaitReason),
    ResolveConflicts,
    Merge,
}

pub fn next_action(status: PrStatus) -> PollAction {
    match (status.mergeability, status.readiness) {
        (Mergeability::Conflicting, _) => PollAction::ResolveConflicts,
        (Mergeability::Ready, MergeReadiness::Blocked) => PollAction::Wait(WaitReason::Blocked),
        (Mergeability::Ready, MergeReadiness::Clean | MergeReadiness::Degraded) => {
            PollAction::Merge
        }
        (Mergeability::Indeterminate, _) => PollAction::Wait(WaitReason::Computing),
    }
}

/// Number of status observations a timeout budget allows (at least one).
pub fn attempt_budget(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let attempts = timeout.as_millis() / interval.as_millis().max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
}
