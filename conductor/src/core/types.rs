//! Shared deterministic types for orchestration logic.
//!
//! These types define stable contracts between components. They carry no I/O
//! and must stay deterministic across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Derived completion state of a phase (or any unit with plan definitions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Plan definitions and completion artifacts are equal in number.
    Complete { total: usize },
    /// Counts differ: plans still missing artifacts, or orphan artifacts.
    Incomplete { done: usize, total: usize },
    /// No plan definitions exist yet; an external planning step is required.
    NeedsPlanning,
}

impl Completion {
    /// Classify from definition and artifact counts.
    pub fn from_counts(definitions: usize, artifacts: usize) -> Self {
        if definitions == 0 {
            return Completion::NeedsPlanning;
        }
        if artifacts == definitions {
            return Completion::Complete { total: definitions };
        }
        Completion::Incomplete {
            done: artifacts,
            total: definitions,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, Completion::Complete { .. })
    }
}

/// How plan branches are based relative to trunk and to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStrategy {
    /// Every plan branch starts from trunk.
    #[default]
    Independent,
    /// Every plan branch starts from the previous plan's branch.
    Chain,
    /// One branch for the whole run; plans commit directly onto it.
    Single,
}

impl BranchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            BranchStrategy::Independent => "independent",
            BranchStrategy::Chain => "chain",
            BranchStrategy::Single => "single",
        }
    }
}

impl fmt::Display for BranchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BranchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "independent" => Ok(BranchStrategy::Independent),
            "chain" => Ok(BranchStrategy::Chain),
            "single" => Ok(BranchStrategy::Single),
            other => Err(format!(
                "unknown branch strategy '{other}' (expected independent, chain, or single)"
            )),
        }
    }
}

/// Three-valued interpretation of an agent session transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    /// The success sentinel was emitted.
    Success,
    /// The failure sentinel was emitted; `reason` is the text that followed it.
    Failure { reason: String },
    /// Neither sentinel was emitted.
    Ambiguous,
}

/// Remote judgment of whether a change request merges without conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mergeability {
    Ready,
    Conflicting,
    /// The platform is still computing mergeability.
    Indeterminate,
}

/// Remote judgment of whether required checks and reviews are satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReadiness {
    Blocked,
    Clean,
    /// Non-required checks failing or pending; merging is still acceptable.
    Degraded,
}

/// One observation of a change request's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrStatus {
    pub mergeability: Mergeability,
    pub readiness: MergeReadiness,
}

/// Authoritative lifecycle state of a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// How a conflicting file may be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictClass {
    /// Safe to resolve by taking trunk's version.
    Unrelated,
    /// Requires a content-aware merge.
    Related,
}
