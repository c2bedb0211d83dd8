//! Domain failures surfaced by the orchestrator.
//!
//! These travel inside `anyhow::Error` and are recovered with `downcast_ref`
//! where the caller needs to pick a stop reason or exit code.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    /// An identifier did not resolve to a unit on disk.
    #[error("cannot resolve {kind} '{id}' under {}", .searched.display())]
    Resolution {
        kind: &'static str,
        id: String,
        searched: PathBuf,
    },

    /// The phase has no plan definitions; planning must happen first.
    #[error("phase {phase} has no plans (run planning for it first)")]
    NeedsPlanning { phase: String },

    /// The agent reported failure, or an ambiguous session left no evidence.
    #[error("agent failed on {unit}: {reason}")]
    AgentFailure { unit: String, reason: String },

    /// Conflict markers remained after automatic and agent-assisted resolution.
    #[error("unresolved conflicts on {branch}: {}", .files.join(", "))]
    ConflictUnresolvable { branch: String, files: Vec<String> },

    /// The change request did not merge within the polling budget.
    #[error("PR #{pr} not merged after {attempts} checks: {reason}")]
    MergeTimeout {
        pr: u64,
        attempts: u32,
        reason: String,
    },

    /// A health check never reported ready. Soft: logged, never halts a run.
    #[error("infra service '{service}' not ready after {attempts} checks")]
    InfraUnavailable { service: String, attempts: u32 },
}
