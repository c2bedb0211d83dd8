//! Conductor: drives a coding agent through a milestone of planned work.
//!
//! Phases and plans live under `.planning/`. Each plan is executed by fresh
//! agent sessions on its own branch, lands through a pull request, and is
//! marked done by a summary file. The crate keeps a strict layering:
//!
//! - **[`core`]**: Pure, deterministic logic (ids, plan parsing, resume
//!   decisions, branch names, conflict rules, PR polling decisions).
//! - **[`io`]**: Side-effecting adapters (filesystem layout, git, `gh`, agent
//!   and infra processes, prompt rendering).
//!
//! Orchestration modules ([`resolve`], [`walk`], [`branching`], [`dispatch`],
//! [`conflicts`], [`pr`], [`infra`], [`orchestrate`]) combine the two.

pub mod branching;
pub mod conflicts;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod infra;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod pr;
pub mod resolve;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod walk;
