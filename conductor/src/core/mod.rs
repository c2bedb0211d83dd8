//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod branch_name;
pub mod conflict_rules;
pub mod ids;
pub mod infra_detect;
pub mod overlap;
pub mod plan_record;
pub mod pr_poll;
pub mod resume;
pub mod roadmap;
pub mod sentinel;
pub mod types;
