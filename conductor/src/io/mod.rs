//! I/O adapters: filesystem layout, git, review platform, agent and infra processes.

pub mod agent;
pub mod clock;
pub mod config;
pub mod git;
pub mod infra_backend;
pub mod layout;
pub mod platform;
pub mod process;
pub mod prompt;
