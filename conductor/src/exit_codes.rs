//! Stable exit codes for the conductor CLI.

/// Every selected unit completed (or was skipped).
pub const OK: i32 = 0;
/// A unit failed, a PR did not merge in time, or the run could not start.
pub const FAILURE: i32 = 1;
/// A phase has no plans; run planning for it before continuing.
pub const NEEDS_PLANNING: i32 = 2;
/// Interrupted with Ctrl-C after exit hooks ran.
pub const INTERRUPTED: i32 = 130;
