//! Stable exit codes for the `kubediag` CLI.

use crate::core::types::{AbortReason, Outcome};

/// A findings report was produced.
pub const OK: i32 = 0;
/// Invalid configuration or another error outside the conversation.
pub const INVALID: i32 = 1;
/// The session ended before the backend reached a conclusion.
pub const INCOMPLETE: i32 = 2;
/// The backend failed too many times in a row.
pub const BACKEND_FAILED: i32 = 3;
/// The operator interrupted the session.
pub const CANCELLED: i32 = 130;

/// Exit code for a finished session.
pub fn for_outcome(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Done => OK,
        Outcome::Aborted(AbortReason::Cancelled) => CANCELLED,
        Outcome::Aborted(reason) if reason.is_failure() => BACKEND_FAILED,
        Outcome::Aborted(_) => INCOMPLETE,
    }
}
