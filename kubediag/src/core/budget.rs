//! Wall-clock budget helpers for a diagnosis session.

use std::time::{Duration, Instant};

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

/// Per-command timeout: `cap`, shortened to whatever is left of the session.
pub fn command_timeout(deadline: Instant, cap: Duration) -> Option<Duration> {
    remaining_budget(deadline).map(|remaining| remaining.min(cap))
}
