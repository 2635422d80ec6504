//! Wall-clock reads and cooperative pacing waits.
//!
//! Sub-microsecond pacing at line rate rules out sleeping; the wait is a
//! relax-hinted spin on a thread the caller is expected to have pinned. The
//! give-up predicate is evaluated at least once per iteration and wins over
//! the deadline.

use crate::backoff;
use crate::stop::StopToken;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock in nanoseconds since the Unix epoch.
#[inline]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

/// Spins until the clock reaches `ts` or the give-up predicate fires.
///
/// Returns the last observed clock, which may be earlier than `ts` when the
/// wait was abandoned.
pub fn wait_until(ts: u64, stop: &StopToken) -> u64 {
    loop {
        let now = now_ns();
        if stop.should_give_up() || now >= ts {
            return now;
        }
        backoff::cpu_relax();
    }
}
