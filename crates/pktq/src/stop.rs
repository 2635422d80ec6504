//! Cooperative cancellation for the spin sites.
//!
//! Every spin loop in the core (ring swap, pacing wait, batch retry) checks
//! a give-up predicate once per iteration. The predicate folds the two
//! conditions the drain honors: an explicit stop request on the owning
//! worker, and a pending-signal notification from the embedding runtime.
//! Injecting it as a handle keeps the engine testable off-kernel with a
//! mock trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct StopState {
    stop: AtomicBool,
    signal: AtomicBool,
}

/// Cloneable give-up handle shared between a drain and its controller.
///
/// Triggers are idempotent; once raised, a flag stays raised until cleared
/// by the controller.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    inner: Arc<StopState>,
}

impl StopToken {
    /// Creates a token with nothing raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the owning worker to stop.
    #[inline]
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Release);
    }

    /// Marks a signal as pending for the draining task.
    #[inline]
    pub fn raise_signal(&self) {
        self.inner.signal.store(true, Ordering::Release);
    }

    /// Clears a previously raised signal; a delivered signal does not keep
    /// interrupting subsequent drains.
    #[inline]
    pub fn clear_signal(&self) {
        self.inner.signal.store(false, Ordering::Release);
    }

    /// Returns `true` once a stop was requested.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire)
    }

    /// The give-up predicate: stop requested or signal pending.
    #[inline]
    pub fn should_give_up(&self) -> bool {
        self.inner.stop.load(Ordering::Acquire) || self.inner.signal.load(Ordering::Acquire)
    }
}
