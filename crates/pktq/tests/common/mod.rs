//! Shared test fixtures: a recording driver with programmable refusals.

use pktq_rs::{clock, Driver, SkbHandle, StopToken};
use std::sync::{Arc, Mutex};

/// One frame as the driver saw it.
#[derive(Debug, Clone)]
pub struct Submission {
    pub payload: Vec<u8>,
    pub queue: usize,
    pub xmit_more: bool,
    pub at_ns: u64,
}

#[derive(Default)]
struct MockState {
    log: Mutex<Vec<Submission>>,
    /// Accept this many frames, then refuse the rest. `None` accepts all.
    accept_limit: Option<usize>,
    /// Raise a signal on the given token once this many frames were seen.
    signal_after: Mutex<Option<(usize, StopToken)>>,
}

/// Recording driver. Clones share the same state, so a test can keep one
/// handle while the device owns another.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver that accepts the first `limit` frames and refuses the rest.
    pub fn accepting(limit: usize) -> Self {
        Self {
            state: Arc::new(MockState {
                accept_limit: Some(limit),
                ..MockState::default()
            }),
        }
    }

    /// Raises a signal on `token` as soon as `n` frames were accepted.
    pub fn raise_signal_after(&self, n: usize, token: StopToken) {
        *self.state.signal_after.lock().unwrap() = Some((n, token));
    }

    pub fn count(&self) -> usize {
        self.state.log.lock().unwrap().len()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.submissions().into_iter().map(|s| s.payload).collect()
    }

    pub fn more_flags(&self) -> Vec<bool> {
        self.submissions().into_iter().map(|s| s.xmit_more).collect()
    }
}

impl Driver for MockDriver {
    fn start_xmit(&self, skb: SkbHandle, queue: usize, xmit_more: bool) -> Result<(), SkbHandle> {
        let mut log = self.state.log.lock().unwrap();
        if let Some(limit) = self.state.accept_limit {
            if log.len() >= limit {
                return Err(skb);
            }
        }
        log.push(Submission {
            payload: skb.payload().to_vec(),
            queue,
            xmit_more,
            at_ns: clock::now_ns(),
        });
        let seen = log.len();
        drop(log);

        if let Some((after, token)) = &*self.state.signal_after.lock().unwrap() {
            if seen >= *after {
                token.raise_signal();
            }
        }
        // the handle drops here, the way a device releases a frame once it
        // is on the wire
        Ok(())
    }
}
