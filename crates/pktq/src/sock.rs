//! Socket transmit options: the per-ring slots a drain operates on.

use crate::ring::TxRing;
use crate::stats::TxStats;
use std::sync::atomic::{AtomicBool, Ordering};

/// Which carrier is running a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOwner {
    /// A bound worker thread, pinned to the given CPU. Stats go to that
    /// CPU's sparse cell and the ring swap performs the full handshake.
    Worker(usize),
    /// A synchronous flush on an arbitrary task: no handshake, shared
    /// stats cell.
    Caller,
}

/// One transmit ring plus its submission configuration.
pub struct TxSlot {
    ring: TxRing,
    if_index: u32,
    /// `None` lets the driver pick the hardware queue.
    hw_queue: Option<usize>,
    /// Set while a bound worker owns the ring; flushes become no-ops.
    worker: AtomicBool,
}

impl TxSlot {
    pub fn new(ring: TxRing, if_index: u32, hw_queue: Option<usize>) -> Self {
        Self {
            ring,
            if_index,
            hw_queue,
            worker: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn ring(&self) -> &TxRing {
        &self.ring
    }

    #[inline]
    pub fn if_index(&self) -> u32 {
        self.if_index
    }

    #[inline]
    pub fn hw_queue(&self) -> Option<usize> {
        self.hw_queue
    }

    #[inline]
    pub fn has_worker(&self) -> bool {
        self.worker.load(Ordering::Acquire)
    }

    pub(crate) fn set_worker(&self, owned: bool) {
        self.worker.store(owned, Ordering::Release);
    }
}

impl std::fmt::Debug for TxSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSlot")
            .field("if_index", &self.if_index)
            .field("hw_queue", &self.hw_queue)
            .field("worker", &self.has_worker())
            .finish()
    }
}

/// A socket's transmit side: its rings and counters.
#[derive(Debug)]
pub struct TxOpt {
    queues: Vec<TxSlot>,
    pub stats: TxStats,
}

impl Default for TxOpt {
    fn default() -> Self {
        Self::new()
    }
}

impl TxOpt {
    pub fn new() -> Self {
        Self {
            queues: Vec::new(),
            stats: TxStats::default(),
        }
    }

    /// Adds a ring slot, returning its index.
    pub fn add_queue(&mut self, slot: TxSlot) -> usize {
        self.queues.push(slot);
        self.queues.len() - 1
    }

    #[inline]
    pub fn slot(&self, idx: usize) -> Option<&TxSlot> {
        self.queues.get(idx)
    }

    #[inline]
    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_index_in_order() {
        let mut opt = TxOpt::new();
        let a = opt.add_queue(TxSlot::new(TxRing::new(256), 3, None));
        let b = opt.add_queue(TxSlot::new(TxRing::new(256), 4, Some(1)));
        assert_eq!((a, b), (0, 1));
        assert_eq!(opt.slot(0).unwrap().if_index(), 3);
        assert_eq!(opt.slot(1).unwrap().hw_queue(), Some(1));
        assert!(opt.slot(2).is_none());
    }

    #[test]
    fn test_worker_flag_round_trip() {
        let slot = TxSlot::new(TxRing::new(256), 1, None);
        assert!(!slot.has_worker());
        slot.set_worker(true);
        assert!(slot.has_worker());
        slot.set_worker(false);
        assert!(!slot.has_worker());
    }
}
