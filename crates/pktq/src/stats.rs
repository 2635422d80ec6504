//! Sparse per-CPU statistics.
//!
//! Each counter is an array of cache-padded cells, one per CPU, plus one
//! shared cell for callers without a CPU identity. A worker adds to its own
//! cell with a plain load/store pair (exactly one writer per cell, so no
//! read-modify-write is needed); anonymous callers take the shared cell
//! with a relaxed `fetch_add`. Readers sum every cell, which makes reads
//! eventually consistent and the write path free of hot-path atomics.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

fn num_cpus() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// One sparse counter: per-CPU cells plus a shared overflow cell.
#[derive(Debug)]
pub struct SparseCounter {
    cells: Box<[CachePadded<AtomicU64>]>,
    shared: CachePadded<AtomicU64>,
}

impl SparseCounter {
    /// Creates a counter with one cell per CPU.
    pub fn new(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        let mut cells = Vec::with_capacity(cpus);
        cells.resize_with(cpus, || CachePadded::new(AtomicU64::new(0)));
        Self {
            cells: cells.into_boxed_slice(),
            shared: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Adds to the cell owned by `cpu`. Callers must be the only writer for
    /// that CPU; that is what keeps this a plain store.
    #[inline]
    pub fn add_at(&self, cpu: usize, n: u64) {
        if n == 0 {
            return;
        }
        let cell = &self.cells[cpu % self.cells.len()];
        let cur = cell.load(Ordering::Relaxed);
        cell.store(cur + n, Ordering::Relaxed);
    }

    /// Adds from a caller without a CPU identity (synchronous flush paths).
    #[inline]
    pub fn add(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.shared.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_at(&self, cpu: usize) {
        self.add_at(cpu, 1);
    }

    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    /// Sums every cell. Eventually consistent while writers are active.
    pub fn read(&self) -> u64 {
        let mut total = self.shared.load(Ordering::Relaxed);
        for cell in &*self.cells {
            total = total.wrapping_add(cell.load(Ordering::Relaxed));
        }
        total
    }
}

impl Default for SparseCounter {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

/// Global transmit-core counters.
#[derive(Debug, Default)]
pub struct GlobalStats {
    pub recv: SparseCounter,
    pub sent: SparseCounter,
    pub lost: SparseCounter,
    /// Surfaced as `drop` in the counter set.
    pub dropped: SparseCounter,
    pub disc: SparseCounter,
    pub abrt: SparseCounter,
    pub os_free: SparseCounter,
}

/// Point-in-time view of [`GlobalStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalStatsSnapshot {
    pub recv: u64,
    pub sent: u64,
    pub lost: u64,
    pub dropped: u64,
    pub disc: u64,
    pub abrt: u64,
    pub os_free: u64,
}

impl GlobalStats {
    pub fn new(cpus: usize) -> Self {
        Self {
            recv: SparseCounter::new(cpus),
            sent: SparseCounter::new(cpus),
            lost: SparseCounter::new(cpus),
            dropped: SparseCounter::new(cpus),
            disc: SparseCounter::new(cpus),
            abrt: SparseCounter::new(cpus),
            os_free: SparseCounter::new(cpus),
        }
    }

    pub fn snapshot(&self) -> GlobalStatsSnapshot {
        GlobalStatsSnapshot {
            recv: self.recv.read(),
            sent: self.sent.read(),
            lost: self.lost.read(),
            dropped: self.dropped.read(),
            disc: self.disc.read(),
            abrt: self.abrt.read(),
            os_free: self.os_free.read(),
        }
    }
}

/// Per-socket transmit counters.
#[derive(Debug, Default)]
pub struct TxStats {
    pub recv: SparseCounter,
    pub sent: SparseCounter,
    pub lost: SparseCounter,
    /// Surfaced as `drop` in the counter set.
    pub dropped: SparseCounter,
    pub disc: SparseCounter,
}

/// Point-in-time view of [`TxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStatsSnapshot {
    pub recv: u64,
    pub sent: u64,
    pub lost: u64,
    pub dropped: u64,
    pub disc: u64,
}

impl TxStats {
    pub fn new(cpus: usize) -> Self {
        Self {
            recv: SparseCounter::new(cpus),
            sent: SparseCounter::new(cpus),
            lost: SparseCounter::new(cpus),
            dropped: SparseCounter::new(cpus),
            disc: SparseCounter::new(cpus),
        }
    }

    pub fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            recv: self.recv.read(),
            sent: self.sent.read(),
            lost: self.lost.read(),
            dropped: self.dropped.read(),
            disc: self.disc.read(),
        }
    }
}
