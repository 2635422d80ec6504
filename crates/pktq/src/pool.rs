//! Lock-free recycling pool for packet buffers.
//!
//! # Synchronization protocol
//!
//! The pool is a single-producer single-consumer ring of buffer handles.
//! On the transmit path both roles run on the engine thread (it recycles
//! what it sent and re-acquires on the next allocation), but the protocol
//! stays safe with the producer and consumer on different threads:
//!
//! - The producer writes the slot, then store-releases `prod`; the
//!   consumer's acquire load of `prod` synchronizes the slot write.
//! - The consumer empties the slot, then store-releases `cons`; the
//!   producer's acquire load of `cons` observes the slot becoming free.
//!
//! The ring is never blocking. A push into a full pool falls through to the
//! slow path (the handle is dropped to the allocator); a pop refuses any
//! buffer whose reference count shows a concurrent holder, because a frame
//! cloned in flight may still read the data area.
//!
//! Indices are plain positions, not sequence numbers: the ring size is
//! arbitrary and `next(i)` wraps to 0, so one slot is kept empty to tell
//! full from empty (`empty: p == c`, `full: next(p) == c`).

use crate::invariants::debug_assert_pool_slot_empty;
use crate::skb::{SkBuff, SkbHandle};
use crate::error::TxError;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Recycling counters, snapshot-readable.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pushed: AtomicU64,
    popped: AtomicU64,
    freed: AtomicU64,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Handles recycled into the pool.
    pub push: u64,
    /// Handles re-acquired from the pool.
    pub pop: u64,
    /// Handles released through the slow path (pool full or teardown).
    pub free: u64,
}

/// SPSC recycling ring of [`SkbHandle`]s.
pub struct BufferPool {
    prod: CachePadded<AtomicUsize>,
    cons: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<Option<SkbHandle>>]>,
    stats: PoolCounters,
}

// Safety: the slot cells are only touched under the index protocol above;
// each slot has exactly one writer at any time.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

impl BufferPool {
    /// Creates a pool with `size` slots (usable capacity `size - 1`).
    ///
    /// # Panics
    ///
    /// Panics if `size < 2`.
    pub fn new(size: usize) -> Self {
        assert!(size >= 2, "pool needs at least two slots");
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || UnsafeCell::new(None));
        Self {
            prod: CachePadded::new(AtomicUsize::new(0)),
            cons: CachePadded::new(AtomicUsize::new(0)),
            slots: slots.into_boxed_slice(),
            stats: PoolCounters::default(),
        }
    }

    #[inline]
    fn next(&self, i: usize) -> usize {
        let n = i + 1;
        if n == self.slots.len() {
            0
        } else {
            n
        }
    }

    /// Usable capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Current occupancy. Racy by nature; exact only at quiescence.
    pub fn len(&self) -> usize {
        let p = self.prod.load(Ordering::Relaxed);
        let c = self.cons.load(Ordering::Relaxed);
        (p + self.slots.len() - c) % self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recycles a handle into the pool.
    ///
    /// Returns `false` when the pool is full: the handle is released to the
    /// allocator instead and the slow-path counter is bumped.
    pub fn push(&self, skb: SkbHandle) -> bool {
        let p = self.prod.load(Ordering::Relaxed);
        let c = self.cons.load(Ordering::Acquire);
        let n = self.next(p);
        if n == c {
            self.stats.freed.fetch_add(1, Ordering::Relaxed);
            drop(skb);
            return false;
        }

        // SAFETY: slot p is outside the occupied range [c, p), so the
        // consumer does not touch it; only this producer writes it until
        // the release store below publishes it.
        unsafe {
            let slot = &mut *self.slots[p].get();
            debug_assert_pool_slot_empty!(slot);
            *slot = Some(skb);
        }
        self.prod.store(n, Ordering::Release);
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Re-acquires a recycled handle.
    ///
    /// Returns `None` when the pool is empty or when the head buffer still
    /// has another holder (a reference count of 2 or more means a cloned
    /// in-flight frame has not let go yet; the buffer stays put).
    pub fn pop(&self) -> Option<SkbHandle> {
        let c = self.cons.load(Ordering::Relaxed);
        let p = self.prod.load(Ordering::Acquire);
        if c == p {
            return None;
        }

        // SAFETY: slot c is inside the occupied range [c, p): the acquire
        // load of prod synchronized with the producer's publish, and the
        // producer will not rewrite the slot until cons advances past it.
        let slot = unsafe { &mut *self.slots[c].get() };
        match slot.as_ref() {
            Some(handle) if Arc::strong_count(handle) < 2 => {}
            _ => return None,
        }
        let out = slot.take();
        self.cons.store(self.next(c), Ordering::Release);
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        out
    }

    /// Releases every pooled handle to the allocator. Returns the number
    /// flushed. Consumer-side operation.
    pub fn flush(&self) -> usize {
        let mut flushed = 0;
        loop {
            let c = self.cons.load(Ordering::Relaxed);
            let p = self.prod.load(Ordering::Acquire);
            if c == p {
                break;
            }
            // SAFETY: same occupied-range argument as pop(); teardown drops
            // the handle regardless of its reference count.
            let slot = unsafe { &mut *self.slots[c].get() };
            drop(slot.take());
            self.cons.store(self.next(c), Ordering::Release);
            flushed += 1;
        }
        self.stats.freed.fetch_add(flushed as u64, Ordering::Relaxed);
        flushed
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            push: self.stats.pushed.load(Ordering::Relaxed),
            pop: self.stats.popped.load(Ordering::Relaxed),
            free: self.stats.freed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Per-CPU state owned by one drain carrier: its recycling pool.
///
/// The drain is the pool's only producer and only consumer, which is what
/// makes the SPSC contract hold per CPU.
pub struct CpuLocal {
    /// Transmit-side recycling pool.
    pub tx_pool: BufferPool,
}

impl CpuLocal {
    pub fn new(pool_size: usize) -> Self {
        Self {
            tx_pool: BufferPool::new(pool_size),
        }
    }

    /// Pool-first buffer allocation: reuse a recycled buffer of the right
    /// geometry, fall back to a fresh node-preferred allocation.
    pub(crate) fn alloc_skb(&self, size: usize, node: Option<usize>) -> Result<SkBuff, TxError> {
        if let Some(handle) = self.tx_pool.pop() {
            match Arc::try_unwrap(handle) {
                Ok(mut skb) if skb.capacity() >= size => {
                    skb.reset();
                    return Ok(skb);
                }
                // wrong geometry: retire it and fall through
                Ok(skb) => drop(skb),
                Err(shared) => drop(shared),
            }
        }
        SkBuff::alloc(size, node)
    }
}
