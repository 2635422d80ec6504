//! Double-buffered transmit ring shared between one producer and the drain
//! engine.

use crate::backoff::Backoff;
use crate::config::MAX_SANE_LEN;
use crate::error::TxError;
use crate::invariants::{debug_assert_monotonic, debug_assert_word_in_bounds};
use crate::sock::TxOwner;
use crate::stop::StopToken;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// SWAP PROTOCOL & MEMORY ORDERING
// =============================================================================
//
// The ring is one contiguous region split into two equal halves. At any
// moment one half belongs to the producer (being filled) and the other to
// the engine (being drained). Two monotonically increasing stamps carry the
// whole handshake:
//
//   engine side                          producer side
//   -----------                          -------------
//   swap = cons.fetch_add(1)             wait until cons >= prod
//   spin until prod == swap + 1          write descriptors + terminator
//   drain half (swap & 1)                store-release prod = prod + 1
//   ... drain ...
//   write len = 0 at the half base
//
// ## Ordering
//
// - `prod` is store-released by the producer's commit and acquire-loaded by
//   the engine's spin: the descriptor writes are visible before the engine
//   walks them.
// - `cons` is bumped with release at the start of a drain. The previous
//   drain's half clearing precedes that bump in program order, so a
//   producer that acquire-loads the new `cons` value also observes the
//   cleared half before refilling it.
// - Everything else in a half has a single owner while that half is
//   resident on its side of the swap; those accesses need no atomics.
//
// ## Termination
//
// A half is terminated in-band: a descriptor with `len == 0`, or the half
// boundary, ends the live region. The producer writes a terminator after
// the last descriptor; the engine rewrites one at the half base after the
// drain.
//
// ## Cancellation
//
// The engine's spin honors the give-up predicate every iteration and
// returns interrupted without rolling the stamps back; the claimed half
// stays claimed and the next drain continues from the stamp state as-is.
//
// =============================================================================

/// Descriptor header bytes: `u64` nanosecond timestamp plus `u64` length.
pub(crate) const DESC_HDR_LEN: usize = 16;

/// Rounds a payload length up to the 8-byte descriptor granularity.
#[inline]
pub(crate) const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Double-buffered descriptor queue with the swap/producer/consumer stamp
/// protocol.
///
/// The backing store is allocated as `u64` words so descriptor headers are
/// naturally aligned.
pub struct TxRing {
    prod: CachePadded<AtomicU64>,
    cons: CachePadded<AtomicU64>,
    /// Bytes per half.
    size: usize,
    buf: Box<[UnsafeCell<u64>]>,
}

// Safety: cross-thread access to the payload region is ordered by the
// prod/cons protocol documented above.
unsafe impl Send for TxRing {}
unsafe impl Sync for TxRing {}

impl TxRing {
    /// Creates a ring with `size` bytes per half (rounded up to 8 bytes).
    /// Both halves start terminated.
    pub fn new(size: usize) -> Self {
        let size = align8(size.max(DESC_HDR_LEN));
        let words = (2 * size) / 8;
        let mut buf = Vec::with_capacity(words);
        buf.resize_with(words, || UnsafeCell::new(0));
        Self {
            prod: CachePadded::new(AtomicU64::new(0)),
            cons: CachePadded::new(AtomicU64::new(0)),
            size,
            buf: buf.into_boxed_slice(),
        }
    }

    /// Bytes per half.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Producer stamp, for observers.
    #[inline]
    pub fn prod_stamp(&self) -> u64 {
        self.prod.load(Ordering::Relaxed)
    }

    /// Consumer stamp, for observers.
    #[inline]
    pub fn cons_stamp(&self) -> u64 {
        self.cons.load(Ordering::Relaxed)
    }

    /// The single-writer fill handle for this ring.
    pub fn producer(&self) -> TxProducer<'_> {
        TxProducer {
            ring: self,
            off: 0,
            dirty: false,
        }
    }

    /// Claims the next half for draining.
    ///
    /// With a bound worker this spins until the producer commits, honoring
    /// the give-up predicate each iteration. A synchronous caller owns both
    /// sides of the ring, so the handshake short-circuits: the engine
    /// assumes the half was already committed and brings `prod` level with
    /// the claimed stamp.
    pub(crate) fn swap_and_wait(&self, owner: TxOwner, stop: &StopToken) -> Result<u64, TxError> {
        let swap = self.cons.fetch_add(1, Ordering::Release);
        match owner {
            TxOwner::Worker(_) => {
                let mut backoff = Backoff::new();
                while self.prod.load(Ordering::Acquire) != swap + 1 {
                    if stop.should_give_up() {
                        return Err(TxError::Interrupted);
                    }
                    backoff.snooze();
                }
            }
            TxOwner::Caller => {
                self.prod.store(swap + 1, Ordering::Release);
            }
        }
        Ok(swap)
    }

    /// Walks the half selected by `swap`.
    pub(crate) fn cursor(&self, swap: u64) -> DescCursor<'_> {
        let begin = ((swap & 1) as usize) * self.size;
        DescCursor {
            ring: self,
            end: begin + self.size,
            off: begin,
        }
    }

    /// Re-terminates the drained half in-band.
    pub(crate) fn clear_half(&self, swap: u64) {
        let begin = ((swap & 1) as usize) * self.size;
        self.set_word(begin + 8, 0);
    }

    #[inline]
    fn word(&self, byte_off: usize) -> u64 {
        debug_assert_word_in_bounds!(byte_off, 2 * self.size);
        // SAFETY: in-bounds aligned word; visibility is ordered by the
        // prod/cons protocol.
        unsafe { *self.buf[byte_off / 8].get() }
    }

    #[inline]
    fn set_word(&self, byte_off: usize, value: u64) {
        debug_assert_word_in_bounds!(byte_off, 2 * self.size);
        // SAFETY: in-bounds aligned word; the writer owns this half until
        // the next stamp release.
        unsafe {
            *self.buf[byte_off / 8].get() = value;
        }
    }

    /// Byte view starting at an 8-aligned offset.
    #[inline]
    fn bytes(&self, byte_off: usize, len: usize) -> &[u8] {
        if len == 0 {
            return &[];
        }
        debug_assert!(byte_off % 8 == 0 && byte_off + len <= 2 * self.size);
        // SAFETY: in-bounds contiguous cells; the reader owns this half for
        // the duration of the borrow.
        unsafe {
            let base = self.buf[byte_off / 8].get().cast::<u8>();
            std::slice::from_raw_parts(base, len)
        }
    }

    /// Copies payload bytes in at an 8-aligned offset.
    #[inline]
    fn copy_in(&self, byte_off: usize, src: &[u8]) {
        debug_assert!(byte_off % 8 == 0 && byte_off + src.len() <= 2 * self.size);
        // SAFETY: in-bounds write into the half owned by the producer.
        unsafe {
            let base = self.buf[byte_off / 8].get().cast::<u8>();
            std::ptr::copy_nonoverlapping(src.as_ptr(), base, src.len());
        }
    }
}

impl std::fmt::Debug for TxRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxRing")
            .field("size", &self.size)
            .field("prod", &self.prod_stamp())
            .field("cons", &self.cons_stamp())
            .finish()
    }
}

/// One descriptor as seen by the drain.
pub(crate) struct TxDesc<'a> {
    /// Target send time; 0 means immediately.
    pub nsec: u64,
    /// Length claimed by the header.
    pub wire_len: usize,
    /// Payload bytes actually present in the half (clamped at the half
    /// boundary).
    pub payload: &'a [u8],
}

/// Header-length walk over one half, stopping at the in-band terminator or
/// the half boundary.
pub(crate) struct DescCursor<'a> {
    ring: &'a TxRing,
    end: usize,
    off: usize,
}

impl<'a> DescCursor<'a> {
    /// The descriptor under the cursor, or `None` at the end of the live
    /// region. Debug builds also refuse implausible headers.
    pub(crate) fn peek(&self) -> Option<TxDesc<'a>> {
        if self.off + DESC_HDR_LEN > self.end {
            return None;
        }
        let wire_len = self.ring.word(self.off + 8) as usize;
        if wire_len == 0 {
            return None;
        }

        #[cfg(debug_assertions)]
        if wire_len > MAX_SANE_LEN {
            tracing::error!(
                offset = self.off,
                len = wire_len,
                "implausible descriptor length, aborting walk"
            );
            return None;
        }

        let nsec = self.ring.word(self.off);
        let avail = wire_len.min(self.end - self.off - DESC_HDR_LEN);
        Some(TxDesc {
            nsec,
            wire_len,
            payload: self.ring.bytes(self.off + DESC_HDR_LEN, avail),
        })
    }

    /// Steps past the descriptor under the cursor. Only meaningful after
    /// `peek()` returned `Some`.
    pub(crate) fn advance(&mut self) {
        let wire_len = self.ring.word(self.off + 8) as usize;
        self.off = self
            .off
            .saturating_add(DESC_HDR_LEN + align8(wire_len))
            .min(self.end);
    }
}

/// Single-writer fill handle.
///
/// One producer per ring: the handle may live on a different thread from
/// the engine, but there must be exactly one. Descriptors are staged with
/// [`inject`](TxProducer::inject) and published with
/// [`commit`](TxProducer::commit); a commit hands the filled half to the
/// engine and flips the fill side.
pub struct TxProducer<'a> {
    ring: &'a TxRing,
    off: usize,
    dirty: bool,
}

impl TxProducer<'_> {
    /// True when the engine has claimed every committed half, which makes
    /// the current fill half safe to write.
    #[inline]
    pub fn writable(&self) -> bool {
        self.ring.cons.load(Ordering::Acquire) >= self.ring.prod.load(Ordering::Relaxed)
    }

    /// Stages one descriptor in the fill half.
    ///
    /// Returns `false` when the engine has not yet claimed the previous
    /// commit, when the payload is implausibly large, or when the half is
    /// out of space.
    pub fn inject(&mut self, payload: &[u8], nsec: u64) -> bool {
        if payload.len() > MAX_SANE_LEN {
            return false;
        }
        if !self.dirty {
            if !self.writable() {
                return false;
            }
            self.off = 0;
        }

        let size = self.ring.size;
        let need = DESC_HDR_LEN + align8(payload.len());
        if self.off + need > size {
            return false;
        }

        let base = ((self.ring.prod.load(Ordering::Relaxed) & 1) as usize) * size;
        let at = base + self.off;
        self.ring.set_word(at, nsec);
        self.ring.set_word(at + 8, payload.len() as u64);
        self.ring.copy_in(at + DESC_HDR_LEN, payload);

        // keep the live region terminated: zero the next length slot while
        // there is room for another header
        let next = self.off + need;
        if next + DESC_HDR_LEN <= size {
            self.ring.set_word(base + next + 8, 0);
        }

        self.off = next;
        self.dirty = true;
        true
    }

    /// Publishes the staged half to the engine. Returns `false` when
    /// nothing was staged.
    pub fn commit(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        let prod = self.ring.prod.load(Ordering::Relaxed);
        debug_assert_monotonic!("prod", prod, prod + 1);
        self.ring.prod.store(prod + 1, Ordering::Release);
        self.dirty = false;
        self.off = 0;
        true
    }
}
