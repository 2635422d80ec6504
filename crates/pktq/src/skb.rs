//! Socket-buffer model for the transmit path.
//!
//! A [`SkBuff`] is created exclusive (`&mut`) while the engine fills it,
//! then published as a shared [`SkbHandle`]. From that point the reference
//! count is the ownership ledger: the engine's handle rides in the batch,
//! each device submission takes one more, and the recycling pool refuses to
//! reuse a buffer while anyone else still holds a count.

use crate::config::MIN_COPY_LEN;
use crate::error::TxError;
use crate::mem::DataBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared packet-buffer handle. Cloning is the cheap "take a reference"
/// operation; a deep copy goes through [`SkBuff::clone_deep`].
pub type SkbHandle = Arc<SkBuff>;

/// One packet buffer: linear data area plus the transmit metadata the
/// device path reads.
pub struct SkBuff {
    data: DataBuf,
    len: usize,
    ifindex: u32,
    /// Hardware queue chosen for this frame. Interior mutable because the
    /// lazy-forward path retargets buffers that are already shared.
    queue_mapping: AtomicU32,
}

impl SkBuff {
    /// Allocates a buffer with a `size`-byte data area on the preferred
    /// NUMA node.
    pub fn alloc(size: usize, node: Option<usize>) -> Result<Self, TxError> {
        let data = DataBuf::alloc(size, node).ok_or(TxError::NoMemory)?;
        Ok(Self {
            data,
            len: 0,
            ifindex: 0,
            queue_mapping: AtomicU32::new(0),
        })
    }

    /// Data-area capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current frame length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Interface the frame is bound for.
    #[inline]
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    #[inline]
    pub fn set_dev(&mut self, ifindex: u32) {
        self.ifindex = ifindex;
    }

    /// Returns a recycled buffer to its freshly allocated shape.
    pub(crate) fn reset(&mut self) {
        self.len = 0;
        self.ifindex = 0;
        self.queue_mapping.store(0, Ordering::Relaxed);
    }

    /// Copies `payload` into the linear data area and records its length.
    /// Frames shorter than the Ethernet minimum are zero padded in the copy
    /// region; the recorded length stays the caller's.
    pub fn fill(&mut self, payload: &[u8]) {
        let len = payload.len().min(self.capacity());
        self.data[..len].copy_from_slice(&payload[..len]);
        let pad = MIN_COPY_LEN.min(self.capacity());
        if len < pad {
            self.data[len..pad].fill(0);
        }
        self.len = len;
    }

    /// The live frame bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn set_queue_mapping(&self, queue: usize) {
        self.queue_mapping.store(queue as u32, Ordering::Relaxed);
    }

    #[inline]
    pub fn queue_mapping(&self) -> usize {
        self.queue_mapping.load(Ordering::Relaxed) as usize
    }

    /// Deep copy for shared fan-out: a new buffer with the same frame,
    /// metadata included. Fails under memory pressure.
    pub fn clone_deep(&self) -> Result<Self, TxError> {
        let mut copy = Self::alloc(self.capacity(), None)?;
        copy.data[..self.len].copy_from_slice(&self.data[..self.len]);
        copy.len = self.len;
        copy.ifindex = self.ifindex;
        copy.queue_mapping
            .store(self.queue_mapping.load(Ordering::Relaxed), Ordering::Relaxed);
        Ok(copy)
    }
}

impl std::fmt::Debug for SkBuff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkBuff")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("ifindex", &self.ifindex)
            .field("queue_mapping", &self.queue_mapping())
            .finish()
    }
}
