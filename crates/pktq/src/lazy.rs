//! Deferred multi-destination forwarding.
//!
//! During capture processing a packet can be marked for forwarding to
//! several devices without transmitting anything: the marks accumulate in a
//! per-buffer log, and a later commit replays the buffer once per recorded
//! target. The annotation lives in an owned side structure next to the
//! buffer handle, keyed by nothing but ownership.

use crate::net::{self, NetDevice};
use crate::skb::SkbHandle;
use crate::stats::GlobalStats;
use std::sync::Arc;
use tracing::warn;

/// Forwarding targets recordable per buffer.
pub const GC_LOG_MAX: usize = 8;

/// In-flight buffers trackable per drain.
pub const GC_POOL_MAX: usize = 64;

/// Per-buffer forwarding annotation.
pub struct GcLog {
    devs: [Option<Arc<NetDevice>>; GC_LOG_MAX],
    num_devs: usize,
    xmit_todo: usize,
    to_kernel: bool,
}

impl Default for GcLog {
    fn default() -> Self {
        Self {
            devs: std::array::from_fn(|_| None),
            num_devs: 0,
            xmit_todo: 0,
            to_kernel: false,
        }
    }
}

impl GcLog {
    /// Recorded targets, duplicates included.
    #[inline]
    pub fn num_devs(&self) -> usize {
        self.num_devs
    }

    /// Deliveries still owed.
    #[inline]
    pub fn xmit_todo(&self) -> usize {
        self.xmit_todo
    }

    /// Whether the buffer must also be delivered locally.
    #[inline]
    pub fn to_kernel(&self) -> bool {
        self.to_kernel
    }

    pub fn set_to_kernel(&mut self, v: bool) {
        self.to_kernel = v;
    }

    /// How many times `dev` appears in the log.
    fn count_dev(&self, dev: &Arc<NetDevice>) -> usize {
        self.devs[..self.num_devs]
            .iter()
            .filter(|d| d.as_ref().is_some_and(|d| Arc::ptr_eq(d, dev)))
            .count()
    }
}

/// One in-flight buffer and its annotation.
pub struct GcSlot {
    skb: SkbHandle,
    log: GcLog,
}

impl GcSlot {
    pub fn new(skb: SkbHandle) -> Self {
        Self {
            skb,
            log: GcLog::default(),
        }
    }

    #[inline]
    pub fn skb(&self) -> &SkbHandle {
        &self.skb
    }

    #[inline]
    pub fn log(&self) -> &GcLog {
        &self.log
    }

    #[inline]
    pub fn log_mut(&mut self) -> &mut GcLog {
        &mut self.log
    }

    /// A buffer may be released only once every owed delivery happened and
    /// no local delivery is pending.
    #[inline]
    pub fn reclaimable(&self) -> bool {
        self.log.xmit_todo == 0 && !self.log.to_kernel
    }
}

/// The bounded set of in-flight buffers for one drain of the capture
/// pipeline.
#[derive(Default)]
pub struct GcData {
    slots: Vec<GcSlot>,
}

impl GcData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a buffer. Returns `false` when the in-flight set is full.
    pub fn push(&mut self, skb: SkbHandle) -> bool {
        if self.slots.len() >= GC_POOL_MAX {
            return false;
        }
        self.slots.push(GcSlot::new(skb));
        true
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn slot(&self, i: usize) -> Option<&GcSlot> {
        self.slots.get(i)
    }

    #[inline]
    pub fn slot_mut(&mut self, i: usize) -> Option<&mut GcSlot> {
        self.slots.get_mut(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GcSlot> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut GcSlot> {
        self.slots.iter_mut()
    }

    /// Drops every tracked buffer that is done forwarding; returns how many
    /// were released.
    pub fn reclaim(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|s| !s.reclaimable());
        before - self.slots.len()
    }
}

/// Marks one buffer for later transmission on `dev`.
///
/// Records the device, bumps the owed-delivery counter and retargets the
/// buffer's hardware queue. Fails (returning `false`) when the annotation
/// log is full.
pub fn lazy_xmit(slot: &mut GcSlot, dev: &Arc<NetDevice>, hw_queue: usize) -> bool {
    if slot.log.num_devs >= GC_LOG_MAX {
        warn!(dev = dev.name(), "lazy forward: annotation log full");
        return false;
    }

    slot.skb.set_queue_mapping(hw_queue);
    slot.log.devs[slot.log.num_devs] = Some(Arc::clone(dev));
    slot.log.num_devs += 1;
    slot.log.xmit_todo += 1;
    true
}

/// Marks every in-flight buffer for `dev`; returns how many took the mark.
pub fn batch_lazy_xmit(gc: &mut GcData, dev: &Arc<NetDevice>, hw_queue: usize) -> usize {
    let mut marked = 0;
    for slot in gc.iter_mut() {
        if lazy_xmit(slot, dev, hw_queue) {
            marked += 1;
        }
    }
    marked
}

/// Like [`batch_lazy_xmit`] but only for the in-flight positions set in
/// `mask`.
pub fn batch_lazy_xmit_by_mask(
    gc: &mut GcData,
    mask: u64,
    dev: &Arc<NetDevice>,
    hw_queue: usize,
) -> usize {
    let mut marked = 0;
    for (i, slot) in gc.iter_mut().enumerate() {
        if i < 64 && mask & (1 << i) != 0 && lazy_xmit(slot, dev, hw_queue) {
            marked += 1;
        }
    }
    marked
}

/// Per-commit summary: each distinct target device and how many buffer
/// references point at it.
pub struct LazyFwdTargets {
    devs: Vec<Arc<NetDevice>>,
    cnt: Vec<usize>,
}

impl LazyFwdTargets {
    /// Scans the in-flight logs and tallies the distinct targets.
    pub fn collect(gc: &GcData) -> Self {
        let mut devs: Vec<Arc<NetDevice>> = Vec::new();
        let mut cnt: Vec<usize> = Vec::new();
        for slot in gc.iter() {
            for dev in slot.log.devs[..slot.log.num_devs].iter().flatten() {
                match devs.iter().position(|d| Arc::ptr_eq(d, dev)) {
                    Some(i) => cnt[i] += 1,
                    None => {
                        devs.push(Arc::clone(dev));
                        cnt.push(1);
                    }
                }
            }
        }
        Self { devs, cnt }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.devs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.devs.is_empty()
    }

    /// Total submissions the commit will attempt for `dev`.
    pub fn count_for(&self, dev: &Arc<NetDevice>) -> usize {
        self.devs
            .iter()
            .position(|d| Arc::ptr_eq(d, dev))
            .map_or(0, |i| self.cnt[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<NetDevice>, usize)> {
        self.devs.iter().zip(self.cnt.iter().copied())
    }
}

/// Replays every annotated buffer to its recorded targets.
///
/// Per device: the first matching buffer seeds the queue choice and takes
/// the queue lock; each buffer is then submitted once per log reference.
/// A submission uses a cheap handle clone when it is the last consumer and
/// a deep copy while other consumers (further deliveries or a local
/// delivery) remain. The `xmit_more` hint stays on until the device's final
/// submission. Copy failures and driver refusals count as aborts and never
/// stop the other devices.
///
/// Returns the number of frames the drivers accepted.
pub fn commit(gc: &mut GcData, targets: &LazyFwdTargets, global: &GlobalStats) -> usize {
    let mut sent = 0usize;

    for (dev, want) in targets.iter() {
        let mut sent_dev = 0usize;
        let mut claimed: Option<(usize, spin::MutexGuard<'_, ()>)> = None;

        for slot in gc.slots.iter_mut() {
            let num = slot.log.count_dev(dev);
            if num == 0 {
                continue;
            }

            // the first frame for this device determines the hw queue
            if claimed.is_none() {
                let queue = net::pick_tx(dev, &slot.skb, Some(slot.skb.queue_mapping()));
                claimed = Some((queue, dev.tx_queue(queue).lock()));
            }
            let queue = claimed.as_ref().map_or(0, |(q, _)| *q);

            for _ in 0..num {
                sent_dev += 1;
                let xmit_more = sent_dev != want;

                let to_clone = if slot.log.to_kernel {
                    true
                } else {
                    slot.log.xmit_todo -= 1;
                    slot.log.xmit_todo > 0
                };

                let nskb = if to_clone {
                    slot.skb.clone_deep().map(Arc::new)
                } else {
                    Ok(Arc::clone(&slot.skb))
                };

                match nskb {
                    Ok(nskb) => {
                        if net::xmit_frame(dev, queue, nskb, xmit_more, global).is_ok() {
                            sent += 1;
                        } else {
                            global.abrt.inc();
                        }
                    }
                    Err(_) => global.abrt.inc(),
                }
            }
        }
        // the queue lock releases here, before the next device
    }

    sent
}
