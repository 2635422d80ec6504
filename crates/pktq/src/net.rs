//! Network device model and frame submission.
//!
//! The device side of the core is a thin seam: a [`Driver`] supplies queue
//! selection and the actual `start_xmit`, while [`NetDevice`] carries the
//! shared state the submission paths need (admin state, per-queue locks and
//! flow-control flags). The per-queue lock is the only lock the core ever
//! holds across work, and only for the duration of one small batch.

use crate::batch::ShortBatch;
use crate::error::TxError;
use crate::skb::{SkBuff, SkbHandle};
use crate::stats::GlobalStats;
use spin::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Driver-side transmit behavior injected into the core.
pub trait Driver: Send + Sync {
    /// Hands one frame to the device.
    ///
    /// `xmit_more` tells the driver another frame follows immediately, so
    /// it may defer its doorbell write. Returning `Err` gives the frame
    /// back: the queue cannot take it right now. `Ok` transfers ownership
    /// of the handle to the driver.
    fn start_xmit(&self, skb: SkbHandle, queue: usize, xmit_more: bool) -> Result<(), SkbHandle>;

    /// Queue selection when the caller leaves the choice to the driver.
    fn select_queue(&self, _skb: &SkBuff) -> usize {
        0
    }
}

/// One hardware transmit queue: its submission lock and flow-control state.
pub struct TxQueue {
    lock: Mutex<()>,
    stopped: AtomicBool,
}

impl TxQueue {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Flow-stops the queue; submissions fail until it restarts.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn start(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

/// A network device as the transmit core sees it.
pub struct NetDevice {
    name: String,
    ifindex: u32,
    up: AtomicBool,
    queues: Box<[TxQueue]>,
    driver: Box<dyn Driver>,
}

impl NetDevice {
    /// Creates a device with `num_queues` hardware TX queues.
    ///
    /// # Panics
    ///
    /// Panics if `num_queues` is zero.
    pub fn new(
        name: impl Into<String>,
        ifindex: u32,
        num_queues: usize,
        driver: Box<dyn Driver>,
    ) -> Arc<Self> {
        assert!(num_queues >= 1, "a device needs at least one tx queue");
        let mut queues = Vec::with_capacity(num_queues);
        queues.resize_with(num_queues, TxQueue::new);
        Arc::new(Self {
            name: name.into(),
            ifindex,
            up: AtomicBool::new(true),
            queues: queues.into_boxed_slice(),
            driver,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Administrative up/down.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }

    #[inline]
    pub fn real_num_tx_queues(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn tx_queue(&self, queue: usize) -> &TxQueue {
        &self.queues[queue]
    }

    #[inline]
    pub(crate) fn driver(&self) -> &dyn Driver {
        &*self.driver
    }
}

impl std::fmt::Debug for NetDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetDevice")
            .field("name", &self.name)
            .field("ifindex", &self.ifindex)
            .field("up", &self.is_up())
            .field("queues", &self.queues.len())
            .finish()
    }
}

/// Process-wide ifindex lookup, the resolve side of flush requests.
///
/// Initialized once and passed to the engine as a handle.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<u32, Arc<NetDevice>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dev: Arc<NetDevice>) {
        self.devices.write().insert(dev.ifindex(), dev);
    }

    pub fn unregister(&self, ifindex: u32) -> Option<Arc<NetDevice>> {
        self.devices.write().remove(&ifindex)
    }

    pub fn get(&self, ifindex: u32) -> Option<Arc<NetDevice>> {
        self.devices.read().get(&ifindex).cloned()
    }
}

/// Outcome of one locked batch submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTxOutcome {
    /// Frames the driver accepted.
    pub sent: usize,
    /// A submission failed and ended the batch early.
    pub failed: bool,
}

/// Selects the hardware queue for a frame and fixes overflows.
///
/// `None` asks the driver on multi-queue devices; the result is clamped to
/// the last real queue.
pub fn pick_tx(dev: &NetDevice, skb: &SkBuff, hw_queue: Option<usize>) -> usize {
    let queue = match hw_queue {
        Some(q) => q,
        None if dev.real_num_tx_queues() != 1 => dev.driver().select_queue(skb),
        None => 0,
    };
    queue.min(dev.real_num_tx_queues() - 1)
}

/// Hands one frame to the driver; the caller holds the queue lock.
///
/// Any refusal (device down, queue flow-stopped, driver busy) releases the
/// frame through the slow path and reports `NetDown`; there are no retries
/// at this level.
pub(crate) fn xmit_frame(
    dev: &NetDevice,
    queue: usize,
    skb: SkbHandle,
    xmit_more: bool,
    global: &GlobalStats,
) -> Result<(), TxError> {
    if dev.is_up() && !dev.tx_queue(queue).is_stopped() {
        match dev.driver().start_xmit(skb, queue, xmit_more) {
            Ok(()) => return Ok(()),
            Err(rejected) => drop(rejected),
        }
    }
    global.os_free.inc();
    Err(TxError::NetDown)
}

/// Submits a single frame under its queue lock.
pub fn xmit(
    skb: SkbHandle,
    dev: &NetDevice,
    hw_queue: Option<usize>,
    xmit_more: bool,
    global: &GlobalStats,
) -> Result<(), TxError> {
    let queue = pick_tx(dev, &skb, hw_queue);
    skb.set_queue_mapping(queue);
    let _guard = dev.tx_queue(queue).lock();
    xmit_frame(dev, queue, skb, xmit_more, global)
}

/// Submits a whole batch under one queue-lock hold.
///
/// Every frame carries `xmit_more = true` except the last, letting the
/// driver defer its doorbell until the batch ends. Each submission hands
/// the driver a fresh reference; the batch keeps its own, so accepted
/// frames stay recyclable by the caller.
///
/// The first refusal ends the batch: the remaining frames are charged to
/// the slow-path free counter and the outcome reports the failure.
pub fn batch_xmit(
    batch: &ShortBatch,
    dev: &NetDevice,
    hw_queue: Option<usize>,
    global: &GlobalStats,
) -> BatchTxOutcome {
    let Some(first) = batch.first() else {
        return BatchTxOutcome::default();
    };
    let queue = pick_tx(dev, first, hw_queue);
    let last = batch.len() - 1;

    let _guard = dev.tx_queue(queue).lock();
    let mut outcome = BatchTxOutcome::default();
    for (i, skb) in batch.iter().enumerate() {
        skb.set_queue_mapping(queue);
        if xmit_frame(dev, queue, Arc::clone(skb), i != last, global).is_ok() {
            outcome.sent += 1;
        } else {
            global.os_free.add((last - i) as u64);
            outcome.failed = true;
            break;
        }
    }
    outcome
}

/// Like [`batch_xmit`] but restricted to the positions set in `mask`, with
/// no frame packing: every submission carries `xmit_more = false`.
pub fn batch_xmit_by_mask(
    batch: &ShortBatch,
    mask: u64,
    dev: &NetDevice,
    hw_queue: Option<usize>,
    global: &GlobalStats,
) -> BatchTxOutcome {
    let Some((_, first)) = batch.iter_masked(mask).next() else {
        return BatchTxOutcome::default();
    };
    let queue = pick_tx(dev, first, hw_queue);

    let _guard = dev.tx_queue(queue).lock();
    let mut outcome = BatchTxOutcome::default();
    for (i, skb) in batch.iter_masked(mask) {
        skb.set_queue_mapping(queue);
        if xmit_frame(dev, queue, Arc::clone(skb), false, global).is_ok() {
            outcome.sent += 1;
        } else {
            let rest = batch.iter_masked(mask).filter(|(j, _)| *j > i).count();
            global.os_free.add(rest as u64);
            outcome.failed = true;
            break;
        }
    }
    outcome
}
