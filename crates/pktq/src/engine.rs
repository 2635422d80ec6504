//! The transmit drain.
//!
//! One drain walks a single half of one ring: claim the half through the
//! swap protocol, build packet buffers for its descriptors, pace frames
//! with a future timestamp, push batches through the device path, recycle
//! what was accepted, and account for every descriptor either as sent or as
//! discarded. The engine holds its collaborators (config, global counters,
//! device registry) as a handle so drains run the same way on a bound
//! worker and on a synchronous flush.

use crate::batch::ShortBatch;
use crate::clock;
use crate::config::TxConfig;
use crate::error::TxError;
use crate::net::{self, DeviceRegistry, NetDevice};
use crate::pool::CpuLocal;
use crate::sock::{TxOpt, TxOwner};
use crate::stats::GlobalStats;
use crate::stop::StopToken;
use std::sync::Arc;
use tracing::warn;

/// What one drain accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Frames the device accepted.
    pub sent: usize,
    /// Live descriptors that never made it to the device.
    pub disc: usize,
    /// The give-up predicate fired mid-drain; the remainder went to `disc`.
    pub interrupted: bool,
}

/// The drain loop and its collaborators.
#[derive(Clone)]
pub struct TxEngine {
    config: TxConfig,
    global: Arc<GlobalStats>,
    registry: Arc<DeviceRegistry>,
}

impl TxEngine {
    pub fn new(config: TxConfig, global: Arc<GlobalStats>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            config,
            global,
            registry,
        }
    }

    #[inline]
    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    #[inline]
    pub fn global(&self) -> &GlobalStats {
        &self.global
    }

    #[inline]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Drains one half of ring `idx` into `dev`.
    ///
    /// Returns `Err(Interrupted)` only when the give-up predicate breaks
    /// the swap handshake before any work happens. A give-up later in the
    /// drain is a normal partial completion: the summary carries what was
    /// sent, the rest is discarded, and the half is still cleared.
    pub fn drain(
        &self,
        to: &TxOpt,
        idx: usize,
        dev: &NetDevice,
        owner: TxOwner,
        node: Option<usize>,
        local: &CpuLocal,
        stop: &StopToken,
    ) -> Result<DrainSummary, TxError> {
        let slot = to.slot(idx).ok_or(TxError::BadRingIndex(idx))?;
        let ring = slot.ring();
        let hw_queue = slot.hw_queue();
        let max_len = self.config.max_len;

        let swap = ring.swap_and_wait(owner, stop)?;

        let mut batch = ShortBatch::new();
        let mut cursor = ring.cursor(swap);
        let mut now = clock::now_ns();
        let mut tot_sent = 0usize;
        let mut interrupted = false;
        let mut dev_gave_up = false;

        while let Some(desc) = cursor.peek() {
            let ts = desc.nsec;

            // a full batch, or a future-paced packet behind queued frames,
            // forces a flush of everything accumulated so far
            if batch.is_full() || (!batch.is_empty() && ts > now) {
                let sent = self.full_batch_xmit(&mut batch, dev, hw_queue, local, stop);
                tot_sent += if sent >= 0 { sent as usize } else { (!sent) as usize };
                if sent < 0 {
                    interrupted = true;
                    break;
                }
                // a refusal leaves the remainder batched: stop building
                // more and let it surface as discards
                if !batch.is_empty() {
                    dev_gave_up = true;
                    break;
                }
            }

            if ts > now {
                now = clock::wait_until(ts, stop);
            }

            let mut skb = match local.alloc_skb(max_len, node) {
                Ok(skb) => skb,
                Err(_) => {
                    warn!(ring = idx, "could not allocate a packet buffer");
                    break;
                }
            };

            let len = desc.wire_len.min(max_len);
            skb.set_dev(dev.ifindex());
            skb.fill(&desc.payload[..len.min(desc.payload.len())]);
            if let Some(q) = hw_queue {
                skb.set_queue_mapping(q);
            }

            batch.push(Arc::new(skb));
            cursor.advance();
        }

        // flush the residue; under a pending give-up this returns
        // immediately and reports the interruption
        if !dev_gave_up && !batch.is_empty() {
            let sent = self.full_batch_xmit(&mut batch, dev, hw_queue, local, stop);
            tot_sent += if sent >= 0 { sent as usize } else { (!sent) as usize };
            if sent < 0 {
                interrupted = true;
            }
        }

        // whatever is still batched was never handed to the device
        let mut disc = batch.len();
        while let Some(skb) = batch.pop_front() {
            if !local.tx_pool.push(skb) {
                self.global.os_free.inc();
            }
        }

        // count the descriptors the drain never reached
        while cursor.peek().is_some() {
            cursor.advance();
            disc += 1;
        }

        match owner {
            TxOwner::Worker(cpu) => {
                to.stats.sent.add_at(cpu, tot_sent as u64);
                to.stats.disc.add_at(cpu, disc as u64);
                self.global.sent.add_at(cpu, tot_sent as u64);
                self.global.disc.add_at(cpu, disc as u64);
            }
            TxOwner::Caller => {
                to.stats.sent.add(tot_sent as u64);
                to.stats.disc.add(disc as u64);
                self.global.sent.add(tot_sent as u64);
                self.global.disc.add(disc as u64);
            }
        }

        ring.clear_half(swap);

        Ok(DrainSummary {
            sent: tot_sent,
            disc,
            interrupted,
        })
    }

    /// Consumes `batch` against the device.
    ///
    /// Returns the number submitted when every attempt completed; an
    /// interruption returns the bitwise complement, so the sign carries the
    /// interrupt and the magnitude the progress.
    ///
    /// Each round hands the driver one extra reference per frame (the
    /// batch keeps its own, so recycling can race a driver that has not
    /// let go yet), submits, recycles the accepted prefix into the local
    /// pool, and drops that prefix from the batch. A round that moves
    /// nothing yields before retrying; a hard submission failure ends the
    /// batch and leaves the remainder for the caller to account.
    pub(crate) fn full_batch_xmit(
        &self,
        batch: &mut ShortBatch,
        dev: &NetDevice,
        hw_queue: Option<usize>,
        local: &CpuLocal,
        stop: &StopToken,
    ) -> isize {
        let mut total: isize = 0;
        while !batch.is_empty() {
            if stop.should_give_up() {
                return !total;
            }

            let outcome = net::batch_xmit(batch, dev, hw_queue, &self.global);
            total += outcome.sent as isize;
            for _ in 0..outcome.sent {
                if let Some(skb) = batch.pop_front() {
                    if !local.tx_pool.push(skb) {
                        self.global.os_free.inc();
                    }
                }
            }

            if outcome.failed {
                break;
            }
            if outcome.sent == 0 {
                std::thread::yield_now();
            }
        }
        total
    }

    /// Synchronous flush of ring `idx`: drains it on the calling thread
    /// when no worker owns it.
    ///
    /// Idempotent: with a bound worker this returns `Ok(0)` and leaves the
    /// ring to its owner. Fails with `InterfaceNotFound` when the slot's
    /// interface no longer resolves.
    pub fn flush(
        &self,
        to: &TxOpt,
        idx: usize,
        local: &CpuLocal,
        stop: &StopToken,
    ) -> Result<usize, TxError> {
        let slot = to.slot(idx).ok_or(TxError::BadRingIndex(idx))?;
        if slot.has_worker() {
            return Ok(0);
        }

        let Some(dev) = self.registry.get(slot.if_index()) else {
            warn!(
                ring = idx,
                if_index = slot.if_index(),
                "flush against an unknown interface"
            );
            return Err(TxError::InterfaceNotFound(slot.if_index()));
        };

        let summary = self.drain(to, idx, &dev, TxOwner::Caller, None, local, stop)?;
        Ok(summary.sent)
    }
}
