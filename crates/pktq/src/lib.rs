//! pktq - accelerated packet transmission core.
//!
//! A transmit scheduler that drains user-supplied timestamped packet
//! descriptors from a double-buffered shared ring and pushes batches into a
//! network device's transmit queue, with optional real-time pacing, plus
//! the lock-free socket-buffer pool that recycles packet buffers between
//! the hot paths.
//!
//! # Key pieces
//!
//! - [`TxRing`]: two-half descriptor queue with a swap/producer/consumer
//!   stamp protocol (single writer, single drainer)
//! - [`TxEngine`]: the drain loop; paces on descriptor timestamps, builds
//!   buffers, submits batches, accounts sent/discarded
//! - [`BufferPool`]: SPSC recycling ring with a reference-count liveness
//!   gate
//! - [`NetDevice`] / [`Driver`]: the device seam; per-queue locks and the
//!   `xmit_more` doorbell hint
//! - Lazy forwarding ([`lazy_xmit`], [`commit`]): mark buffers for
//!   multi-device delivery now, transmit on commit
//!
//! Cancellation is cooperative throughout: every spin site checks a
//! [`StopToken`] give-up predicate, and an interrupted drain returns what
//! it already sent with the remainder counted as discarded.
//!
//! # Example
//!
//! ```
//! use pktq_rs::{
//!     CpuLocal, DeviceRegistry, Driver, GlobalStats, NetDevice, SkbHandle, StopToken, TxConfig,
//!     TxEngine, TxOpt, TxOwner, TxRing, TxSlot,
//! };
//! use std::sync::Arc;
//!
//! struct Sink;
//! impl Driver for Sink {
//!     fn start_xmit(&self, _skb: SkbHandle, _queue: usize, _more: bool) -> Result<(), SkbHandle> {
//!         Ok(())
//!     }
//! }
//!
//! let dev = NetDevice::new("eth0", 1, 1, Box::new(Sink));
//! let registry = Arc::new(DeviceRegistry::new());
//! registry.register(Arc::clone(&dev));
//!
//! let engine = TxEngine::new(TxConfig::default(), Arc::new(GlobalStats::default()), registry);
//! let mut opt = TxOpt::new();
//! let idx = opt.add_queue(TxSlot::new(TxRing::new(4096), 1, None));
//!
//! // stage two frames and drain them synchronously
//! let mut producer = opt.slot(idx).unwrap().ring().producer();
//! producer.inject(&[0u8; 60], 0);
//! producer.inject(&[1u8; 60], 0);
//! producer.commit();
//!
//! let local = CpuLocal::new(64);
//! let summary = engine
//!     .drain(&opt, idx, &dev, TxOwner::Caller, None, &local, &StopToken::new())
//!     .unwrap();
//! assert_eq!(summary.sent, 2);
//! ```

mod backoff;
mod batch;
pub mod clock;
mod config;
mod engine;
mod error;
mod invariants;
mod lazy;
mod mem;
mod net;
mod pool;
mod ring;
mod skb;
mod sock;
mod stats;
mod stop;
mod worker;

pub use backoff::Backoff;
pub use batch::{ShortBatch, BATCH_LEN};
pub use config::{TxConfig, MAX_SANE_LEN, MIN_COPY_LEN};
pub use engine::{DrainSummary, TxEngine};
pub use error::TxError;
pub use lazy::{
    batch_lazy_xmit, batch_lazy_xmit_by_mask, commit, lazy_xmit, GcData, GcLog, GcSlot,
    LazyFwdTargets, GC_LOG_MAX, GC_POOL_MAX,
};
pub use net::{
    batch_xmit, batch_xmit_by_mask, pick_tx, xmit, BatchTxOutcome, DeviceRegistry, Driver,
    NetDevice, TxQueue,
};
pub use pool::{BufferPool, CpuLocal, PoolStatsSnapshot};
pub use ring::{TxProducer, TxRing};
pub use skb::{SkBuff, SkbHandle};
pub use sock::{TxOpt, TxOwner, TxSlot};
pub use stats::{GlobalStats, GlobalStatsSnapshot, SparseCounter, TxStats, TxStatsSnapshot};
pub use stop::StopToken;
pub use worker::TxWorker;
