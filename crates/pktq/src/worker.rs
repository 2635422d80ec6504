//! Bound transmit workers.
//!
//! A worker is a named OS thread that owns one ring: it loops drains
//! against its device, backing off while the producer is quiet, until a
//! stop is requested or a drain reports an interruption. While a worker
//! owns a ring, synchronous flushes of that ring are no-ops.

use crate::backoff::Backoff;
use crate::engine::TxEngine;
use crate::net::NetDevice;
use crate::pool::CpuLocal;
use crate::sock::{TxOpt, TxOwner};
use crate::stop::StopToken;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Handle to a running transmit worker. Dropping it stops and joins the
/// thread.
pub struct TxWorker {
    stop: StopToken,
    thread: Option<JoinHandle<()>>,
}

impl TxWorker {
    /// Spawns a worker draining ring `idx` of `opt` into `dev`, pinned to
    /// `cpu` with buffers placed on `node` where the platform supports it.
    pub fn spawn(
        engine: TxEngine,
        opt: Arc<TxOpt>,
        idx: usize,
        dev: Arc<NetDevice>,
        cpu: usize,
        node: Option<usize>,
    ) -> io::Result<TxWorker> {
        let stop = StopToken::new();
        let token = stop.clone();

        if let Some(slot) = opt.slot(idx) {
            slot.set_worker(true);
        }

        let thread = std::thread::Builder::new()
            .name(format!("pktq-tx/{cpu}"))
            .spawn(move || {
                pin_to_cpu(cpu);
                info!(cpu, ring = idx, dev = dev.name(), "tx worker started");

                let local = CpuLocal::new(engine.config().pool_size);
                let mut backoff = Backoff::new();

                while !token.stop_requested() {
                    match engine.drain(
                        &opt,
                        idx,
                        &dev,
                        TxOwner::Worker(cpu),
                        node,
                        &local,
                        &token,
                    ) {
                        // a pending signal interrupts one drain; only an
                        // explicit stop ends the worker
                        Err(e) if e.is_interrupted() => {
                            if token.stop_requested() {
                                break;
                            }
                            backoff.snooze();
                        }
                        // anything else is a misconfigured ring
                        Err(_) => break,
                        Ok(s) if s.sent == 0 && s.disc == 0 => backoff.snooze(),
                        Ok(_) => backoff.reset(),
                    }
                }

                if let Some(slot) = opt.slot(idx) {
                    slot.set_worker(false);
                }
                local.tx_pool.flush();
                info!(cpu, ring = idx, "tx worker stopped");
            })?;

        Ok(TxWorker {
            stop,
            thread: Some(thread),
        })
    }

    /// The worker's give-up handle; raising a signal on it interrupts the
    /// current drain without ending the worker.
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Requests the worker to stop and waits for it.
    pub fn stop(&mut self) {
        self.stop.request_stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TxWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(all(feature = "numa", target_os = "linux"))]
fn pin_to_cpu(cpu: usize) {
    // SAFETY: cpu_set_t is plain data and the set is built with the libc
    // helpers before the syscall reads it.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu % libc::CPU_SETSIZE as usize, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(all(feature = "numa", target_os = "linux")))]
fn pin_to_cpu(_cpu: usize) {}
