//! Buffer-pool behavior under load: SPSC safety, slow-path accounting,
//! reference-count gating.

use pktq_rs::{BufferPool, SkBuff, SkbHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const OPS: usize = 1_000_000;

fn tagged(id: u64) -> SkbHandle {
    let mut skb = SkBuff::alloc(64, None).unwrap();
    skb.fill(&id.to_le_bytes());
    Arc::new(skb)
}

fn tag_of(skb: &SkbHandle) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&skb.payload()[..8]);
    u64::from_le_bytes(bytes)
}

/// One producer, one consumer, a million recycles: nothing lost, nothing
/// duplicated, occupancy bounded.
#[test]
fn test_spsc_stress_no_loss_no_duplication() {
    let pool = Arc::new(BufferPool::new(1024));
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let pool = Arc::clone(&pool);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for id in 0..OPS as u64 {
                pool.push(tagged(id));
            }
            done.store(true, Ordering::Release);
        })
    };

    let consumer = {
        let pool = Arc::clone(&pool);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut seen = vec![false; OPS];
            let mut popped = 0u64;
            loop {
                match pool.pop() {
                    Some(skb) => {
                        let id = tag_of(&skb) as usize;
                        assert!(!seen[id], "buffer {id} handed out twice");
                        seen[id] = true;
                        popped += 1;
                    }
                    None => {
                        if done.load(Ordering::Acquire) && pool.is_empty() {
                            break;
                        }
                        std::hint::spin_loop();
                    }
                }
                assert!(pool.len() <= pool.capacity());
            }
            popped
        })
    };

    producer.join().unwrap();
    let popped = consumer.join().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.pop, popped);
    assert_eq!(stats.push, popped, "everything pushed was eventually popped");
    assert_eq!(
        stats.push + stats.free,
        OPS as u64,
        "every push attempt either pooled or slow-freed its buffer"
    );
}

/// A full pool absorbs overflow through the slow path and the counters add
/// up afterwards.
#[test]
fn test_overflow_goes_to_slow_path() {
    let pool = BufferPool::new(5); // usable capacity 4
    let attempts = 8u64;
    for id in 0..attempts {
        pool.push(tagged(id));
    }

    let mut popped = 0u64;
    while let Some(skb) = pool.pop() {
        // survivors are the earliest pushes, in order
        assert_eq!(tag_of(&skb), popped);
        popped += 1;
    }

    let stats = pool.stats();
    assert_eq!(stats.free, 4);
    assert_eq!(stats.pop, popped);
    assert_eq!(attempts, stats.pop + stats.free);
}

/// The consumer never receives a buffer that another holder can still
/// read.
#[test]
fn test_refcount_gate_blocks_shared_head() {
    let pool = Arc::new(BufferPool::new(64));

    // half the buffers keep an in-flight clone alive for a while
    let mut clones = Vec::new();
    for id in 0..32u64 {
        let h = tagged(id);
        if id % 2 == 0 {
            clones.push(Arc::clone(&h));
        }
        pool.push(h);
    }

    // only the head is poppable, and the head (id 0) is still shared
    assert!(pool.pop().is_none());

    clones.clear();
    let mut popped = 0;
    while pool.pop().is_some() {
        popped += 1;
    }
    assert_eq!(popped, 32);
}

#[test]
fn test_pop_on_empty_pool() {
    let pool = BufferPool::new(8);
    assert!(pool.pop().is_none());
    assert_eq!(pool.stats().pop, 0);
}
