//! Lazy forwarding: annotation, target collection, commit fan-out.

mod common;

use common::MockDriver;
use pktq_rs::{
    batch_lazy_xmit, batch_lazy_xmit_by_mask, commit, lazy_xmit, GcData, GlobalStats, LazyFwdTargets,
    NetDevice, SkBuff, SkbHandle, GC_LOG_MAX,
};
use std::sync::Arc;

fn frame(id: u8) -> SkbHandle {
    let mut skb = SkBuff::alloc(256, None).unwrap();
    skb.fill(&[id; 60]);
    Arc::new(skb)
}

fn device(name: &str, ifindex: u32) -> (Arc<NetDevice>, MockDriver) {
    let driver = MockDriver::new();
    (
        NetDevice::new(name, ifindex, 2, Box::new(driver.clone())),
        driver,
    )
}

#[test]
fn test_commit_fans_out_per_device() {
    let (eth0, drv0) = device("eth0", 1);
    let (eth1, drv1) = device("eth1", 2);
    let global = GlobalStats::default();

    let mut gc = GcData::new();
    assert!(gc.push(frame(b'a')));
    assert!(gc.push(frame(b'b')));
    assert!(gc.push(frame(b'c')));

    // a -> eth0 x1 + eth1 x2, b -> eth0 x1, c -> eth1 x1
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth0, 0));
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth1, 0));
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth1, 0));
    assert!(lazy_xmit(gc.slot_mut(1).unwrap(), &eth0, 0));
    assert!(lazy_xmit(gc.slot_mut(2).unwrap(), &eth1, 0));

    let targets = LazyFwdTargets::collect(&gc);
    assert_eq!(targets.count_for(&eth0), 2);
    assert_eq!(targets.count_for(&eth1), 3);

    let sent = commit(&mut gc, &targets, &global);
    assert_eq!(sent, 5);

    // eth0 sees a then b; eth1 sees a, a, c
    let p0: Vec<u8> = drv0.payloads().iter().map(|p| p[0]).collect();
    let p1: Vec<u8> = drv1.payloads().iter().map(|p| p[0]).collect();
    assert_eq!(p0, vec![b'a', b'b']);
    assert_eq!(p1, vec![b'a', b'a', b'c']);

    // per device, only the final submission drops the doorbell hint
    assert_eq!(drv0.more_flags(), vec![true, false]);
    assert_eq!(drv1.more_flags(), vec![true, true, false]);

    // every owed delivery happened
    for slot in gc.iter() {
        assert_eq!(slot.log().xmit_todo(), 0);
        assert!(slot.reclaimable());
    }
    assert_eq!(global.snapshot().abrt, 0);
}

#[test]
fn test_commit_restores_reference_counts() {
    let (eth0, _drv) = device("eth0", 1);
    let global = GlobalStats::default();

    let skb = frame(b'x');
    let before = Arc::strong_count(&skb);

    let mut gc = GcData::new();
    gc.push(Arc::clone(&skb));
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth0, 0));
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth0, 0));

    let targets = LazyFwdTargets::collect(&gc);
    let sent = commit(&mut gc, &targets, &global);
    assert_eq!(sent, 2);

    assert_eq!(gc.reclaim(), 1);
    // the driver let go of everything it was handed
    assert_eq!(Arc::strong_count(&skb), before);
}

#[test]
fn test_to_kernel_keeps_buffer_owed() {
    let (eth0, drv0) = device("eth0", 1);
    let global = GlobalStats::default();

    let mut gc = GcData::new();
    gc.push(frame(b'k'));
    gc.slot_mut(0).unwrap().log_mut().set_to_kernel(true);
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth0, 0));

    let targets = LazyFwdTargets::collect(&gc);
    commit(&mut gc, &targets, &global);

    assert_eq!(drv0.count(), 1);
    // a local delivery is still pending, so the buffer is not reclaimable
    let slot = gc.slot(0).unwrap();
    assert!(slot.log().to_kernel());
    assert!(!slot.reclaimable());
    assert_eq!(gc.reclaim(), 0);
}

#[test]
fn test_log_capacity_is_enforced() {
    let (eth0, _drv) = device("eth0", 1);
    let mut gc = GcData::new();
    gc.push(frame(b'f'));

    let slot = gc.slot_mut(0).unwrap();
    for _ in 0..GC_LOG_MAX {
        assert!(lazy_xmit(slot, &eth0, 0));
    }
    assert!(!lazy_xmit(slot, &eth0, 0));
    assert_eq!(slot.log().num_devs(), GC_LOG_MAX);
    assert_eq!(slot.log().xmit_todo(), GC_LOG_MAX);
}

#[test]
fn test_batch_marking_covers_the_pool() {
    let (eth0, drv0) = device("eth0", 1);
    let global = GlobalStats::default();

    let mut gc = GcData::new();
    for i in 0..4u8 {
        gc.push(frame(b'0' + i));
    }

    assert_eq!(batch_lazy_xmit(&mut gc, &eth0, 1), 4);
    let targets = LazyFwdTargets::collect(&gc);
    assert_eq!(targets.count_for(&eth0), 4);

    let sent = commit(&mut gc, &targets, &global);
    assert_eq!(sent, 4);
    // the queue retarget from the annotation stuck
    assert!(drv0.submissions().iter().all(|s| s.queue == 1));
}

#[test]
fn test_masked_marking_skips_clear_bits() {
    let (eth0, _drv) = device("eth0", 1);
    let mut gc = GcData::new();
    for i in 0..4u8 {
        gc.push(frame(i));
    }

    assert_eq!(batch_lazy_xmit_by_mask(&mut gc, 0b1010, &eth0, 0), 2);
    assert_eq!(gc.slot(0).unwrap().log().xmit_todo(), 0);
    assert_eq!(gc.slot(1).unwrap().log().xmit_todo(), 1);
    assert_eq!(gc.slot(2).unwrap().log().xmit_todo(), 0);
    assert_eq!(gc.slot(3).unwrap().log().xmit_todo(), 1);
}

#[test]
fn test_refused_submission_counts_as_abort_but_commit_continues() {
    let (eth0, drv0) = device("eth0", 1);
    // eth1 refuses everything
    let drv1 = MockDriver::accepting(0);
    let eth1 = NetDevice::new("eth1", 2, 1, Box::new(drv1.clone()));
    let global = GlobalStats::default();

    let mut gc = GcData::new();
    gc.push(frame(b'a'));
    gc.push(frame(b'b'));
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth1, 0));
    assert!(lazy_xmit(gc.slot_mut(0).unwrap(), &eth0, 0));
    assert!(lazy_xmit(gc.slot_mut(1).unwrap(), &eth0, 0));

    let targets = LazyFwdTargets::collect(&gc);
    let sent = commit(&mut gc, &targets, &global);

    // eth1's refusal never stopped eth0's deliveries
    assert_eq!(sent, 2);
    assert_eq!(drv0.count(), 2);
    assert_eq!(drv1.count(), 0);
    assert_eq!(global.snapshot().abrt, 1);
}
