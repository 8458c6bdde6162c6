//! Integration tests for concurrent writers of the coordination record

use asset_relay_core::io::{CoordinationStore, StoreError};
use asset_relay_core::liveness::FixedProbe;
use asset_relay_core::CoordinationRecord;
use chrono::Utc;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn new_store(dir: &TempDir) -> Arc<CoordinationStore> {
    let store = CoordinationStore::new(dir.path().join("coordination.json"), Arc::new(FixedProbe::new()));
    store.register_hub(1).unwrap();
    Arc::new(store)
}

/// Unserialized read-modify-write from a shared snapshot loses one update.
/// This is the hazard that `update()` exists to remove.
#[test]
fn test_snapshot_writes_lose_an_update() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    let snapshot = store.read().unwrap();

    let mut from_a = snapshot.clone();
    from_a.register(10, "process A", Utc::now());
    let mut from_b = snapshot;
    from_b.register(20, "process B", Utc::now());

    store.write(&from_a).unwrap();
    store.write(&from_b).unwrap();

    let record = store.read().unwrap();
    assert!(!record.is_registered(10), "first writer's change is silently discarded");
    assert!(record.is_registered(20));
}

#[test]
fn test_compare_and_swap_rejects_second_snapshot_writer() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    let (snapshot, version) = store.read_versioned().unwrap();

    let mut from_a = snapshot.clone();
    from_a.register(10, "process A", Utc::now());
    let mut from_b = snapshot;
    from_b.register(20, "process B", Utc::now());

    store.write_if_unchanged(&from_a, Some(&version)).unwrap();
    let second = store.write_if_unchanged(&from_b, Some(&version));
    assert!(matches!(second, Err(StoreError::Conflict { .. })));

    // Retry from a fresh read keeps both.
    let (mut fresh, version) = store.read_versioned().unwrap();
    fresh.register(20, "process B", Utc::now());
    store.write_if_unchanged(&fresh, Some(&version)).unwrap();

    let record = store.read().unwrap();
    assert!(record.is_registered(10));
    assert!(record.is_registered(20));
}

#[test]
fn test_concurrent_updates_keep_every_change() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let writers = 8u32;
    let barrier = Arc::new(Barrier::new(writers as usize));

    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let pid = 100 + i;
                store.register_instance(pid, &format!("instance {pid}")).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }

    let record = store.read().unwrap();
    assert_eq!(record.registered_instances.len(), writers as usize);
    for i in 0..writers {
        assert!(record.is_registered(100 + i));
    }
}

#[test]
fn test_sustained_contention_keeps_every_registration() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let writers = 8u32;
    let rounds = 25u32;
    let barrier = Arc::new(Barrier::new(writers as usize));

    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..rounds {
                    let pid = 1000 + i * rounds + round;
                    assert!(store.register_instance(pid, "busy").unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let record = store.read().unwrap();
    assert_eq!(record.registered_instances.len(), (writers * rounds) as usize);
}

#[test]
fn test_concurrent_active_claim_and_pending_consumption() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    store.register_instance(20, "client").unwrap();
    store
        .update(|record| {
            record
                .pending_import
                .insert(20, asset_relay_core::PendingImport::new(Vec::new(), Utc::now()))
        })
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let claimer = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            store
                .set_active_instance(Some(asset_relay_core::InstanceDescriptor {
                    pid: 30,
                    display_name: "claimer".to_string(),
                    window_handle: None,
                }))
                .unwrap()
        })
    };
    let consumer = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            store.update(|record| record.take_pending(20)).unwrap()
        })
    };

    assert!(claimer.join().unwrap());
    assert!(consumer.join().unwrap().flatten().is_some());

    let record: CoordinationRecord = store.read().unwrap();
    assert_eq!(record.active_pid(), Some(30));
    assert!(record.pending_import.is_empty());
}
