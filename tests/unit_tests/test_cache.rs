// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use cradle_rs::{
    caching::immutable::{
        ImmutableCache, ImmutableCacheConfig,
        internals::{EntryState, ValueTask},
        ptr::CachePtr,
    },
    core::{
        blob::Blob,
        errors::Error,
        id::{CapturedId, ValueId},
        value::Value,
    },
};
use futures::FutureExt;

fn cache_with_limit(unused_size_limit: u64) -> Arc<ImmutableCache> {
    Arc::new(ImmutableCache::new(ImmutableCacheConfig { unused_size_limit }))
}

fn key(i: i64) -> CapturedId {
    CapturedId::new(ValueId(Value::Int(i)))
}

fn blob4(fill: u8) -> Value {
    Value::Blob(Blob::from_bytes(vec![fill; 4]))
}

fn ready_task(value: Value) -> ValueTask {
    async move { Ok(value) }.boxed().shared()
}

fn failing_task(message: &str) -> ValueTask {
    let message = message.to_owned();
    async move { Err(Error::Calculation(message)) }.boxed().shared()
}

// Resolve-then-release one key, publishing the given value.
fn publish_and_release(cache: &Arc<ImmutableCache>, k: &CapturedId, value: &Value) {
    let ptr = CachePtr::acquire(
        Arc::clone(cache),
        k.clone(),
        Box::new(|_| ready_task(Value::Nil)),
    );
    cache.record_value(k, value);
    drop(ptr);
}

#[test]
fn acquire_release_moves_records_between_bins() {
    let cache = cache_with_limit(1 << 20);
    let k = key(1);
    let ptr = CachePtr::acquire(
        Arc::clone(&cache),
        k.clone(),
        Box::new(|_| ready_task(Value::Int(5))),
    );
    let info = cache.get_summary_info();
    assert_eq!(info.ac_num_records, 1);
    assert_eq!(info.ac_num_records_in_use, 1);
    assert_eq!(info.ac_num_records_pending_eviction, 0);

    cache.record_value(&k, &Value::Int(5));
    assert!(ptr.is_ready());
    assert_eq!(ptr.get_value(), Some(Value::Int(5)));
    drop(ptr);

    let info = cache.get_summary_info();
    assert_eq!(info.ac_num_records, 1);
    assert_eq!(info.ac_num_records_in_use, 0);
    assert_eq!(info.ac_num_records_pending_eviction, 1);
}

#[test]
fn zero_limit_evicts_every_released_ready_entry() {
    let cache = cache_with_limit(0);
    publish_and_release(&cache, &key(1), &blob4(1));
    let info = cache.get_summary_info();
    assert_eq!(info.ac_num_records, 0);
    assert_eq!(info.cas_num_records, 0);
    assert_eq!(info.cas_total_size, 0);
}

#[test]
fn loading_entries_do_not_count_toward_the_size_budget() {
    let cache = cache_with_limit(0);
    // Released while still Loading: size 0, so even a zero limit keeps it.
    let ptr = CachePtr::acquire(
        Arc::clone(&cache),
        key(1),
        Box::new(|_| ready_task(Value::Int(5))),
    );
    drop(ptr);
    let info = cache.get_summary_info();
    assert_eq!(info.ac_num_records, 1);
    assert_eq!(info.ac_num_records_pending_eviction, 1);
}

#[test]
fn eviction_follows_lru_order() {
    let cache = cache_with_limit(8);
    let (k1, k2, k3, k4) = (key(1), key(2), key(3), key(4));

    publish_and_release(&cache, &k1, &blob4(1));
    publish_and_release(&cache, &k2, &blob4(2));
    // 8 bytes pending; still within the limit.
    assert_eq!(cache.get_summary_info().ac_num_records, 2);

    publish_and_release(&cache, &k3, &blob4(3));
    // 12 bytes pending; the oldest release (k1) goes.
    let snapshot = cache.snapshot();
    let pending: Vec<_> = snapshot.pending_eviction.iter().map(|e| &e.key).collect();
    assert_eq!(pending.len(), 2);
    assert!(pending.contains(&&k2.unique_string()));
    assert!(pending.contains(&&k3.unique_string()));

    // Touching k2 refreshes it, so the next eviction takes k3 instead.
    let ptr = CachePtr::acquire(
        Arc::clone(&cache),
        k2.clone(),
        Box::new(|_| ready_task(Value::Nil)),
    );
    drop(ptr);
    publish_and_release(&cache, &k4, &blob4(4));
    let snapshot = cache.snapshot();
    let pending: Vec<_> = snapshot.pending_eviction.iter().map(|e| &e.key).collect();
    assert!(pending.contains(&&k2.unique_string()));
    assert!(pending.contains(&&k4.unique_string()));
    assert!(!pending.contains(&&k3.unique_string()));
}

#[test]
fn equal_values_share_one_cas_record() {
    let cache = cache_with_limit(1 << 20);
    let same = Value::Str("shared result".into());
    publish_and_release(&cache, &key(1), &same);
    publish_and_release(&cache, &key(2), &same);

    let info = cache.get_summary_info();
    assert_eq!(info.ac_num_records, 2);
    assert_eq!(info.cas_num_records, 1);
    assert_eq!(info.cas_total_size, same.deep_size());

    // Evicting both AC records drops the CAS record with them.
    cache.clear_unused_entries();
    let info = cache.get_summary_info();
    assert_eq!(info.ac_num_records, 0);
    assert_eq!(info.cas_num_records, 0);
}

#[tokio::test]
async fn single_flight_runs_the_task_once() -> Result<()> {
    let cache = cache_with_limit(1 << 20);
    let k = key(1);
    let runs = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let k = k.clone();
        let runs = Arc::clone(&runs);
        handles.push(tokio::spawn(async move {
            let ptr = CachePtr::acquire(
                Arc::clone(&cache),
                k.clone(),
                Box::new(move |_| {
                    let runs = Arc::clone(&runs);
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Value::Int(5))
                    }
                    .boxed()
                    .shared()
                }),
            );
            ptr.task().await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await?.expect("task result"), Value::Int(5));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn failed_records_retry_on_next_acquire() -> Result<()> {
    let cache = cache_with_limit(1 << 20);
    let k = key(1);

    let ptr = CachePtr::acquire(
        Arc::clone(&cache),
        k.clone(),
        Box::new(|_| failing_task("first attempt")),
    );
    let err = ptr.task().await.expect_err("task fails");
    assert!(matches!(err, Error::Calculation(_)));
    cache.record_failure(&k);
    assert!(ptr.is_failed());
    drop(ptr);

    // Re-acquiring rebuilds the task and re-enters Loading.
    let rebuilt = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&rebuilt);
    let ptr = CachePtr::acquire(
        Arc::clone(&cache),
        k.clone(),
        Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            ready_task(Value::Int(7))
        }),
    );
    assert!(ptr.is_loading());
    assert_eq!(rebuilt.load(Ordering::SeqCst), 1);
    assert_eq!(ptr.task().await.expect("retry succeeds"), Value::Int(7));
    Ok(())
}

#[test]
fn locks_pin_records_against_eviction() {
    let cache = cache_with_limit(1 << 20);
    let k = key(1);
    let ptr = CachePtr::acquire(
        Arc::clone(&cache),
        k.clone(),
        Box::new(|_| ready_task(Value::Int(5))),
    );
    cache.record_value(&k, &Value::Int(5));
    let lock = ptr.lock();
    drop(ptr);

    cache.clear_unused_entries();
    assert_eq!(cache.get_summary_info().ac_num_records, 1);

    drop(lock);
    cache.clear_unused_entries();
    assert_eq!(cache.get_summary_info().ac_num_records, 0);
}

#[test]
fn snapshot_reports_states_and_sizes() {
    let cache = cache_with_limit(1 << 20);
    let k = key(1);
    let ptr = CachePtr::acquire(
        Arc::clone(&cache),
        k.clone(),
        Box::new(|_| ready_task(Value::Nil)),
    );
    let snapshot = cache.snapshot();
    assert_eq!(snapshot.in_use.len(), 1);
    assert_eq!(snapshot.in_use[0].state, EntryState::Loading);
    assert_eq!(snapshot.in_use[0].size, 0);

    cache.record_value(&k, &blob4(9));
    drop(ptr);
    let snapshot = cache.snapshot();
    assert_eq!(snapshot.pending_eviction.len(), 1);
    assert_eq!(snapshot.pending_eviction[0].state, EntryState::Ready);
    assert_eq!(snapshot.pending_eviction[0].size, 4);
    assert_eq!(snapshot.cas_total_size, 4);

    let rendered = format!("{snapshot}");
    assert!(rendered.contains("pending eviction:"));
    assert!(rendered.contains("CAS total size: 4"));
    let info = format!("{}", cache.get_summary_info());
    assert!(info.contains("AC: 1 records"));
}

// Random op sequences: the eviction-list accounting must match the sum of
// Ready pending-eviction sizes after every single operation.
#[test]
fn eviction_accounting_survives_arbitrary_op_sequences() {
    use std::collections::HashSet;

    use rand::{RngExt, SeedableRng, rngs::StdRng};

    let cache = cache_with_limit(64);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut live: Vec<(CapturedId, CachePtr)> = Vec::new();

    for _step in 0..300 {
        match rng.random_range(0..3) {
            0 => {
                let k = key(rng.random_range(0..12));
                let ptr = CachePtr::acquire(
                    Arc::clone(&cache),
                    k.clone(),
                    Box::new(|_| ready_task(Value::Nil)),
                );
                live.push((k, ptr));
            }
            1 => {
                if !live.is_empty() {
                    let idx = rng.random_range(0..live.len());
                    let (k, ptr) = &live[idx];
                    if ptr.is_loading() {
                        let size = rng.random_range(1..16);
                        cache.record_value(k, &Value::Blob(Blob::from_bytes(vec![0u8; size])));
                    }
                }
            }
            _ => {
                if !live.is_empty() {
                    let idx = rng.random_range(0..live.len());
                    live.swap_remove(idx);
                }
            }
        }

        let snapshot = cache.snapshot();
        let expected: u64 = snapshot
            .pending_eviction
            .iter()
            .filter(|e| e.state == EntryState::Ready)
            .map(|e| e.size)
            .sum();
        assert_eq!(cache.unused_size(), expected);

        // A record is off the eviction list iff someone holds a pointer.
        let held: HashSet<String> = live.iter().map(|(k, _)| k.unique_string()).collect();
        for entry in &snapshot.in_use {
            assert!(held.contains(&entry.key));
        }
        for entry in &snapshot.pending_eviction {
            assert!(!held.contains(&entry.key));
        }
    }
}

#[test]
fn reset_clears_contents() {
    let cache = cache_with_limit(1 << 20);
    publish_and_release(&cache, &key(1), &blob4(1));
    cache.reset(ImmutableCacheConfig {
        unused_size_limit: 16,
    });
    let info = cache.get_summary_info();
    assert_eq!(info.ac_num_records, 0);
    assert_eq!(info.cas_num_records, 0);
}
