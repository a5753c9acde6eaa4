// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use tracing::debug;

use crate::{
    caching::immutable::ImmutableCacheConfig,
    core::{errors::Error, id::CapturedId, unique_hash::UniqueDigest, value::Value},
};

/// The single-flight task resolving one action-cache record.
///
/// It is created (not polled) while the cache mutex is held, so that every
/// concurrent acquirer of the same key receives a handle to the same
/// in-progress computation. It must never touch the cache mutex during
/// construction.
pub type ValueTask = Shared<BoxFuture<'static, Result<Value, Error>>>;

/// Factory for a record's [`ValueTask`]; invoked at most once per `Loading`
/// episode, under the cache mutex. Must be pure (no cache access).
pub type CreateTaskFn<'a> = Box<dyn FnOnce(&CapturedId) -> ValueTask + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryState {
    /// Somewhere in the process of being loaded/retrieved/computed.
    Loading,
    /// The data is available.
    Ready,
    /// The computation failed; the next acquire retries.
    Failed,
}

/// A record in the action cache. All fields are guarded by the cache mutex.
pub(crate) struct AcRecord {
    /// Live `CachePtr` references. While positive, the record stays off the
    /// eviction list.
    pub ref_count: u32,
    /// Explicit pins from `CacheRecordLock`s; eviction eligibility requires
    /// both counts to be zero.
    pub lock_count: u32,
    pub state: EntryState,
    /// Deep size of the value; valid once `state` is `Ready`.
    pub size: u64,
    pub task: ValueTask,
    /// Set by the task on success; a record that has been `Ready` keeps a
    /// digest pointing at a live CAS record.
    pub cas_digest: Option<UniqueDigest>,
}

/// A record in the content-addressable store, reference-counted from AC
/// records.
pub(crate) struct CasRecord {
    pub deep_size: u64,
    pub ref_count: u32,
    pub value: Value,
}

pub(crate) struct CacheInner {
    pub config: ImmutableCacheConfig,
    pub records: HashMap<CapturedId, AcRecord>,
    /// Records eligible for eviction, least-recently released first.
    /// Membership here is the "on the eviction list" predicate.
    pub eviction: LruCache<CapturedId, ()>,
    /// Sum of sizes of `Ready` records currently on the eviction list.
    pub eviction_total_size: u64,
    pub cas: HashMap<UniqueDigest, CasRecord>,
    pub cas_total_size: u64,
}

impl CacheInner {
    pub fn new(config: ImmutableCacheConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
            eviction: LruCache::unbounded(),
            eviction_total_size: 0,
            cas: HashMap::new(),
            cas_total_size: 0,
        }
    }

    /// Looks up or creates the record for `key`, bumps its reference count
    /// and returns its task. Rebuilds the task of a `Failed` record.
    pub fn acquire(&mut self, key: &CapturedId, create_task: CreateTaskFn<'_>) -> ValueTask {
        if !self.records.contains_key(key) {
            let task = create_task(key);
            self.records.insert(
                key.clone(),
                AcRecord {
                    ref_count: 0,
                    lock_count: 0,
                    state: EntryState::Loading,
                    size: 0,
                    task,
                    cas_digest: None,
                },
            );
        } else if let Some(record) = self.records.get_mut(key)
            && record.state == EntryState::Failed
        {
            record.task = create_task(key);
            record.state = EntryState::Loading;
        }
        let record = self
            .records
            .get_mut(key)
            .expect("record installed just above");
        record.ref_count += 1;
        if self.eviction.pop(key).is_some() && record.state == EntryState::Ready {
            self.eviction_total_size -= record.size;
        }
        record.task.clone()
    }

    /// Drops one reference; the record becomes evictable when both counts
    /// reach zero.
    pub fn release(&mut self, key: &CapturedId) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        record.ref_count -= 1;
        if record.ref_count == 0 && record.lock_count == 0 {
            let size = (record.state == EntryState::Ready).then_some(record.size);
            self.eviction.push(key.clone(), ());
            if let Some(size) = size {
                self.eviction_total_size += size;
            }
            self.reduce(self.config.unused_size_limit);
        }
    }

    pub fn add_lock(&mut self, key: &CapturedId) {
        if let Some(record) = self.records.get_mut(key) {
            record.lock_count += 1;
        }
    }

    pub fn del_lock(&mut self, key: &CapturedId) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        record.lock_count -= 1;
        if record.ref_count == 0 && record.lock_count == 0 {
            let size = (record.state == EntryState::Ready).then_some(record.size);
            self.eviction.push(key.clone(), ());
            if let Some(size) = size {
                self.eviction_total_size += size;
            }
            self.reduce(self.config.unused_size_limit);
        }
    }

    /// Evicts unused records in LRU order until their total size is at most
    /// `desired_size`.
    pub fn reduce(&mut self, desired_size: u64) {
        while self.eviction_total_size > desired_size {
            let Some((key, ())) = self.eviction.pop_lru() else {
                break;
            };
            let Some(record) = self.records.remove(&key) else {
                continue;
            };
            debug!("evicting cache record {}", key.unique_string());
            if record.state == EntryState::Ready {
                self.eviction_total_size -= record.size;
            }
            if let Some(digest) = record.cas_digest {
                self.del_cas_ref(&digest);
            }
        }
    }

    /// Publishes a computed value: installs (or dedups into) the CAS record
    /// and flips the AC record to `Ready`.
    pub fn record_value(
        &mut self,
        key: &CapturedId,
        digest: UniqueDigest,
        deep_size: u64,
        value: &Value,
    ) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        if let Some(cas_record) = self.cas.get_mut(&digest) {
            cas_record.ref_count += 1;
        } else {
            self.cas.insert(
                digest,
                CasRecord {
                    deep_size,
                    ref_count: 1,
                    value: value.clone(),
                },
            );
            self.cas_total_size += deep_size;
        }
        record.state = EntryState::Ready;
        record.size = deep_size;
        record.cas_digest = Some(digest);
        if self.eviction.contains(key) {
            self.eviction_total_size += deep_size;
        }
    }

    /// Records a failed computation; the CAS is untouched and the next
    /// acquire for this key retries.
    pub fn record_failure(&mut self, key: &CapturedId) {
        if let Some(record) = self.records.get_mut(key) {
            record.state = EntryState::Failed;
        }
    }

    pub fn get_cas_value(&self, key: &CapturedId) -> Option<Value> {
        let record = self.records.get(key)?;
        let digest = record.cas_digest.as_ref()?;
        self.cas.get(digest).map(|c| c.value.clone())
    }

    fn del_cas_ref(&mut self, digest: &UniqueDigest) {
        let Some(cas_record) = self.cas.get_mut(digest) else {
            return;
        };
        cas_record.ref_count -= 1;
        if cas_record.ref_count == 0 {
            self.cas_total_size -= cas_record.deep_size;
            self.cas.remove(digest);
        }
    }
}
