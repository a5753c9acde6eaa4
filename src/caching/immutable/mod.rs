// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The two-level in-memory cache.
//!
//! The cache implements a two-phase design with two subcaches: the Action
//! Cache (AC) and the Content-Addressable Storage (CAS). An action is the
//! resolution of one request; AC records are keyed by the request's captured
//! identity and hold a shared single-flight task plus a reference into the
//! CAS. The CAS stores result values keyed by a digest over the value, so
//! two different requests producing the same value share one CAS record.
//!
//! The shared task is the rendezvous for clients interested in the same
//! request at the same time: every client awaits it, the computation runs
//! once, and each awaiter receives the outcome.

pub mod internals;
pub mod lock;
pub mod ptr;

use std::{
    fmt,
    sync::{Mutex, MutexGuard},
};

use crate::{
    caching::immutable::internals::{CacheInner, EntryState},
    core::{
        id::CapturedId,
        unique_hash::{UniqueHasher, UpdateUniqueHash},
        value::Value,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmutableCacheConfig {
    /// The maximum amount of memory to use for caching results that are no
    /// longer in use, in bytes.
    pub unused_size_limit: u64,
}

impl Default for ImmutableCacheConfig {
    fn default() -> Self {
        Self {
            unused_size_limit: 1 << 30,
        }
    }
}

/// Summary information on the data in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSummaryInfo {
    pub ac_num_records: usize,
    pub ac_num_records_in_use: usize,
    pub ac_num_records_pending_eviction: usize,
    pub cas_num_records: usize,
    pub cas_total_size: u64,
}

/// Information on one AC record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheEntrySnapshot {
    /// Hex digest of the entry's key.
    pub key: String,
    pub state: EntryState,
    /// Size of the cached data; valid if the data is ready, 0 otherwise.
    pub size: u64,
}

impl fmt::Display for CacheEntrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}, {} bytes", self.key, self.state, self.size)
    }
}

/// Extended information on the AC and CAS contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    /// AC entries currently in use.
    pub in_use: Vec<CacheEntrySnapshot>,
    /// AC entries that will be evicted when necessary.
    pub pending_eviction: Vec<CacheEntrySnapshot>,
    /// Total deep size of the values in the CAS.
    pub cas_total_size: u64,
}

impl fmt::Display for CacheSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "in use:")?;
        for entry in &self.in_use {
            writeln!(f, "  {entry}")?;
        }
        writeln!(f, "pending eviction:")?;
        for entry in &self.pending_eviction {
            writeln!(f, "  {entry}")?;
        }
        write!(f, "CAS total size: {}", self.cas_total_size)
    }
}

impl fmt::Display for CacheSummaryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AC: {} records ({} in use, {} pending eviction); CAS: {} records, {} bytes",
            self.ac_num_records,
            self.ac_num_records_in_use,
            self.ac_num_records_pending_eviction,
            self.cas_num_records,
            self.cas_total_size
        )
    }
}

/// The immutable memory cache. One mutex guards all mutable state; value
/// computations run outside it.
pub struct ImmutableCache {
    inner: Mutex<CacheInner>,
}

impl ImmutableCache {
    pub fn new(config: ImmutableCacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::new(config)),
        }
    }

    /// Replaces the configuration and clears the contents.
    pub fn reset(&self, config: ImmutableCacheConfig) {
        *self.lock_inner() = CacheInner::new(config);
    }

    /// Evicts every unused entry.
    pub fn clear_unused_entries(&self) {
        self.lock_inner().reduce(0);
    }

    /// Current total size of `Ready` entries on the eviction list; the
    /// quantity bounded by `unused_size_limit`.
    pub fn unused_size(&self) -> u64 {
        self.lock_inner().eviction_total_size
    }

    pub fn get_summary_info(&self) -> CacheSummaryInfo {
        let inner = self.lock_inner();
        let pending = inner.eviction.len();
        CacheSummaryInfo {
            ac_num_records: inner.records.len(),
            ac_num_records_in_use: inner.records.len() - pending,
            ac_num_records_pending_eviction: pending,
            cas_num_records: inner.cas.len(),
            cas_total_size: inner.cas_total_size,
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let inner = self.lock_inner();
        let mut snapshot = CacheSnapshot {
            cas_total_size: inner.cas_total_size,
            ..Default::default()
        };
        for (key, record) in &inner.records {
            let entry = CacheEntrySnapshot {
                key: key.unique_string(),
                state: record.state,
                size: record.size,
            };
            if inner.eviction.contains(key) {
                snapshot.pending_eviction.push(entry);
            } else {
                snapshot.in_use.push(entry);
            }
        }
        snapshot
    }

    /// Publishes a computed value under `key`. The digest and size are
    /// computed here, outside the mutex.
    pub fn record_value(&self, key: &CapturedId, value: &Value) {
        let mut hasher = UniqueHasher::new();
        value.update_unique_hash(&mut hasher);
        let digest = hasher.finish();
        let deep_size = value.deep_size();
        self.lock_inner()
            .record_value(key, digest, deep_size, value);
    }

    /// Marks the record for `key` as failed.
    pub fn record_failure(&self, key: &CapturedId) {
        self.lock_inner().record_failure(key);
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().expect("cache mutex poisoned")
    }
}

impl Default for ImmutableCache {
    fn default() -> Self {
        Self::new(ImmutableCacheConfig::default())
    }
}
