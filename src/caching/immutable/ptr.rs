// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{
    caching::immutable::{
        ImmutableCache,
        internals::{CreateTaskFn, EntryState, ValueTask},
        lock::CacheRecordLock,
    },
    core::{id::CapturedId, value::Value},
};

/// A live reference to an action-cache record.
///
/// The record stays off the eviction list while at least one `CachePtr` to
/// it exists; dropping the last one moves the record to the back of the
/// eviction list. Acquiring a pointer for an unknown key installs a fresh
/// record whose task is built by the given factory; acquiring a `Failed`
/// record rebuilds the task (retry on next use).
pub struct CachePtr {
    cache: Arc<ImmutableCache>,
    key: CapturedId,
    task: ValueTask,
}

impl CachePtr {
    /// Looks up or creates the record for `key` under the cache mutex.
    ///
    /// `create_task` runs while the mutex is held; it must only construct
    /// the task, not poll it or touch the cache.
    pub fn acquire(
        cache: Arc<ImmutableCache>,
        key: CapturedId,
        create_task: CreateTaskFn<'_>,
    ) -> Self {
        let task = cache.lock_inner().acquire(&key, create_task);
        Self { cache, key, task }
    }

    pub fn key(&self) -> &CapturedId {
        &self.key
    }

    /// The shared single-flight task producing this record's value.
    pub fn task(&self) -> ValueTask {
        self.task.clone()
    }

    /// Current entry state; mostly for tests.
    pub fn state(&self) -> EntryState {
        self.cache
            .lock_inner()
            .records
            .get(&self.key)
            .map_or(EntryState::Loading, |r| r.state)
    }

    pub fn is_loading(&self) -> bool {
        self.state() == EntryState::Loading
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EntryState::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.state() == EntryState::Failed
    }

    /// The value held by the record's CAS entry, once `Ready`.
    pub fn get_value(&self) -> Option<Value> {
        self.cache.lock_inner().get_cas_value(&self.key)
    }

    /// Pins the record beyond this pointer's lifetime.
    pub fn lock(&self) -> CacheRecordLock {
        CacheRecordLock::new(Arc::clone(&self.cache), self.key.clone())
    }
}

impl Drop for CachePtr {
    fn drop(&mut self) {
        self.cache.lock_inner().release(&self.key);
    }
}
