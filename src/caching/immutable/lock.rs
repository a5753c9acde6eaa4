// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{caching::immutable::ImmutableCache, core::id::CapturedId};

/// Pins one action-cache record against eviction.
///
/// While at least one lock on a record exists, the record won't be evicted
/// even when no `CachePtr` references it. A client holding a lock is assured
/// that re-resolving the corresponding request finds the result immediately;
/// remote clients use this to keep a value resolvable across independent
/// RPC calls.
pub struct CacheRecordLock {
    cache: Arc<ImmutableCache>,
    key: CapturedId,
}

impl CacheRecordLock {
    pub(crate) fn new(cache: Arc<ImmutableCache>, key: CapturedId) -> Self {
        cache.lock_inner().add_lock(&key);
        Self { cache, key }
    }

    pub fn key(&self) -> &CapturedId {
        &self.key
    }
}

impl Drop for CacheRecordLock {
    fn drop(&mut self) {
        self.cache.lock_inner().del_lock(&self.key);
    }
}
