// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    caching::secondary::{SecondaryStorage, SecondaryStorageFactory},
    cfg::config::ServiceConfig,
    core::{blob::Blob, errors::Result},
};

/// In-memory secondary storage, for tests and loopback setups.
///
/// Counts reads, hits and writes so tests can assert which tier served a
/// resolution.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Blob>,
    reads: AtomicU64,
    hits: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStorage {
    pub const FACTORY_NAME: &'static str = "memory";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SecondaryStorage for MemoryStorage {
    fn name(&self) -> &str {
        Self::FACTORY_NAME
    }

    async fn read(&self, key: String) -> Result<Option<Blob>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let found = self.entries.get(&key).map(|e| e.value().clone());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn write(&self, key: String, value: Blob) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, value);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn allow_blob_files(&self) -> bool {
        true
    }
}

pub struct MemoryStorageFactory;

impl SecondaryStorageFactory for MemoryStorageFactory {
    fn create(&self, _config: &ServiceConfig) -> Result<Arc<dyn SecondaryStorage>> {
        Ok(Arc::new(MemoryStorage::new()))
    }
}
