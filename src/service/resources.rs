// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tracing::info;

use crate::{
    blob_file::BlobFileDirectory,
    caching::{
        immutable::{ImmutableCache, ImmutableCacheConfig, lock::CacheRecordLock},
        secondary::{SecondaryStorage, SecondaryStorageFactory},
    },
    cfg::config::{ServiceConfig, config_keys},
    core::{
        blob::BlobFileWriter,
        errors::{Error, Result},
    },
    remote::{async_db::AsyncDb, proxy::RemoteProxy},
    resolve::seri_registry::SeriRegistry,
    storage::{
        disk::{LocalDiskStorage, LocalDiskStorageFactory},
        http::{HttpStorage, HttpStorageFactory},
        memory::{MemoryStorage, MemoryStorageFactory},
    },
};

const DEFAULT_HTTP_CONCURRENCY: u64 = 36;
const DEFAULT_ASYNC_CONCURRENCY: u64 = 20;

/// Everything a resolution needs: the memory cache, the optional secondary
/// storage, the registries, the blob-file directory and the concurrency
/// bounds. A process conventionally holds one, but tests instantiate as
/// many independent ones as they like.
pub struct Resources {
    config: ServiceConfig,
    memory_cache: Arc<ImmutableCache>,
    secondary: Mutex<Option<Arc<dyn SecondaryStorage>>>,
    storage_factories: DashMap<String, Arc<dyn SecondaryStorageFactory>>,
    proxies: DashMap<String, Arc<dyn RemoteProxy>>,
    async_db: AsyncDb,
    blob_dir: OnceCell<Arc<BlobFileDirectory>>,
    seri_registry: Arc<SeriRegistry>,
    http_semaphore: Arc<Semaphore>,
    async_semaphore: Arc<Semaphore>,
    locked_records: DashMap<u64, CacheRecordLock>,
    next_lock_id: AtomicU64,
    testing: bool,
}

impl Resources {
    /// Builds a resources object from a configuration. The built-in storage
    /// factories are registered, and a secondary storage is created right
    /// away when `secondary_cache/factory` names one.
    pub fn new(config: ServiceConfig) -> Result<Arc<Self>> {
        let unused_size_limit = config.get_number_or_default(
            config_keys::MEMORY_CACHE_UNUSED_SIZE_LIMIT,
            ImmutableCacheConfig::default().unused_size_limit,
        )?;
        let http_concurrency =
            config.get_number_or_default(config_keys::HTTP_CONCURRENCY, DEFAULT_HTTP_CONCURRENCY)?;
        let async_concurrency = config
            .get_number_or_default(config_keys::ASYNC_CONCURRENCY, DEFAULT_ASYNC_CONCURRENCY)?;
        let testing = config.get_bool_or_default(config_keys::TESTING, false)?;
        let http_semaphore = Arc::new(Semaphore::new(http_concurrency as usize));

        let resources = Arc::new(Self {
            memory_cache: Arc::new(ImmutableCache::new(ImmutableCacheConfig {
                unused_size_limit,
            })),
            secondary: Mutex::new(None),
            storage_factories: DashMap::new(),
            proxies: DashMap::new(),
            async_db: AsyncDb::new(),
            blob_dir: OnceCell::new(),
            seri_registry: Arc::new(SeriRegistry::new()),
            http_semaphore: Arc::clone(&http_semaphore),
            async_semaphore: Arc::new(Semaphore::new(async_concurrency as usize)),
            locked_records: DashMap::new(),
            next_lock_id: AtomicU64::new(1),
            testing,
            config,
        });

        resources.register_storage_factory(
            MemoryStorage::FACTORY_NAME,
            Arc::new(MemoryStorageFactory),
        );
        resources.register_storage_factory(
            LocalDiskStorage::FACTORY_NAME,
            Arc::new(LocalDiskStorageFactory),
        );
        resources.register_storage_factory(
            HttpStorage::FACTORY_NAME,
            Arc::new(HttpStorageFactory::new(http_semaphore)),
        );

        if resources
            .config
            .contains(config_keys::SECONDARY_CACHE_FACTORY)
        {
            resources.reset_secondary_storage(&resources.config)?;
        }
        Ok(resources)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn is_testing(&self) -> bool {
        self.testing
    }

    pub fn memory_cache(&self) -> Arc<ImmutableCache> {
        Arc::clone(&self.memory_cache)
    }

    /// Clears the memory cache, optionally with a new size limit.
    pub fn reset_memory_cache(&self, config: ImmutableCacheConfig) {
        self.memory_cache.reset(config);
    }

    pub fn register_storage_factory(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn SecondaryStorageFactory>,
    ) {
        self.storage_factories.insert(name.into(), factory);
    }

    /// (Re)creates the secondary storage named by
    /// `secondary_cache/factory`.
    pub fn reset_secondary_storage(&self, config: &ServiceConfig) -> Result<()> {
        let factory_name = config.get_mandatory_string(config_keys::SECONDARY_CACHE_FACTORY)?;
        let factory = self
            .storage_factories
            .get(&factory_name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| {
                Error::Config(format!("unknown secondary storage factory \"{factory_name}\""))
            })?;
        let storage = factory.create(config)?;
        info!("using secondary storage {}", storage.name());
        *self.secondary.lock().expect("storage mutex poisoned") = Some(storage);
        Ok(())
    }

    /// Installs a storage instance directly; tests use this to observe the
    /// storage from outside.
    pub fn set_secondary_storage(&self, storage: Arc<dyn SecondaryStorage>) {
        *self.secondary.lock().expect("storage mutex poisoned") = Some(storage);
    }

    pub fn secondary_storage(&self) -> Option<Arc<dyn SecondaryStorage>> {
        self.secondary
            .lock()
            .expect("storage mutex poisoned")
            .clone()
    }

    pub fn register_proxy(&self, proxy: Arc<dyn RemoteProxy>) {
        self.proxies.insert(proxy.name().to_owned(), proxy);
    }

    pub fn get_proxy(&self, name: &str) -> Result<Arc<dyn RemoteProxy>> {
        self.proxies
            .get(name)
            .map(|p| Arc::clone(p.value()))
            .ok_or_else(|| Error::Remote {
                message: format!("no proxy registered under \"{name}\""),
                retryable: false,
            })
    }

    pub fn async_db(&self) -> &AsyncDb {
        &self.async_db
    }

    pub fn seri_registry(&self) -> &Arc<SeriRegistry> {
        &self.seri_registry
    }

    pub fn http_semaphore(&self) -> &Arc<Semaphore> {
        &self.http_semaphore
    }

    pub fn async_semaphore(&self) -> &Arc<Semaphore> {
        &self.async_semaphore
    }

    /// The blob-file directory, created on first use from
    /// `blob_cache/directory`.
    pub fn blob_file_directory(&self) -> Result<Arc<BlobFileDirectory>> {
        self.blob_dir
            .get_or_try_init(|| BlobFileDirectory::from_config(&self.config).map(Arc::new))
            .cloned()
    }

    /// Allocates a fresh blob file of the given size.
    pub fn make_blob_file_writer(&self, size: usize) -> Result<BlobFileWriter> {
        self.blob_file_directory()?.make_writer(size)
    }

    /// Parks a cache-record lock, returning the id a remote client uses to
    /// release it later.
    pub fn store_lock(&self, lock: CacheRecordLock) -> u64 {
        let id = self.next_lock_id.fetch_add(1, Ordering::Relaxed);
        self.locked_records.insert(id, lock);
        id
    }

    /// Releases a parked lock; false if the id is unknown.
    pub fn release_lock(&self, id: u64) -> bool {
        self.locked_records.remove(&id).is_some()
    }
}
