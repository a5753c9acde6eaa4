// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    caching::secondary::{SecondaryStorage, SecondaryStorageFactory},
    cfg::config::{ServiceConfig, config_keys},
    core::{blob::Blob, errors::Result},
    encodings::lz4,
};

const DEFAULT_SIZE_LIMIT: u64 = 4 << 30;

/// Local on-disk secondary storage: one file per key under a configured
/// directory, pruned in LRU order (by file modification time) when the
/// total size exceeds the cap. Entries are LZ4-compressed on disk.
#[derive(Debug)]
pub struct LocalDiskStorage {
    dir: PathBuf,
    size_limit: u64,
}

impl LocalDiskStorage {
    pub const FACTORY_NAME: &'static str = "local_disk";

    pub fn new(dir: impl Into<PathBuf>, size_limit: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, size_limit })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let dir = config.get_mandatory_string(config_keys::DISK_CACHE_DIRECTORY)?;
        let size_limit =
            config.get_number_or_default(config_keys::DISK_CACHE_SIZE_LIMIT, DEFAULT_SIZE_LIMIT)?;
        Self::new(dir, size_limit)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    // Removes oldest entries until the directory fits the size cap again.
    fn prune(&self) -> Result<()> {
        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let mut total = 0u64;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            total += meta.len();
            entries.push((
                entry.path(),
                meta.len(),
                meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ));
        }
        if total <= self.size_limit {
            return Ok(());
        }
        entries.sort_by_key(|(_, _, mtime)| *mtime);
        for (path, size, _) in entries {
            if total <= self.size_limit {
                break;
            }
            debug!("pruning disk cache entry {}", path.display());
            std::fs::remove_file(&path)?;
            total -= size;
        }
        Ok(())
    }
}

#[async_trait]
impl SecondaryStorage for LocalDiskStorage {
    fn name(&self) -> &str {
        Self::FACTORY_NAME
    }

    async fn read(&self, key: String) -> Result<Option<Blob>> {
        match tokio::fs::read(self.entry_path(&key)).await {
            Ok(bytes) => {
                // Touch the entry so pruning keeps recently used files.
                if let Err(e) = std::fs::File::open(self.entry_path(&key))
                    .and_then(|f| f.set_modified(SystemTime::now()))
                {
                    warn!("cannot touch disk cache entry {key}: {e}");
                }
                Ok(Some(Blob::from_bytes(lz4::decompress(&bytes)?)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: String, value: Blob) -> Result<()> {
        let compressed = lz4::compress(value.as_slice())?;
        tokio::fs::write(self.entry_path(&key), compressed).await?;
        self.prune()
    }

    fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.metadata()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn allow_blob_files(&self) -> bool {
        true
    }
}

pub struct LocalDiskStorageFactory;

impl SecondaryStorageFactory for LocalDiskStorageFactory {
    fn create(&self, config: &ServiceConfig) -> Result<Arc<dyn SecondaryStorage>> {
        Ok(Arc::new(LocalDiskStorage::from_config(config)?))
    }
}
