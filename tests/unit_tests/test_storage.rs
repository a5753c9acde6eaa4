// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use cradle_rs::{
    caching::secondary::{SecondaryStorage, deserialize_from_storage, serialize_for_storage},
    cfg::config::{ConfigValue, ServiceConfig},
    core::{blob::Blob, value::Value},
    requests::{CachingLevel, request::rq_function, request::rq_value},
    resolve::{seri_catalog::SeriCatalog, seri_registry::SeriRegistry},
    service::request_store::{load_request, store_request},
    storage::{disk::LocalDiskStorage, memory::MemoryStorage},
};
use serial_test::serial;
use tempfile::tempdir;

use super::{adder, props, test_resources};

#[tokio::test]
async fn memory_storage_reads_writes_and_counts() -> Result<()> {
    let storage = MemoryStorage::new();
    assert_eq!(storage.read("missing".into()).await?, None);
    storage
        .write("k".into(), Blob::from_bytes(b"payload".to_vec()))
        .await?;
    assert_eq!(
        storage.read("k".into()).await?.map(|b| b.as_slice().to_vec()),
        Some(b"payload".to_vec())
    );
    assert_eq!(storage.read_count(), 2);
    assert_eq!(storage.hit_count(), 1);
    assert_eq!(storage.write_count(), 1);

    storage.clear()?;
    assert!(storage.is_empty());
    Ok(())
}

#[tokio::test]
async fn disk_storage_round_trips_and_misses() -> Result<()> {
    let dir = tempdir()?;
    let storage = LocalDiskStorage::new(dir.path(), 1 << 20)?;
    assert_eq!(storage.read("absent".into()).await?, None);

    let key = "a".repeat(64);
    storage
        .write(key.clone(), Blob::from_bytes(b"on disk".to_vec()))
        .await?;
    assert_eq!(
        storage.read(key.clone()).await?.map(|b| b.as_slice().to_vec()),
        Some(b"on disk".to_vec())
    );
    // Entries are compressed at rest, not stored verbatim.
    let raw = std::fs::read(dir.path().join(&key))?;
    assert_ne!(raw, b"on disk".to_vec());

    storage.clear()?;
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

// mtime ordering is the pruning criterion; keep wall-clock noise low.
#[tokio::test]
#[serial]
async fn disk_storage_prunes_oldest_entries_beyond_the_cap() -> Result<()> {
    let dir = tempdir()?;
    let storage = LocalDiskStorage::new(dir.path(), 250)?;
    for (i, key) in ["k1", "k2", "k3"].iter().enumerate() {
        // Non-repeating payloads stay ~100 bytes through compression.
        let payload: Vec<u8> = (0..100u32).map(|b| (b * 7 + i as u32) as u8).collect();
        storage
            .write((*key).to_string(), Blob::from_bytes(payload))
            .await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let remaining: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(remaining.len() <= 2);
    assert!(remaining.contains(&"k3".to_string()));
    assert!(!remaining.contains(&"k1".to_string()));
    Ok(())
}

#[test]
fn storage_codec_follows_the_blob_file_policy() -> Result<()> {
    let storage = MemoryStorage::new();
    let value = Value::List(vec![Value::Int(3), Value::Blob(Blob::from_bytes(vec![7; 3]))]);
    let packed = serialize_for_storage(&storage, &value)?;
    let back = deserialize_from_storage(&storage, &packed)?;
    assert_eq!(back, value);
    Ok(())
}

#[tokio::test]
async fn requests_can_be_stored_and_loaded_by_identity() -> Result<()> {
    let registry = Arc::new(SeriRegistry::new());
    let catalog = SeriCatalog::new(Arc::clone(&registry));
    let sample = rq_function(props("rq_add", CachingLevel::Memory), adder(), vec![
        rq_value(0),
        rq_value(0),
    ])?;
    catalog.register_resolver(&sample)?;

    let storage = MemoryStorage::new();
    let req = rq_function(props("rq_add", CachingLevel::Memory), adder(), vec![
        rq_value(2),
        rq_value(3),
    ])?;
    let key = store_request(&storage, &req).await?;
    assert_eq!(key, req.captured_id().unique_string());
    assert_eq!(key.len(), 64);

    let back = load_request(&storage, &registry, &key).await?;
    assert_eq!(back, req);
    Ok(())
}

#[tokio::test]
async fn factory_selection_is_config_driven() -> Result<()> {
    let resources = test_resources();
    let mut config = ServiceConfig::default();
    config.insert("secondary_cache/factory", ConfigValue::Str("memory".into()));
    resources.reset_secondary_storage(&config)?;
    let storage = resources.secondary_storage().expect("storage installed");
    assert_eq!(storage.name(), "memory");

    let mut bad = ServiceConfig::default();
    bad.insert(
        "secondary_cache/factory",
        ConfigValue::Str("no-such-plugin".into()),
    );
    assert!(resources.reset_secondary_storage(&bad).is_err());
    Ok(())
}
