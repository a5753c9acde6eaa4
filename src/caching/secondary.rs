// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use async_trait::async_trait;

use crate::{
    cfg::config::ServiceConfig,
    core::{blob::Blob, errors::Result, value::Value},
    encodings::msgpack::{BlobFilePolicy, pack_value, unpack_value},
};

/// A pluggable key→blob store consulted on action-cache misses for
/// fully-cached requests.
///
/// Keys are 64-char lowercase-hex SHA-256 strings derived from a request's
/// captured identity. Values are the msgpack form of the computed value.
#[async_trait]
pub trait SecondaryStorage: Send + Sync {
    fn name(&self) -> &str;

    /// Reads the value for `key`; `None` when the key is not present.
    /// Other failures are errors.
    async fn read(&self, key: String) -> Result<Option<Blob>>;

    async fn write(&self, key: String, value: Blob) -> Result<()>;

    /// Removes all entries.
    fn clear(&self) -> Result<()>;

    /// Whether this storage can alias blob files, which determines the
    /// serialization codec for values passing through it.
    fn allow_blob_files(&self) -> bool;
}

/// Factory producing a [`SecondaryStorage`] from a configuration; plugins
/// register one under the name matched against `secondary_cache/factory`.
pub trait SecondaryStorageFactory: Send + Sync {
    fn create(&self, config: &ServiceConfig) -> Result<std::sync::Arc<dyn SecondaryStorage>>;
}

/// Serializes a value for a given storage, honoring its blob-file policy.
pub fn serialize_for_storage(storage: &dyn SecondaryStorage, value: &Value) -> Result<Blob> {
    let policy = if storage.allow_blob_files() {
        BlobFilePolicy::ByReference
    } else {
        BlobFilePolicy::Inline
    };
    Ok(Blob::from_bytes(pack_value(value, policy)?))
}

/// Deserializes a value read back from a given storage.
pub fn deserialize_from_storage(storage: &dyn SecondaryStorage, blob: &Blob) -> Result<Value> {
    let policy = if storage.allow_blob_files() {
        BlobFilePolicy::ByReference
    } else {
        BlobFilePolicy::Inline
    };
    unpack_value(blob.as_slice(), policy)
}
