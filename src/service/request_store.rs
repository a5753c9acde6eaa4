// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Persisting requests themselves (not their results) into secondary
//! storage, keyed by their identity digest, so a peer can fetch a request
//! by id instead of receiving the full tree.

use tracing::debug;

use crate::{
    caching::secondary::SecondaryStorage,
    core::{
        blob::Blob,
        errors::{Error, Result},
    },
    requests::{
        request::Request,
        serialization::{deserialize_request, serialize_request},
    },
    resolve::seri_registry::SeriRegistry,
};

/// Writes the serialized form of a request under its identity digest and
/// returns the key.
pub async fn store_request(storage: &dyn SecondaryStorage, req: &Request) -> Result<String> {
    let key = req.captured_id().unique_string();
    let text = serialize_request(req)?;
    debug!("storing request {key}");
    storage.write(key.clone(), Blob::from_string(text)).await?;
    Ok(key)
}

/// Fetches and rebuilds a stored request.
pub async fn load_request(
    storage: &dyn SecondaryStorage,
    registry: &SeriRegistry,
    key: &str,
) -> Result<Request> {
    let blob = storage
        .read(key.to_owned())
        .await?
        .ok_or_else(|| Error::Io(format!("no stored request under key {key}")))?;
    let text = std::str::from_utf8(blob.as_slice())
        .map_err(|e| Error::MalformedJson(format!("stored request is not UTF-8: {e}")))?;
    deserialize_request(registry, text)
}
