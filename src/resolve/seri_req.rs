// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Resolving serialized requests to serialized responses, locally or
//! through a registered proxy.

use bytes::Bytes;
use tracing::debug;

use crate::{
    context::Context,
    core::errors::Result,
    encodings::msgpack::{BlobFilePolicy, pack_value},
    remote::proxy::SerializedResult,
    requests::serialization::{deserialize_request, extract_uuid_str},
    resolve::resolve_request::resolve_request_locked,
};

/// Resolves a serialized request locally: looks up the uuid in the
/// registry, rebuilds the request, resolves it, and packs the value.
pub async fn resolve_serialized_local(ctx: &Context, seri_req: String) -> Result<SerializedResult> {
    resolve_serialized_local_impl(ctx, seri_req, false).await
}

/// Like [`resolve_serialized_local`], additionally pinning the root cache
/// record; the returned record id keeps the result resolvable until the
/// caller releases the lock through the resources object.
pub async fn resolve_serialized_local_pinned(
    ctx: &Context,
    seri_req: String,
) -> Result<SerializedResult> {
    resolve_serialized_local_impl(ctx, seri_req, true).await
}

async fn resolve_serialized_local_impl(
    ctx: &Context,
    seri_req: String,
    pin: bool,
) -> Result<SerializedResult> {
    let uuid_str = extract_uuid_str(&seri_req)?;
    debug!("resolving serialized request {uuid_str}");
    let req = deserialize_request(ctx.resources().seri_registry(), &seri_req)?;
    let (value, lock) = resolve_request_locked(ctx, &req).await?;
    // Responses always inline blob contents; file paths don't cross the
    // serialization boundary.
    let bytes = pack_value(&value, BlobFilePolicy::Inline)?;
    let mut result = SerializedResult::new(Bytes::from(bytes));
    if pin && let Some(lock) = lock {
        let record_id = ctx.resources().store_lock(lock);
        result = result.with_record_id(record_id);
    }
    Ok(result)
}

/// Resolves a serialized request through the context's configured proxy.
pub async fn resolve_serialized_remote(
    ctx: &Context,
    seri_req: String,
) -> Result<SerializedResult> {
    let name = ctx.proxy_name().ok_or_else(|| {
        crate::core::errors::Error::Config("no remote proxy configured".into())
    })?;
    let proxy = ctx.resources().get_proxy(name)?;
    proxy
        .resolve_sync(ctx.resources().config().clone(), seri_req)
        .await
}

/// Resolves a serialized request wherever the context points: through the
/// configured proxy when one is set, locally otherwise.
pub async fn resolve_serialized_request(
    ctx: &Context,
    seri_req: String,
) -> Result<SerializedResult> {
    if ctx.proxy_name().is_some() {
        resolve_serialized_remote(ctx, seri_req).await
    } else {
        resolve_serialized_local(ctx, seri_req).await
    }
}
