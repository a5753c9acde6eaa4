// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request-tree evaluation.
//!
//! Uncached function requests resolve their arguments (concurrently) and
//! invoke the function. Cached ones go through the immutable cache: the
//! captured identity keys an action-cache record whose shared single-flight
//! task resolves arguments, consults secondary storage, invokes the
//! function, and publishes the result. Proxy requests serialize the tree
//! and ship it to a registered remote proxy.

use std::sync::Arc;

use futures::{
    FutureExt,
    future::{BoxFuture, join_all},
};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    caching::{
        immutable::{internals::ValueTask, lock::CacheRecordLock, ptr::CachePtr},
        secondary::{SecondaryStorage, deserialize_from_storage, serialize_for_storage},
    },
    context::{AsyncStatus, Context},
    core::{
        errors::{Error, Result},
        id::CapturedId,
        value::Value,
    },
    remote::{proxy::RemoteProxy, wait_async::wait_until_finished},
    requests::{
        request::{FunctionRequest, ProxyRequest, Request},
        retry::{ProxyRetrier, Retrier},
        serialization::serialize_request,
    },
};

/// Resolves a request tree against a context, returning the computed value.
pub fn resolve_request<'a>(ctx: &'a Context, req: &'a Request) -> BoxFuture<'a, Result<Value>> {
    Box::pin(resolve_request_inner(ctx, req))
}

/// Blocking variant for synchronous callers; drives the async path on the
/// given runtime handle rather than duplicating any logic.
pub fn resolve_request_blocking(
    handle: &tokio::runtime::Handle,
    ctx: &Context,
    req: &Request,
) -> Result<Value> {
    handle.block_on(resolve_request(ctx, req))
}

/// Like [`resolve_request`], additionally pinning the root's cache record
/// so the result stays resolvable across independent calls. `None` for
/// uncacheable roots.
pub async fn resolve_request_locked(
    ctx: &Context,
    req: &Request,
) -> Result<(Value, Option<CacheRecordLock>)> {
    match req {
        Request::Function(f) if req.is_cacheable() => {
            let (value, ptr) = resolve_function_cached(ctx, req, f).await?;
            let lock = ptr.lock();
            Ok((value, Some(lock)))
        }
        _ => Ok((resolve_request(ctx, req).await?, None)),
    }
}

async fn resolve_request_inner(ctx: &Context, req: &Request) -> Result<Value> {
    ctx.check_cancelled()?;
    match req {
        Request::Value(v) => {
            if let Some(node) = ctx.async_node() {
                node.update_status(AsyncStatus::Finished);
            }
            Ok(v.value().clone())
        }
        Request::Function(f) => {
            if req.is_cacheable() {
                resolve_function_cached(ctx, req, f)
                    .await
                    .map(|(value, _ptr)| value)
            } else {
                resolve_function_uncached(ctx, req, f).await
            }
        }
        Request::Proxy(p) => resolve_proxy(ctx, req, p).await,
    }
}

fn report_outcome(ctx: &Context, result: &Result<Value>) {
    let Some(node) = ctx.async_node() else {
        return;
    };
    match result {
        Ok(_) => node.update_status(AsyncStatus::Finished),
        Err(Error::AsyncCancelled) => node.update_status(AsyncStatus::Cancelled),
        Err(e) => node.update_status_error(e.to_string()),
    }
}

async fn resolve_function_uncached(
    ctx: &Context,
    req: &Request,
    f: &FunctionRequest,
) -> Result<Value> {
    let result = async {
        let args = resolve_args(ctx, req).await?;
        if let Some(node) = ctx.async_node() {
            node.update_status(AsyncStatus::SelfRunning);
        }
        invoke_with_retry(ctx, f, args).await
    }
    .await;
    report_outcome(ctx, &result);
    result
}

async fn resolve_function_cached(
    ctx: &Context,
    req: &Request,
    _f: &Arc<FunctionRequest>,
) -> Result<(Value, CachePtr)> {
    let key = req.captured_id();
    let cache = ctx.resources().memory_cache();
    if let Some(essentials) = req.essentials() {
        debug!("resolving {} (cached)", essentials.uuid);
    }
    let task_ctx = ctx.clone();
    let task_req = req.clone();
    let ptr = CachePtr::acquire(
        cache,
        key,
        Box::new(move |k| make_function_task(task_ctx, task_req, k.clone())),
    );
    let task = ptr.task();
    let result = tokio::select! {
        _ = ctx.cancellation_token().cancelled() => Err(Error::AsyncCancelled),
        res = task => res,
    };
    report_outcome(ctx, &result);
    result.map(|value| (value, ptr))
}

// The single-flight task body. Created under the cache mutex (construction
// only; the future first runs when an acquirer polls it) and captures the
// creating context, so the creator's async tree sees detailed status
// updates; later awaiters of the shared task observe coarse ones.
fn make_function_task(ctx: Context, req: Request, key: CapturedId) -> ValueTask {
    async move {
        let Request::Function(func_req) = &req else {
            return Err(Error::NotImplemented(
                "cached resolution of non-function requests",
            ));
        };
        let resources = Arc::clone(ctx.resources());
        let cache = resources.memory_cache();
        let storage = if req.is_disk_cacheable() {
            resources.secondary_storage()
        } else {
            None
        };
        let key_str = storage.as_ref().map(|_| key.unique_string());
        let outcome: Result<(Value, bool)> = async {
            let args = resolve_args(&ctx, &req).await?;
            if let Some(node) = ctx.async_node() {
                node.update_status(AsyncStatus::SelfRunning);
            }
            if let (Some(storage), Some(key_str)) = (&storage, &key_str)
                && let Some(blob) = storage.read(key_str.clone()).await?
            {
                debug!("secondary storage hit for {key_str}");
                let value = deserialize_from_storage(&**storage, &blob)?;
                return Ok((value, true));
            }
            let value = invoke_with_retry(&ctx, func_req, args).await?;
            Ok((value, false))
        }
        .await;
        match outcome {
            Ok((value, from_storage)) => {
                if let Some(node) = ctx.async_node() {
                    node.update_status(AsyncStatus::AwaitingResult);
                }
                cache.record_value(&key, &value);
                if !from_storage
                    && let (Some(storage), Some(key_str)) = (storage, key_str)
                {
                    // Fire-and-forget: write failures are logged, never
                    // surfaced. The testing flag makes the write awaited so
                    // tests observe a deterministic storage state.
                    if resources.is_testing() {
                        if let Err(e) = write_secondary(&*storage, key_str, &value).await {
                            warn!("secondary storage write failed: {e}");
                        }
                    } else {
                        let value = value.clone();
                        tokio::spawn(async move {
                            if let Err(e) = write_secondary(&*storage, key_str, &value).await {
                                warn!("secondary storage write failed: {e}");
                            }
                        });
                    }
                }
                Ok(value)
            }
            Err(e) => {
                cache.record_failure(&key);
                Err(e)
            }
        }
    }
    .boxed()
    .shared()
}

async fn write_secondary(
    storage: &dyn SecondaryStorage,
    key_str: String,
    value: &Value,
) -> Result<()> {
    let blob = serialize_for_storage(storage, value)?;
    storage.write(key_str, blob).await
}

// Resolves the subrequests concurrently, in argument order. With an async
// node present, each child resolves against the matching child node.
async fn resolve_args(ctx: &Context, req: &Request) -> Result<Vec<Value>> {
    let subs = req.subrequests();
    if let Some(node) = ctx.async_node() {
        node.update_status(AsyncStatus::SubsRunning);
        if node.children().len() == subs.len() {
            let futures = subs.iter().zip(node.children().iter().cloned()).map(
                |(sub, child)| {
                    let cctx = ctx.child(child);
                    async move { resolve_request(&cctx, sub).await }
                },
            );
            return join_all(futures).await.into_iter().collect();
        }
    }
    let detached = ctx.detached();
    let futures = subs.iter().map(|sub| resolve_request(&detached, sub));
    join_all(futures).await.into_iter().collect()
}

// Invokes the function, racing it against cancellation at the await point
// and applying the request's retry policy to failures.
async fn invoke_with_retry(
    ctx: &Context,
    f: &FunctionRequest,
    args: Vec<Value>,
) -> Result<Value> {
    let mut attempt = 0u32;
    loop {
        ctx.check_cancelled()?;
        let result = tokio::select! {
            _ = ctx.cancellation_token().cancelled() => Err(Error::AsyncCancelled),
            res = f.function.invoke(args.clone()) => res,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(Error::AsyncCancelled) => {
                if let Some(node) = ctx.async_node() {
                    node.update_status(AsyncStatus::Cancelled);
                }
                return Err(Error::AsyncCancelled);
            }
            Err(e) => {
                let Some(retrier) = f.retrier.as_ref() else {
                    return Err(e);
                };
                let delay = retrier.handle_error(attempt, &e)?;
                tokio::select! {
                    _ = ctx.cancellation_token().cancelled() => return Err(Error::AsyncCancelled),
                    () = sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

async fn resolve_proxy(ctx: &Context, req: &Request, p: &ProxyRequest) -> Result<Value> {
    let result = resolve_proxy_retried(ctx, req, p).await;
    report_outcome(ctx, &result);
    result
}

async fn resolve_proxy_retried(ctx: &Context, req: &Request, p: &ProxyRequest) -> Result<Value> {
    let name = ctx
        .proxy_name()
        .ok_or_else(|| Error::Config("no remote proxy configured for proxy request".into()))?;
    let proxy = ctx.resources().get_proxy(name)?;
    let seri_req = serialize_request(req)?;
    let config = ctx.resources().config().clone();
    let retrier: Arc<dyn Retrier> = p
        .retrier
        .clone()
        .unwrap_or_else(|| Arc::new(ProxyRetrier));
    let mut attempt = 0u32;
    loop {
        ctx.check_cancelled()?;
        match resolve_remote_once(ctx, &*proxy, config.clone(), seri_req.clone()).await {
            Ok(value) => return Ok(value),
            Err(Error::AsyncCancelled) => return Err(Error::AsyncCancelled),
            Err(e) => {
                let delay = retrier.handle_error(attempt, &e)?;
                tokio::select! {
                    _ = ctx.cancellation_token().cancelled() => return Err(Error::AsyncCancelled),
                    () = sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

async fn resolve_remote_once(
    ctx: &Context,
    proxy: &dyn RemoteProxy,
    config: crate::cfg::config::ServiceConfig,
    seri_req: String,
) -> Result<Value> {
    if ctx.async_node().is_none() {
        let result = tokio::select! {
            _ = ctx.cancellation_token().cancelled() => return Err(Error::AsyncCancelled),
            res = proxy.resolve_sync(config, seri_req) => res?,
        };
        return result.value();
    }
    if let Some(node) = ctx.async_node() {
        node.update_status(AsyncStatus::SubsRunning);
    }
    let aid = proxy.submit_async(config, seri_req).await?;
    if let Some(node) = ctx.async_node() {
        node.update_status(AsyncStatus::SelfRunning);
    }
    let result = tokio::select! {
        _ = ctx.cancellation_token().cancelled() => Err(Error::AsyncCancelled),
        res = async {
            wait_until_finished(proxy, aid).await?;
            let response = proxy.get_async_response(aid).await?;
            response.value()
        } => res,
    };
    let result = match result {
        Err(Error::AsyncCancelled) => {
            // Tell the peer; its tree transitions to Cancelled on its own.
            let _ = proxy.request_cancellation(aid).await;
            Err(Error::AsyncCancelled)
        }
        other => other,
    };
    if let Err(e) = proxy.finish_async(aid).await {
        warn!("finish_async({aid}) failed: {e}");
    }
    result
}
