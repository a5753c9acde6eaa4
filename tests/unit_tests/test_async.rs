// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use cradle_rs::{
    context::{AsyncContextNode, AsyncStatus, Context},
    core::{errors::Error, value::Value},
    remote::{
        async_db::AsyncDb,
        loopback::{LoopbackProxy, register_loopback_service},
        proxy::RemoteProxy,
        wait_async::{wait_until_async_status_matches, wait_until_finished},
    },
    requests::{
        CachingLevel,
        function::coro_function,
        request::{Request, rq_function, rq_proxy, rq_value},
        serialization::serialize_request,
    },
    resolve::{resolve_request::resolve_request, seri_catalog::SeriCatalog},
    service::resources::Resources,
};
use futures::FutureExt;
use serial_test::serial;

use super::{adder, props, test_resources};

fn sample_tree() -> Result<Request> {
    let inner = rq_function(props("rq_inner", CachingLevel::None), adder(), vec![
        rq_value(2),
    ])?;
    Ok(rq_function(props("rq_outer", CachingLevel::None), adder(), vec![
        rq_value(1),
        inner,
    ])?)
}

// Resources with a registered adder class and a loopback proxy.
fn loopback_setup(base: &str, level: CachingLevel) -> Result<(Arc<Resources>, SeriCatalog, Request)> {
    let resources = test_resources();
    let catalog = SeriCatalog::new(Arc::clone(resources.seri_registry()));
    let sample = rq_function(props(base, level), adder(), vec![rq_value(0), rq_value(0)])?;
    catalog.register_resolver(&sample)?;
    register_loopback_service(&resources);
    let req = rq_function(props(base, level), adder(), vec![rq_value(2), rq_value(3)])?;
    Ok((resources, catalog, req))
}

#[test]
fn status_strings_and_finality() {
    assert_eq!(AsyncStatus::SubsRunning.to_string(), "SUBS_RUNNING");
    assert_eq!(AsyncStatus::Finished.to_string(), "FINISHED");
    assert!(!AsyncStatus::Created.is_final());
    assert!(!AsyncStatus::SelfRunning.is_final());
    assert!(AsyncStatus::Cancelled.is_final());
    assert!(AsyncStatus::Error.is_final());
}

#[test]
fn context_tree_mirrors_the_request_tree() -> Result<()> {
    let root = AsyncContextNode::build_tree(&sample_tree()?);
    assert!(root.is_req());
    assert_eq!(root.children().len(), 2);
    assert!(!root.children()[0].is_req());
    assert!(root.children()[1].is_req());
    assert_eq!(root.children()[1].children().len(), 1);
    assert_eq!(root.subtree().len(), 4);
    Ok(())
}

#[test]
fn cancellation_reaches_all_descendants() -> Result<()> {
    let root = AsyncContextNode::build_tree(&sample_tree()?);
    let grandchild = Arc::clone(&root.children()[1].children()[0]);
    assert!(!grandchild.is_cancellation_requested());
    root.request_cancellation();
    assert!(grandchild.is_cancellation_requested());
    Ok(())
}

#[test]
fn final_statuses_are_sticky() -> Result<()> {
    let root = AsyncContextNode::build_tree(&sample_tree()?);
    root.update_status(AsyncStatus::SubsRunning);
    root.update_status(AsyncStatus::Cancelled);
    root.update_status(AsyncStatus::Finished);
    assert_eq!(root.status(), AsyncStatus::Cancelled);

    root.update_status_error("too late");
    assert_eq!(root.status(), AsyncStatus::Cancelled);
    Ok(())
}

#[test]
fn async_db_finds_and_removes_trees() -> Result<()> {
    let db = AsyncDb::new();
    let root = AsyncContextNode::build_tree(&sample_tree()?);
    db.add(&root);
    let child_id = root.children()[1].id();
    assert_eq!(db.find(child_id)?.id(), child_id);

    db.remove_tree(root.id())?;
    assert!(matches!(db.find(child_id), Err(Error::BadAsyncId(_))));
    assert!(db.is_empty());
    Ok(())
}

#[tokio::test]
async fn loopback_resolves_synchronously() -> Result<()> {
    let (resources, _catalog, req) = loopback_setup("rq_add", CachingLevel::Memory)?;
    let proxy = resources.get_proxy(LoopbackProxy::NAME)?;
    let result = proxy
        .resolve_sync(resources.config().clone(), serialize_request(&req)?)
        .await?;
    assert_eq!(result.value()?, Value::Int(5));
    Ok(())
}

#[tokio::test]
async fn loopback_async_submission_polls_to_completion() -> Result<()> {
    let (resources, _catalog, req) = loopback_setup("rq_add", CachingLevel::Memory)?;
    let proxy = resources.get_proxy(LoopbackProxy::NAME)?;
    let aid = proxy
        .submit_async(resources.config().clone(), serialize_request(&req)?)
        .await?;

    wait_until_finished(&*proxy, aid).await?;
    let subs = proxy.get_sub_contexts(aid).await?;
    assert_eq!(subs.len(), 2);
    assert!(subs.iter().all(|(_, is_req)| !is_req));

    let response = proxy.get_async_response(aid).await?;
    assert_eq!(response.value()?, Value::Int(5));

    proxy.finish_async(aid).await?;
    assert!(matches!(
        proxy.get_async_status(aid).await,
        Err(Error::BadAsyncId(_))
    ));
    Ok(())
}

// Asserts a wall-clock bound on cancellation latency.
#[tokio::test]
#[serial]
async fn cancellation_interrupts_a_sleeping_resolution() -> Result<()> {
    let resources = test_resources();
    let catalog = SeriCatalog::new(Arc::clone(resources.seri_registry()));
    let sleeper = coro_function(|_args| {
        async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Int(0))
        }
        .boxed()
    });
    let sample = rq_function(
        props("rq_sleep", CachingLevel::Memory),
        Arc::clone(&sleeper),
        vec![rq_value(0)],
    )?;
    catalog.register_resolver(&sample)?;
    register_loopback_service(&resources);
    let proxy = resources.get_proxy(LoopbackProxy::NAME)?;

    let req = rq_function(props("rq_sleep", CachingLevel::Memory), sleeper, vec![
        rq_value(1),
    ])?;
    let aid = proxy
        .submit_async(resources.config().clone(), serialize_request(&req)?)
        .await?;

    // Let the resolution get under way.
    wait_until_async_status_matches(&*proxy, aid, |s| {
        matches!(s, AsyncStatus::SubsRunning | AsyncStatus::SelfRunning)
    })
    .await?;

    proxy.request_cancellation(aid).await?;
    tokio::time::timeout(
        Duration::from_secs(1),
        wait_until_async_status_matches(&*proxy, aid, |s| s == AsyncStatus::Cancelled),
    )
    .await
    .expect("cancellation settles within a second")?;
    assert_eq!(proxy.get_async_status(aid).await?, AsyncStatus::Cancelled);

    // Waiting for completion on a cancelled resolution reports cancellation.
    assert!(matches!(
        wait_until_finished(&*proxy, aid).await,
        Err(Error::AsyncCancelled)
    ));

    assert!(proxy.get_async_response(aid).await.is_err());
    proxy.finish_async(aid).await?;
    Ok(())
}

#[tokio::test]
async fn errors_carry_their_message_across_the_boundary() -> Result<()> {
    let resources = test_resources();
    let catalog = SeriCatalog::new(Arc::clone(resources.seri_registry()));
    let failing = cradle_rs::requests::function::plain_function(|_args| {
        Err(Error::Calculation("division by cucumber".into()))
    });
    let sample = rq_function(
        props("rq_fail", CachingLevel::None),
        Arc::clone(&failing),
        vec![rq_value(0)],
    )?;
    catalog.register_resolver(&sample)?;
    register_loopback_service(&resources);
    let proxy = resources.get_proxy(LoopbackProxy::NAME)?;

    let req = rq_function(props("rq_fail", CachingLevel::None), failing, vec![rq_value(1)])?;
    let aid = proxy
        .submit_async(resources.config().clone(), serialize_request(&req)?)
        .await?;
    let err = wait_until_finished(&*proxy, aid).await.expect_err("fails");
    assert!(matches!(&err, Error::AsyncError(msg) if msg.contains("division by cucumber")));
    proxy.finish_async(aid).await?;
    Ok(())
}

#[tokio::test]
async fn proxy_requests_dispatch_through_the_registered_proxy() -> Result<()> {
    let (resources, _catalog, _req) = loopback_setup("rq_add", CachingLevel::Memory)?;
    let proxy_req = rq_proxy(props("rq_add", CachingLevel::Memory), vec![
        rq_value(2),
        rq_value(3),
    ])?;
    let ctx = Context::new(Arc::clone(&resources)).with_proxy_name(LoopbackProxy::NAME);
    assert_eq!(resolve_request(&ctx, &proxy_req).await?, Value::Int(5));
    Ok(())
}

#[tokio::test]
async fn proxy_requests_use_the_async_protocol_under_an_async_root() -> Result<()> {
    let (resources, _catalog, _req) = loopback_setup("rq_add", CachingLevel::Memory)?;
    let proxy_req = rq_proxy(props("rq_add", CachingLevel::Memory), vec![
        rq_value(40),
        rq_value(2),
    ])?;
    let root = AsyncContextNode::build_tree(&proxy_req);
    let ctx = Context::for_async_root(Arc::clone(&resources), Arc::clone(&root))
        .with_proxy_name(LoopbackProxy::NAME);
    assert_eq!(resolve_request(&ctx, &proxy_req).await?, Value::Int(42));
    assert_eq!(root.status(), AsyncStatus::Finished);
    Ok(())
}

#[tokio::test]
async fn serialized_resolution_dispatches_by_context() -> Result<()> {
    use cradle_rs::resolve::seri_req::resolve_serialized_request;

    let (resources, _catalog, req) = loopback_setup("rq_add", CachingLevel::Memory)?;
    let text = serialize_request(&req)?;

    // No proxy configured: resolves locally.
    let local_ctx = Context::new(Arc::clone(&resources));
    let local = resolve_serialized_request(&local_ctx, text.clone()).await?;
    assert_eq!(local.value()?, Value::Int(5));

    // With a proxy name: ships through the proxy.
    let remote_ctx = Context::new(Arc::clone(&resources)).with_proxy_name(LoopbackProxy::NAME);
    let remote = resolve_serialized_request(&remote_ctx, text).await?;
    assert_eq!(remote.value()?, Value::Int(5));
    Ok(())
}

#[tokio::test]
async fn contained_pool_starts_empty() {
    use cradle_rs::resolve::contained::ContainedProxyPool;

    let pool = ContainedProxyPool::new();
    assert!(pool.checkout().await.is_none());
    pool.shutdown().await;
}

#[tokio::test]
async fn missing_proxy_is_a_remote_error() -> Result<()> {
    let resources = test_resources();
    assert!(matches!(
        resources.get_proxy("nowhere"),
        Err(Error::Remote { .. })
    ));
    Ok(())
}
