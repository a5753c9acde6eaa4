// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::ServiceConfig,
    context::{AsyncContextNode, AsyncId, AsyncStatus, Context},
    core::errors::{Error, Result},
    encodings::msgpack::{BlobFilePolicy, pack_value},
    remote::proxy::{RemoteContextSpec, RemoteProxy, SerializedResult},
    requests::serialization::deserialize_request,
    resolve::{resolve_request::resolve_request, seri_req::resolve_serialized_local},
    service::resources::Resources,
};

/// In-process "remote": the peer is the owning process itself.
///
/// Short-circuits the serialization boundary without skipping it, so the
/// full remote protocol can be exercised (and tested) without a server.
pub struct LoopbackProxy {
    resources: Weak<Resources>,
}

impl LoopbackProxy {
    pub const NAME: &'static str = "loopback";

    pub fn new(resources: &Arc<Resources>) -> Self {
        Self {
            resources: Arc::downgrade(resources),
        }
    }

    fn resources(&self) -> Result<Arc<Resources>> {
        self.resources.upgrade().ok_or_else(|| Error::Remote {
            message: "loopback resources are gone".into(),
            retryable: false,
        })
    }

    fn find_node(&self, aid: AsyncId) -> Result<Arc<AsyncContextNode>> {
        self.resources()?.async_db().find(aid)
    }
}

/// Registers a loopback proxy on the resources object.
pub fn register_loopback_service(resources: &Arc<Resources>) {
    resources.register_proxy(Arc::new(LoopbackProxy::new(resources)));
}

async fn run_async_resolution(
    resources: Arc<Resources>,
    root: Arc<AsyncContextNode>,
    req: crate::requests::request::Request,
) {
    let ctx = Context::for_async_root(Arc::clone(&resources), Arc::clone(&root));
    match resolve_request(&ctx, &req).await {
        Ok(value) => {
            root.update_status(AsyncStatus::AwaitingResult);
            match pack_value(&value, BlobFilePolicy::Inline) {
                Ok(bytes) => {
                    root.set_result(Bytes::from(bytes));
                    root.update_status(AsyncStatus::Finished);
                }
                Err(e) => root.update_status_error(e.to_string()),
            }
        }
        Err(Error::AsyncCancelled) => {
            info!("async resolution {} cancelled", root.id());
            root.update_status(AsyncStatus::Cancelled);
        }
        Err(e) => {
            warn!("async resolution {} failed: {e}", root.id());
            root.update_status_error(e.to_string());
        }
    }
}

#[async_trait]
impl RemoteProxy for LoopbackProxy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn resolve_sync(
        &self,
        _config: ServiceConfig,
        seri_req: String,
    ) -> Result<SerializedResult> {
        debug!("loopback resolve_sync: {} ...", head_of(&seri_req));
        let resources = self.resources()?;
        let ctx = Context::new(resources);
        resolve_serialized_local(&ctx, seri_req).await
    }

    async fn submit_async(&self, _config: ServiceConfig, seri_req: String) -> Result<AsyncId> {
        debug!("loopback submit_async: {} ...", head_of(&seri_req));
        let resources = self.resources()?;
        let req = deserialize_request(resources.seri_registry(), &seri_req)?;
        let root = AsyncContextNode::build_tree(&req);
        resources.async_db().add(&root);
        let aid = root.id();
        let permit = Arc::clone(resources.async_semaphore())
            .acquire_owned()
            .await
            .map_err(|_| Error::Remote {
                message: "async pool closed".into(),
                retryable: false,
            })?;
        tokio::spawn(async move {
            let _permit = permit;
            run_async_resolution(resources, root, req).await;
        });
        info!("loopback submit_async -> {aid}");
        Ok(aid)
    }

    async fn get_sub_contexts(&self, aid: AsyncId) -> Result<Vec<RemoteContextSpec>> {
        let node = self.find_node(aid)?;
        Ok(node
            .children()
            .iter()
            .map(|child| (child.id(), child.is_req()))
            .collect())
    }

    async fn get_async_status(&self, aid: AsyncId) -> Result<AsyncStatus> {
        Ok(self.find_node(aid)?.status())
    }

    async fn get_async_error_message(&self, aid: AsyncId) -> Result<String> {
        Ok(self.find_node(aid)?.error_message().unwrap_or_default())
    }

    async fn get_async_response(&self, root_aid: AsyncId) -> Result<SerializedResult> {
        let node = self.find_node(root_aid)?;
        let status = node.status();
        if status != AsyncStatus::Finished {
            return Err(Error::AsyncError(format!(
                "async resolution {root_aid} has status {status}, not FINISHED"
            )));
        }
        let bytes = node.result().ok_or_else(|| {
            Error::AsyncError(format!("async resolution {root_aid} has no result"))
        })?;
        Ok(SerializedResult::new(bytes))
    }

    async fn request_cancellation(&self, aid: AsyncId) -> Result<()> {
        info!("loopback request_cancellation {aid}");
        self.find_node(aid)?.request_cancellation();
        Ok(())
    }

    async fn finish_async(&self, root_aid: AsyncId) -> Result<()> {
        debug!("loopback finish_async {root_aid}");
        self.resources()?.async_db().remove_tree(root_aid)
    }
}

fn head_of(text: &str) -> &str {
    text.get(..40).unwrap_or(text)
}
