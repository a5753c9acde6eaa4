// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    core::errors::{Error, Result},
    requests::request::Request,
    service::resources::Resources,
};

/// Identifies an async operation. Unique within its (local or remote)
/// service.
pub type AsyncId = u64;

pub const NO_ASYNC_ID: AsyncId = AsyncId::MAX;

static NEXT_ASYNC_ID: AtomicU64 = AtomicU64::new(1);

fn next_async_id() -> AsyncId {
    NEXT_ASYNC_ID.fetch_add(1, Ordering::Relaxed)
}

/// Status of an asynchronous resolution node.
///
/// `Cancelled`, `Finished` and `Error` are final: once a node reaches one of
/// these, its status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    /// The node was created.
    Created,
    /// Subrequests running, this node waiting for them.
    SubsRunning,
    /// Subrequests finished, this node's own computation running.
    SelfRunning,
    /// Cancellation completed.
    Cancelled,
    /// Computation completed, result being stored (transient).
    AwaitingResult,
    /// Finished successfully.
    Finished,
    /// Ended due to an error.
    Error,
}

impl AsyncStatus {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished | Self::Error)
    }
}

impl fmt::Display for AsyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::SubsRunning => "SUBS_RUNNING",
            Self::SelfRunning => "SELF_RUNNING",
            Self::Cancelled => "CANCELLED",
            Self::AwaitingResult => "AWAITING_RESULT",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One node in the context tree mirroring an asynchronously resolving
/// request tree.
///
/// Each node carries its own cancellation token, derived from its parent's,
/// so cancelling a node implicitly cancels all of its descendants.
#[derive(Debug)]
pub struct AsyncContextNode {
    id: AsyncId,
    is_req: bool,
    children: Vec<Arc<AsyncContextNode>>,
    status: Mutex<AsyncStatus>,
    error_message: Mutex<Option<String>>,
    cancel: CancellationToken,
    /// Serialized result, stored at the root when resolution finishes.
    result: Mutex<Option<Bytes>>,
}

impl AsyncContextNode {
    /// Builds the context tree for a request tree.
    pub fn build_tree(req: &Request) -> Arc<Self> {
        Self::build(req, CancellationToken::new())
    }

    fn build(req: &Request, cancel: CancellationToken) -> Arc<Self> {
        let children = req
            .subrequests()
            .iter()
            .map(|sub| Self::build(sub, cancel.child_token()))
            .collect();
        Arc::new(Self {
            id: next_async_id(),
            is_req: !matches!(req, Request::Value(_)),
            children,
            status: Mutex::new(AsyncStatus::Created),
            error_message: Mutex::new(None),
            cancel,
            result: Mutex::new(None),
        })
    }

    pub fn id(&self) -> AsyncId {
        self.id
    }

    /// True for function and proxy nodes, false for plain value leaves.
    pub fn is_req(&self) -> bool {
        self.is_req
    }

    pub fn children(&self) -> &[Arc<AsyncContextNode>] {
        &self.children
    }

    /// This node and all its descendants, pre-order.
    pub fn subtree(self: &Arc<Self>) -> Vec<Arc<AsyncContextNode>> {
        let mut nodes = vec![Arc::clone(self)];
        for child in &self.children {
            nodes.extend(child.subtree());
        }
        nodes
    }

    pub fn status(&self) -> AsyncStatus {
        *self.status.lock().expect("status mutex poisoned")
    }

    /// Moves the node to a new status. Final statuses stick; attempts to
    /// leave one are ignored.
    pub fn update_status(&self, new_status: AsyncStatus) {
        let mut status = self.status.lock().expect("status mutex poisoned");
        if status.is_final() {
            return;
        }
        *status = new_status;
    }

    /// Moves the node to `Error`, capturing the message.
    pub fn update_status_error(&self, message: impl Into<String>) {
        {
            let mut msg = self.error_message.lock().expect("message mutex poisoned");
            *msg = Some(message.into());
        }
        self.update_status(AsyncStatus::Error);
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message
            .lock()
            .expect("message mutex poisoned")
            .clone()
    }

    /// Requests cooperative cancellation of this node and its descendants.
    pub fn request_cancellation(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_result(&self, bytes: Bytes) {
        *self.result.lock().expect("result mutex poisoned") = Some(bytes);
    }

    pub fn result(&self) -> Option<Bytes> {
        self.result.lock().expect("result mutex poisoned").clone()
    }
}

/// The context a request tree is resolved against: the shared resources,
/// the cancellation scope, the optional async bookkeeping node and the name
/// of the proxy serving remote dispatch.
#[derive(Clone)]
pub struct Context {
    resources: Arc<Resources>,
    async_node: Option<Arc<AsyncContextNode>>,
    cancel: CancellationToken,
    proxy_name: Option<String>,
}

impl Context {
    pub fn new(resources: Arc<Resources>) -> Self {
        Self {
            resources,
            async_node: None,
            cancel: CancellationToken::new(),
            proxy_name: None,
        }
    }

    /// Routes proxy requests through the named registered proxy.
    pub fn with_proxy_name(mut self, name: impl Into<String>) -> Self {
        self.proxy_name = Some(name.into());
        self
    }

    /// Context for the root of an asynchronous resolution; the root node's
    /// token becomes the cancellation scope.
    pub fn for_async_root(resources: Arc<Resources>, root: Arc<AsyncContextNode>) -> Self {
        let cancel = root.cancellation_token();
        Self {
            resources,
            async_node: Some(root),
            cancel,
            proxy_name: None,
        }
    }

    /// Context for one child of the current async node.
    pub(crate) fn child(&self, node: Arc<AsyncContextNode>) -> Self {
        let cancel = node.cancellation_token();
        Self {
            resources: Arc::clone(&self.resources),
            async_node: Some(node),
            cancel,
            proxy_name: self.proxy_name.clone(),
        }
    }

    /// Same context without async bookkeeping, for detached subtasks.
    pub(crate) fn detached(&self) -> Self {
        Self {
            resources: Arc::clone(&self.resources),
            async_node: None,
            cancel: self.cancel.clone(),
            proxy_name: self.proxy_name.clone(),
        }
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    pub fn async_node(&self) -> Option<&Arc<AsyncContextNode>> {
        self.async_node.as_ref()
    }

    pub fn proxy_name(&self) -> Option<&str> {
        self.proxy_name.as_deref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Checked at every suspension point.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            if let Some(node) = &self.async_node {
                node.update_status(AsyncStatus::Cancelled);
            }
            return Err(Error::AsyncCancelled);
        }
        Ok(())
    }
}
