// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    cfg::config::ServiceConfig,
    context::{AsyncId, AsyncStatus},
    core::{errors::Result, value::Value},
    encodings::msgpack::{BlobFilePolicy, unpack_value},
};

/// A resolution result as it crosses a process boundary: msgpack bytes plus
/// an optional server-side cache-record id pinning the result on the peer.
#[derive(Debug, Clone)]
pub struct SerializedResult {
    bytes: Bytes,
    record_id: Option<u64>,
}

impl SerializedResult {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            record_id: None,
        }
    }

    pub fn with_record_id(mut self, record_id: u64) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Id of the cache-record lock held on the resolving side, if any.
    pub fn record_id(&self) -> Option<u64> {
        self.record_id
    }

    /// Decodes the carried value. Results always use the inline blob codec:
    /// blob-file paths are meaningless across processes.
    pub fn value(&self) -> Result<Value> {
        unpack_value(&self.bytes, BlobFilePolicy::Inline)
    }
}

/// Minimal descriptor of a child node in a peer's async context tree:
/// `(id, is_req)`, where `is_req` is false for plain value leaves.
pub type RemoteContextSpec = (AsyncId, bool);

/// A peer capable of resolving serialized requests, synchronously and
/// asynchronously. All calls surface failures as errors; communication
/// failures are `Error::Remote`.
#[async_trait]
pub trait RemoteProxy: Send + Sync {
    /// The name this proxy is registered under.
    fn name(&self) -> &str;

    /// Resolves a request synchronously.
    async fn resolve_sync(&self, config: ServiceConfig, seri_req: String)
    -> Result<SerializedResult>;

    /// Submits a request for asynchronous resolution, returning the id of
    /// the peer's root context node.
    async fn submit_async(&self, config: ServiceConfig, seri_req: String) -> Result<AsyncId>;

    /// The children of the context subtree rooted at `aid`.
    async fn get_sub_contexts(&self, aid: AsyncId) -> Result<Vec<RemoteContextSpec>>;

    async fn get_async_status(&self, aid: AsyncId) -> Result<AsyncStatus>;

    /// The error message for a node; meaningful only when its status is
    /// `Error`.
    async fn get_async_error_message(&self, aid: AsyncId) -> Result<String>;

    /// The resolved value; the root's status must be `Finished`.
    async fn get_async_response(&self, root_aid: AsyncId) -> Result<SerializedResult>;

    /// Requests cooperative cancellation of the subtree rooted at `aid`.
    async fn request_cancellation(&self, aid: AsyncId) -> Result<()>;

    /// Releases the peer's bookkeeping for a finished resolution. Should be
    /// called even when the resolution failed.
    async fn finish_async(&self, root_aid: AsyncId) -> Result<()>;
}
