// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    context::{AsyncContextNode, AsyncId},
    core::errors::{Error, Result},
};

/// Database of async context nodes, keyed by id.
///
/// RPC clients name in-flight resolutions by async id; the serving side
/// keeps one of these so handlers can find the corresponding context tree.
#[derive(Debug, Default)]
pub struct AsyncDb {
    entries: DashMap<AsyncId, Arc<AsyncContextNode>>,
}

impl AsyncDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context tree: the root and every descendant become
    /// findable by their ids.
    pub fn add(&self, root: &Arc<AsyncContextNode>) {
        for node in root.subtree() {
            self.entries.insert(node.id(), node);
        }
    }

    /// Finds a node. The returned handle stays valid across a concurrent
    /// `remove_tree`.
    pub fn find(&self, aid: AsyncId) -> Result<Arc<AsyncContextNode>> {
        self.entries
            .get(&aid)
            .map(|e| Arc::clone(e.value()))
            .ok_or(Error::BadAsyncId(aid))
    }

    /// Drops the bookkeeping for the tree rooted at `root_id`. Called on the
    /// client's initiative once a resolution is finished with.
    pub fn remove_tree(&self, root_id: AsyncId) -> Result<()> {
        let root = self.find(root_id)?;
        for node in root.subtree() {
            self.entries.remove(&node.id());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
