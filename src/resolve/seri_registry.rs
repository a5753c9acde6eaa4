// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::{
    core::errors::{Error, Result},
    requests::{
        CachingLevel,
        function::{CalcFunction, FunctionKind},
        request::{Request, function_from_parts},
        retry::Retrier,
        uuid::RequestUuid,
    },
};

/// Identifies the catalog a registration came from, so that a whole catalog
/// can be unregistered at once.
pub type CatalogId = u64;

/// One registration: everything needed to rebuild and resolve a
/// deserialized request of this class.
#[derive(Clone)]
pub struct RegistryEntry {
    pub catalog_id: CatalogId,
    pub function: Arc<dyn CalcFunction>,
    pub kind: FunctionKind,
    pub retrier: Option<Arc<dyn Retrier>>,
}

impl RegistryEntry {
    // The identity of a registration is its function binding; two entries
    // with the same binding are interchangeable.
    fn same_binding(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.function, &other.function) && self.kind == other.kind
    }
}

/// Registry mapping uuid strings to the entries that can rebuild requests
/// of that class from their serialized form.
///
/// Registering the same uuid twice with the same function binding is
/// idempotent. Conflicting bindings are reported as [`Error::UuidCollision`];
/// the newest entry is still installed at the front so lookups prefer it.
/// All functions are thread-safe.
#[derive(Default)]
pub struct SeriRegistry {
    entries: DashMap<String, Vec<RegistryEntry>>,
    next_catalog_id: AtomicU64,
}

impl SeriRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_catalog_id(&self) -> CatalogId {
        self.next_catalog_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add(&self, uuid_str: &str, entry: RegistryEntry) -> Result<()> {
        debug!("registering uuid {uuid_str}, catalog {}", entry.catalog_id);
        let mut list = self.entries.entry(uuid_str.to_owned()).or_default();
        if let Some(existing) = list.iter().find(|e| e.catalog_id == entry.catalog_id) {
            if existing.same_binding(&entry) {
                debug!("duplicate registration for uuid {uuid_str}; ignored");
                return Ok(());
            }
            error!("conflicting registration for uuid {uuid_str}");
            list.insert(0, entry);
            return Err(Error::UuidCollision(uuid_str.to_owned()));
        }
        if let Some(existing) = list.first()
            && !existing.same_binding(&entry)
        {
            error!(
                "uuid {uuid_str} already bound by catalog {}",
                existing.catalog_id
            );
            list.insert(0, entry);
            return Err(Error::UuidCollision(uuid_str.to_owned()));
        }
        list.insert(0, entry);
        Ok(())
    }

    /// Removes every entry belonging to a catalog; called when the catalog
    /// is dropped.
    pub fn unregister_catalog(&self, catalog_id: CatalogId) {
        info!("unregistering catalog {catalog_id}");
        self.entries
            .retain(|uuid_str, list: &mut Vec<RegistryEntry>| {
                list.retain(|e| e.catalog_id != catalog_id);
                if list.is_empty() {
                    debug!("removing last entry for uuid {uuid_str}");
                    false
                } else {
                    true
                }
            });
    }

    pub fn find(&self, uuid_str: &str) -> Result<RegistryEntry> {
        self.entries
            .get(uuid_str)
            .and_then(|list| list.first().cloned())
            .ok_or_else(|| Error::UnregisteredUuid(uuid_str.to_owned()))
    }

    pub fn contains(&self, uuid_str: &str) -> bool {
        self.entries.get(uuid_str).is_some_and(|l| !l.is_empty())
    }

    pub fn size(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    /// Rebuilds a function request of the class registered under
    /// `uuid_str`, with freshly decoded arguments.
    pub fn create_request(
        &self,
        uuid_str: &str,
        title: Option<String>,
        args: Vec<Request>,
    ) -> Result<Request> {
        let entry = self.find(uuid_str)?;
        let level = CachingLevel::from_uuid_str(uuid_str)?;
        let uuid = RequestUuid::from_complete(uuid_str.to_owned());
        Ok(function_from_parts(
            uuid,
            level,
            title,
            entry.function,
            entry.kind,
            entry.retrier,
            args,
        ))
    }
}
