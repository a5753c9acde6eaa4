// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{
    core::errors::{Error, Result},
    requests::request::Request,
    resolve::seri_registry::{CatalogId, RegistryEntry, SeriRegistry},
};

/// A catalog of request classes an application can serve deserialized.
///
/// Registration is driven by sample requests: for every class to serve, the
/// application builds one instance with placeholder arguments and passes it
/// to [`SeriCatalog::register_resolver`]. The uuid and function binding are
/// extracted from the sample and installed into the shared registry.
/// Dropping the catalog unregisters everything it added.
pub struct SeriCatalog {
    registry: Arc<SeriRegistry>,
    catalog_id: CatalogId,
    uuids: Mutex<Vec<String>>,
}

impl SeriCatalog {
    pub fn new(registry: Arc<SeriRegistry>) -> Self {
        let catalog_id = registry.alloc_catalog_id();
        Self {
            registry,
            catalog_id,
            uuids: Mutex::new(Vec::new()),
        }
    }

    pub fn catalog_id(&self) -> CatalogId {
        self.catalog_id
    }

    /// Registers the resolver for the sample's request class. Serialized
    /// requests with the sample's uuid but different arguments resolve
    /// through this registration.
    pub fn register_resolver(&self, sample: &Request) -> Result<()> {
        let Request::Function(f) = sample else {
            return Err(Error::Uuid(
                "only function requests can serve deserialized resolution".into(),
            ));
        };
        if f.uuid.is_empty() {
            return Err(Error::Uuid(
                "sample request with an empty uuid cannot be registered".into(),
            ));
        }
        let uuid_str = f.uuid.as_str();
        debug!("catalog {}: registering {uuid_str}", self.catalog_id);
        self.registry.add(
            uuid_str,
            RegistryEntry {
                catalog_id: self.catalog_id,
                function: Arc::clone(&f.function),
                kind: f.kind,
                retrier: f.retrier.clone(),
            },
        )?;
        self.uuids
            .lock()
            .expect("catalog mutex poisoned")
            .push(uuid_str.to_owned());
        Ok(())
    }

    /// All uuids registered through this catalog.
    pub fn get_all_uuid_strs(&self) -> Vec<String> {
        self.uuids.lock().expect("catalog mutex poisoned").clone()
    }
}

impl Drop for SeriCatalog {
    fn drop(&mut self) {
        self.registry.unregister_catalog(self.catalog_id);
    }
}
