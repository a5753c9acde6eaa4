// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{
    caching::secondary::{SecondaryStorage, SecondaryStorageFactory},
    cfg::config::{ServiceConfig, config_keys},
    core::{
        blob::Blob,
        errors::{Error, Result},
    },
};

const DEFAULT_URL: &str = "http://localhost:9090";

/// Secondary storage backed by a (typically localhost) CAS server speaking
/// plain HTTP: `GET /<key>` reads, `PUT /<key>` writes.
pub struct HttpStorage {
    base_url: String,
    client: reqwest::Client,
    /// Bounds concurrent in-flight requests; shared with the rest of the
    /// process's HTTP traffic.
    semaphore: Arc<Semaphore>,
}

impl HttpStorage {
    pub const FACTORY_NAME: &'static str = "http";

    pub fn new(base_url: impl Into<String>, semaphore: Arc<Semaphore>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            semaphore,
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url.trim_end_matches('/'))
    }
}

fn http_error(e: &reqwest::Error) -> Error {
    Error::HttpRequestFailure(e.to_string())
}

#[async_trait]
impl SecondaryStorage for HttpStorage {
    fn name(&self) -> &str {
        Self::FACTORY_NAME
    }

    async fn read(&self, key: String) -> Result<Option<Blob>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::HttpRequestFailure("HTTP pool closed".into()))?;
        let url = self.url_for(&key);
        debug!("GET {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| http_error(&e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await.map_err(|e| http_error(&e))?;
                Ok(Some(Blob::from_bytes(body)))
            }
            status => Err(Error::BadHttpStatusCode(status.as_u16())),
        }
    }

    async fn write(&self, key: String, value: Blob) -> Result<()> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::HttpRequestFailure("HTTP pool closed".into()))?;
        let url = self.url_for(&key);
        debug!("PUT {url} ({} bytes)", value.size());
        let response = self
            .client
            .put(&url)
            .body(value.as_slice().to_vec())
            .send()
            .await
            .map_err(|e| http_error(&e))?;
        if !response.status().is_success() {
            return Err(Error::BadHttpStatusCode(response.status().as_u16()));
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Err(Error::NotImplemented("HttpStorage::clear"))
    }

    fn allow_blob_files(&self) -> bool {
        false
    }
}

pub struct HttpStorageFactory {
    semaphore: Arc<Semaphore>,
}

impl HttpStorageFactory {
    pub fn new(semaphore: Arc<Semaphore>) -> Self {
        Self { semaphore }
    }
}

impl SecondaryStorageFactory for HttpStorageFactory {
    fn create(&self, config: &ServiceConfig) -> Result<Arc<dyn SecondaryStorage>> {
        let url = config.get_string_or_default(config_keys::HTTP_CACHE_URL, DEFAULT_URL)?;
        Ok(Arc::new(HttpStorage::new(url, Arc::clone(&self.semaphore))))
    }
}
