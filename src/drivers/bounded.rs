// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::core::error::{BrowserError, Result};
use crate::drivers::{BackendDriver, DriverError, PageToken, PagingMode, RawCollection, RawPage, RawRecord};

/// A driver handle whose every call is bounded by a per-call timeout and whose
/// errors are annotated with the operation and target they came from.
#[derive(Clone)]
pub struct BoundedDriver {
    inner: Arc<dyn BackendDriver>,
    timeout: Duration,
}

impl std::fmt::Debug for BoundedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedDriver")
            .field("backend", &self.inner.backend_type())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BoundedDriver {
    pub fn new(inner: Arc<dyn BackendDriver>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn paging_mode(&self) -> PagingMode {
        self.inner.paging_mode()
    }

    pub fn reserved_payload_keys(&self) -> &'static [&'static str] {
        self.inner.reserved_payload_keys()
    }

    async fn call<T, F>(&self, operation: &'static str, target: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DriverError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("{} on '{}' failed: {}", operation, target, e);
                Err(BrowserError::from_driver(operation, target, e))
            }
            Err(_) => {
                warn!("{} on '{}' timed out after {:?}", operation, target, self.timeout);
                Err(BrowserError::BackendTimeout {
                    operation,
                    target: target.to_string(),
                })
            }
        }
    }

    pub async fn heartbeat(&self, instance: &str) -> Result<()> {
        self.call("heartbeat", instance, self.inner.heartbeat()).await
    }

    pub async fn list_collections(&self, instance: &str) -> Result<Vec<String>> {
        self.call("list_collections", instance, self.inner.list_collections())
            .await
    }

    pub async fn collection_meta(&self, collection: &str) -> Result<RawCollection> {
        self.call(
            "collection_meta",
            collection,
            self.inner.collection_meta(collection),
        )
        .await
    }

    pub async fn points_count(&self, collection: &str) -> Result<u64> {
        self.call("points_count", collection, self.inner.points_count(collection))
            .await
    }

    pub async fn fetch_page(
        &self,
        collection: &str,
        token: &PageToken,
        limit: usize,
        include_payload: bool,
        include_vector: bool,
    ) -> Result<RawPage> {
        self.call(
            "fetch_page",
            collection,
            self.inner
                .fetch_page(collection, token, limit, include_payload, include_vector),
        )
        .await
    }

    pub async fn delete_point(&self, collection: &str, id: &str) -> Result<()> {
        self.call("delete_point", collection, self.inner.delete_point(collection, id))
            .await
    }

    pub async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.call(
            "delete_points",
            collection,
            self.inner.delete_points(collection, ids),
        )
        .await
    }

    pub async fn clear_collection(&self, collection: &str) -> Result<u64> {
        self.call(
            "clear_collection",
            collection,
            self.inner.clear_collection(collection),
        )
        .await
    }

    pub async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.call(
            "delete_collection",
            collection,
            self.inner.delete_collection(collection),
        )
        .await
    }

    pub async fn vector_query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RawRecord>> {
        self.call(
            "vector_query",
            collection,
            self.inner
                .vector_query(collection, vector, limit, score_threshold),
        )
        .await
    }
}
