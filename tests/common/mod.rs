// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vector_browser::core::types::{BackendType, InstanceDescriptor};
use vector_browser::drivers::{
    BackendDriver, BoundedDriver, MemoryDriver, MemoryDriverFactory, PagingMode,
};
use vector_browser::registry::{InstanceRegistry, MemoryStore};
use vector_browser::Browser;

pub const PAGING_MODES: [PagingMode; 2] = [PagingMode::Offset, PagingMode::Cursor];

/// The three-point `docs` collection used across the scenarios.
pub async fn docs_driver(paging: PagingMode) -> Arc<MemoryDriver> {
    let driver = Arc::new(MemoryDriver::new(paging));
    driver.create_collection("docs", 3, "Cosine").await;
    driver
        .upsert("docs", 1, json!({"title": "Apple pie"}), Some(vec![1.0, 0.0, 0.0]))
        .await;
    driver
        .upsert("docs", 2, json!({"title": "apple tart"}), Some(vec![0.0, 1.0, 0.0]))
        .await;
    driver
        .upsert("docs", 3, json!({"title": "Banana"}), Some(vec![0.7, 0.7, 0.0]))
        .await;
    driver
}

/// A collection of `n` points with payload `{"n": i, "label": "item-i"}`.
pub async fn numbered_driver(paging: PagingMode, collection: &str, n: usize) -> Arc<MemoryDriver> {
    let driver = Arc::new(MemoryDriver::new(paging));
    driver.create_collection(collection, 2, "Cosine").await;
    for i in 0..n {
        driver
            .upsert(
                collection,
                i as u64,
                json!({"n": i, "label": format!("item-{}", i)}),
                Some(vec![i as f32, 1.0]),
            )
            .await;
    }
    driver
}

pub fn bounded(driver: Arc<MemoryDriver>) -> BoundedDriver {
    BoundedDriver::new(driver, Duration::from_secs(5))
}

pub fn backend_for(paging: PagingMode) -> BackendType {
    match paging {
        PagingMode::Cursor => BackendType::Qdrant,
        PagingMode::Offset => BackendType::Chromadb,
    }
}

/// A browser with one instance named `name` served by `driver`.
pub async fn browser_with(name: &str, driver: Arc<MemoryDriver>) -> Browser {
    let backend = backend_for(driver.paging_mode());
    let factory = MemoryDriverFactory::new().with_driver(name, driver);
    let registry = InstanceRegistry::new(Arc::new(factory), Arc::new(MemoryStore::new()));
    registry
        .register(InstanceDescriptor::new(name, "http://localhost:6333", backend))
        .await
        .unwrap();
    Browser::new(Arc::new(registry), Duration::from_secs(5))
}
