// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! The operations a presentation layer drives.
//!
//! Every call resolves the instance first, then goes through a driver handle
//! bounded by the configured per-call timeout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::core::error::{BrowserError, Result};
use crate::core::normalizer::normalize_collection;
use crate::core::types::{
    ClearOutcome, CollectionInfo, InstanceDescriptor, Page, Point, SearchOutcome,
};
use crate::drivers::{BoundedDriver, HttpDriverFactory};
use crate::export::{export_file_name, export_stream, plan_export, CollectionExport};
use crate::registry::{InstanceRegistry, JsonFileStore};
use crate::search::{similarity_search, Paginator, TextSearch};

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Upper bound on every individual backend call.
    pub backend_timeout: Duration,
    pub instance_file: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(30),
            instance_file: PathBuf::from("instance.config"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Browser {
    registry: Arc<InstanceRegistry>,
    timeout: Duration,
}

impl Browser {
    pub fn new(registry: Arc<InstanceRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Browser over the REST drivers with instances kept in `config.instance_file`.
    pub async fn open(config: &BrowserConfig) -> Result<Self> {
        let registry = InstanceRegistry::open(
            Arc::new(HttpDriverFactory::new(config.backend_timeout)),
            Arc::new(JsonFileStore::new(config.instance_file.clone())),
        )
        .await?;
        Ok(Self::new(Arc::new(registry), config.backend_timeout))
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    async fn driver(&self, instance: &str) -> Result<BoundedDriver> {
        let driver = self.registry.resolve(instance).await?;
        Ok(BoundedDriver::new(driver, self.timeout))
    }

    pub async fn list_instances(&self) -> Vec<InstanceDescriptor> {
        self.registry.list().await
    }

    /// Registers an instance after checking that its backend answers.
    pub async fn add_instance(&self, descriptor: InstanceDescriptor) -> Result<()> {
        if self.registry.descriptor(&descriptor.name).await.is_ok() {
            return Err(BrowserError::DuplicateName(descriptor.name));
        }

        let driver = self.registry.connect(&descriptor)?;
        BoundedDriver::new(Arc::clone(&driver), self.timeout)
            .heartbeat(&descriptor.name)
            .await?;
        info!(
            "connection test passed for '{}' ({} at {})",
            descriptor.name, descriptor.backend, descriptor.url
        );

        self.registry.insert(descriptor, driver).await
    }

    pub async fn remove_instance(&self, name: &str) -> Result<bool> {
        self.registry.unregister(name).await
    }

    pub async fn list_collections(&self, instance: &str) -> Result<Vec<CollectionInfo>> {
        let driver = self.driver(instance).await?;
        let names = driver.list_collections(instance).await?;

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            collections.push(normalize_collection(driver.collection_meta(&name).await?));
        }
        Ok(collections)
    }

    pub async fn collection_info(&self, instance: &str, collection: &str) -> Result<CollectionInfo> {
        let driver = self.driver(instance).await?;
        Ok(normalize_collection(driver.collection_meta(collection).await?))
    }

    pub async fn fetch_points(
        &self,
        instance: &str,
        collection: &str,
        offset: u64,
        limit: usize,
        include_payload: bool,
        include_vector: bool,
    ) -> Result<Page<Point>> {
        let driver = self.driver(instance).await?;
        let mut paginator = Paginator::new(driver, collection);
        let fetched = paginator
            .fetch_page(offset, limit, include_payload, include_vector)
            .await?;
        Ok(fetched.page)
    }

    /// Substring search over payloads. See [`TextSearch`] for how the early
    /// stop at `max_results` affects the reported counters.
    pub async fn text_search(
        &self,
        instance: &str,
        collection: &str,
        needle: &str,
        case_sensitive: bool,
        max_results: usize,
    ) -> Result<SearchOutcome> {
        let search = TextSearch::new(needle, case_sensitive, max_results)?;
        let driver = self.driver(instance).await?;
        search.run(driver, collection).await
    }

    pub async fn vector_search(
        &self,
        instance: &str,
        collection: &str,
        query: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<Point>> {
        let driver = self.driver(instance).await?;
        similarity_search(&driver, collection, query, limit, score_threshold).await
    }

    pub async fn delete_point(&self, instance: &str, collection: &str, id: &str) -> Result<()> {
        let driver = self.driver(instance).await?;
        driver.delete_point(collection, id).await?;
        info!("deleted point '{}' from '{}/{}'", id, instance, collection);
        Ok(())
    }

    pub async fn clear_collection(&self, instance: &str, collection: &str) -> Result<ClearOutcome> {
        let driver = self.driver(instance).await?;
        let deleted = driver.clear_collection(collection).await?;
        info!("cleared {} points from '{}/{}'", deleted, instance, collection);
        Ok(ClearOutcome { deleted })
    }

    pub async fn delete_collection(&self, instance: &str, collection: &str) -> Result<()> {
        let driver = self.driver(instance).await?;
        driver.delete_collection(collection).await?;
        info!("deleted collection '{}/{}'", instance, collection);
        Ok(())
    }

    /// Runs the header pass, then hands back the lazily fetched row stream.
    pub async fn export(
        &self,
        instance: &str,
        collection: &str,
        include_vectors: bool,
    ) -> Result<CollectionExport> {
        let driver = self.driver(instance).await?;
        let plan = plan_export(&driver, collection, include_vectors).await?;
        info!(
            "exporting '{}/{}' ({} records, {} payload columns)",
            instance,
            collection,
            plan.scanned,
            plan.payload_keys.len()
        );
        Ok(CollectionExport {
            file_name: export_file_name(collection, Utc::now()),
            stream: export_stream(driver, plan),
        })
    }
}
