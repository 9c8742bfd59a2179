// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! In-process backend driver.
//!
//! Emulates either paging style so the engines can be exercised without a
//! server, and counts calls so tests can assert what reached the backend.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::types::{BackendType, InstanceDescriptor};
use crate::drivers::{
    BackendDriver, DriverError, DriverFactory, PageToken, PagingMode, RawCollection, RawPage,
    RawRecord,
};

#[derive(Debug, Clone)]
struct MemoryCollection {
    vector_size: Option<u64>,
    distance: String,
    records: Vec<RawRecord>,
}

#[derive(Debug, Default)]
struct CallCounters {
    fetch: AtomicUsize,
    query: AtomicUsize,
    meta: AtomicUsize,
}

#[derive(Debug)]
pub struct MemoryDriver {
    paging: PagingMode,
    collections: RwLock<BTreeMap<String, MemoryCollection>>,
    latency: Option<Duration>,
    fail_fetch_after: Option<usize>,
    calls: CallCounters,
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl MemoryDriver {
    pub fn new(paging: PagingMode) -> Self {
        Self {
            paging,
            collections: RwLock::new(BTreeMap::new()),
            latency: None,
            fail_fetch_after: None,
            calls: CallCounters::default(),
        }
    }

    /// Delays every call, for exercising timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every page fetch after the first `successful` ones fail.
    pub fn fail_fetch_after(mut self, successful: usize) -> Self {
        self.fail_fetch_after = Some(successful);
        self
    }

    pub async fn create_collection(&self, name: &str, vector_size: u64, distance: &str) {
        self.collections.write().await.insert(
            name.to_string(),
            MemoryCollection {
                vector_size: Some(vector_size),
                distance: distance.to_string(),
                records: Vec::new(),
            },
        );
    }

    /// Appends a point, creating the collection on first use.
    pub async fn upsert(
        &self,
        collection: &str,
        id: impl Into<Value>,
        payload: Value,
        vector: Option<Vec<f32>>,
    ) {
        let mut record = RawRecord::new(id, payload);
        record.vector = vector;
        self.insert_raw(collection, record).await;
    }

    pub async fn insert_raw(&self, collection: &str, record: RawRecord) {
        let mut collections = self.collections.write().await;
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| MemoryCollection {
                vector_size: record.vector.as_ref().map(|v| v.len() as u64),
                distance: "Cosine".to_string(),
                records: Vec::new(),
            });
        let key = id_string(&record.id);
        match entry.records.iter_mut().find(|r| id_string(&r.id) == key) {
            Some(existing) => *existing = record,
            None => entry.records.push(record),
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.calls.fetch.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.calls.query.load(Ordering::SeqCst)
    }

    pub fn meta_calls(&self) -> usize {
        self.calls.meta.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn not_found(collection: &str) -> DriverError {
        DriverError::NotFound(format!("collection {}", collection))
    }
}

#[async_trait]
impl BackendDriver for MemoryDriver {
    fn backend_type(&self) -> BackendType {
        match self.paging {
            PagingMode::Cursor => BackendType::Qdrant,
            PagingMode::Offset => BackendType::Chromadb,
        }
    }

    fn paging_mode(&self) -> PagingMode {
        self.paging
    }

    async fn heartbeat(&self) -> Result<(), DriverError> {
        self.pause().await;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, DriverError> {
        self.pause().await;
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn collection_meta(&self, collection: &str) -> Result<RawCollection, DriverError> {
        self.pause().await;
        self.calls.meta.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| Self::not_found(collection))?;

        let (segments_count, status) = match self.paging {
            PagingMode::Cursor => (Some(1), Some("green".to_string())),
            PagingMode::Offset => (None, None),
        };
        Ok(RawCollection {
            name: collection.to_string(),
            vector_size: entry.vector_size,
            distance: Some(entry.distance.clone()),
            points_count: entry.records.len() as u64,
            segments_count,
            status,
        })
    }

    async fn fetch_page(
        &self,
        collection: &str,
        token: &PageToken,
        limit: usize,
        include_payload: bool,
        include_vector: bool,
    ) -> Result<RawPage, DriverError> {
        self.pause().await;
        let call = self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch_after.map_or(false, |max| call >= max) {
            return Err(DriverError::Unavailable("injected fetch failure".to_string()));
        }

        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| Self::not_found(collection))?;
        let len = entry.records.len();

        let start = match (self.paging, token) {
            (_, PageToken::Start) => 0,
            (PagingMode::Offset, PageToken::Offset(offset)) => *offset as usize,
            (PagingMode::Cursor, PageToken::Cursor(cursor)) => entry
                .records
                .iter()
                .position(|r| &r.id == cursor)
                .ok_or_else(|| DriverError::Protocol(format!("unknown cursor {}", cursor)))?,
            (mode, token) => {
                return Err(DriverError::Protocol(format!(
                    "{:?} token used against {:?} paging",
                    token, mode
                )))
            }
        };
        let start = start.min(len);
        let end = start.saturating_add(limit).min(len);

        let records = entry.records[start..end]
            .iter()
            .map(|r| RawRecord {
                id: r.id.clone(),
                payload: if include_payload { r.payload.clone() } else { Value::Null },
                vector: if include_vector { r.vector.clone() } else { None },
                score: None,
            })
            .collect();
        let next = (end < len).then(|| match self.paging {
            PagingMode::Offset => PageToken::Offset(end as u64),
            PagingMode::Cursor => PageToken::Cursor(entry.records[end].id.clone()),
        });

        Ok(RawPage { records, next })
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), DriverError> {
        self.pause().await;
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(collection))?;
        entry.records.retain(|r| !ids.contains(&id_string(&r.id)));
        Ok(())
    }

    async fn clear_collection(&self, collection: &str) -> Result<u64, DriverError> {
        self.pause().await;
        let mut collections = self.collections.write().await;
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(collection))?;
        let removed = entry.records.len() as u64;
        entry.records.clear();
        Ok(removed)
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), DriverError> {
        self.pause().await;
        self.collections
            .write()
            .await
            .remove(collection)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(collection))
    }

    async fn vector_query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RawRecord>, DriverError> {
        self.pause().await;
        self.calls.query.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        let entry = collections
            .get(collection)
            .ok_or_else(|| Self::not_found(collection))?;

        let mut scored: Vec<RawRecord> = entry
            .records
            .iter()
            .filter_map(|r| {
                let score = cosine(vector, r.vector.as_deref()?);
                if score_threshold.map_or(false, |t| score < t) {
                    return None;
                }
                Some(RawRecord {
                    id: r.id.clone(),
                    payload: r.payload.clone(),
                    vector: None,
                    score: Some(score),
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Hands out one shared [`MemoryDriver`] per instance name. Unknown names get
/// an empty driver paging the way the descriptor's backend kind does.
#[derive(Default)]
pub struct MemoryDriverFactory {
    drivers: std::sync::Mutex<HashMap<String, Arc<MemoryDriver>>>,
}

impl MemoryDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(self, name: &str, driver: Arc<MemoryDriver>) -> Self {
        if let Ok(mut drivers) = self.drivers.lock() {
            drivers.insert(name.to_string(), driver);
        }
        self
    }
}

impl DriverFactory for MemoryDriverFactory {
    fn create(&self, descriptor: &InstanceDescriptor) -> Result<Arc<dyn BackendDriver>, DriverError> {
        let mut drivers = self
            .drivers
            .lock()
            .map_err(|_| DriverError::Unavailable("memory driver registry poisoned".to_string()))?;
        let driver = drivers
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                let paging = match descriptor.backend {
                    BackendType::Qdrant => PagingMode::Cursor,
                    BackendType::Chromadb => PagingMode::Offset,
                };
                Arc::new(MemoryDriver::new(paging))
            })
            .clone();
        Ok(driver)
    }
}
