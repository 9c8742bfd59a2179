// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Backend drivers.
//!
//! Every vector database kind is reached through [`BackendDriver`], a thin
//! capability interface over the raw primitives the engines need. Engines
//! never look at the backend kind: they only see the paging mode and the
//! records a driver hands back.

pub mod bounded;
pub mod chroma;
pub mod factory;
pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::types::BackendType;

pub use bounded::BoundedDriver;
pub use chroma::ChromaDriver;
pub use factory::{DriverFactory, HttpDriverFactory};
pub use memory::{MemoryDriver, MemoryDriverFactory};
pub use qdrant::QdrantDriver;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Network error: {0}")]
    Unavailable(String),

    #[error("Timeout")]
    Timeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DriverError::Timeout
        } else if err.is_decode() {
            DriverError::Protocol(err.to_string())
        } else {
            DriverError::Unavailable(err.to_string())
        }
    }
}

/// How a backend addresses pages natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
    /// Numeric offset/limit; any offset is one round trip away.
    Offset,
    /// Opaque continuation tokens; offsets have to be walked to.
    Cursor,
}

/// Position of a page inside a collection, in the driver's own terms.
#[derive(Debug, Clone, PartialEq)]
pub enum PageToken {
    Start,
    Offset(u64),
    Cursor(Value),
}

/// Collection metadata exactly as the backend reported it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCollection {
    pub name: String,
    pub vector_size: Option<u64>,
    pub distance: Option<String>,
    pub points_count: u64,
    pub segments_count: Option<u64>,
    pub status: Option<String>,
}

/// One record as the backend returned it. Nothing here is validated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: Value,
    pub payload: Value,
    pub vector: Option<Vec<f32>>,
    pub score: Option<f32>,
}

impl RawRecord {
    pub fn new(id: impl Into<Value>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
            vector: None,
            score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub records: Vec<RawRecord>,
    /// Token for the page that follows, `None` once the backend has no more.
    pub next: Option<PageToken>,
}

#[async_trait]
pub trait BackendDriver: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn paging_mode(&self) -> PagingMode;

    /// Payload keys the backend injects for its own bookkeeping.
    fn reserved_payload_keys(&self) -> &'static [&'static str] {
        &[]
    }

    /// Cheap connectivity check used before an instance is registered.
    async fn heartbeat(&self) -> Result<(), DriverError>;

    async fn list_collections(&self) -> Result<Vec<String>, DriverError>;

    async fn collection_meta(&self, collection: &str) -> Result<RawCollection, DriverError>;

    /// Current point count. Backends whose full description costs extra round
    /// trips override this with a cheaper path.
    async fn points_count(&self, collection: &str) -> Result<u64, DriverError> {
        self.collection_meta(collection).await.map(|meta| meta.points_count)
    }

    async fn fetch_page(
        &self,
        collection: &str,
        token: &PageToken,
        limit: usize,
        include_payload: bool,
        include_vector: bool,
    ) -> Result<RawPage, DriverError>;

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), DriverError>;

    async fn delete_point(&self, collection: &str, id: &str) -> Result<(), DriverError> {
        self.delete_points(collection, &[id.to_string()]).await
    }

    /// Removes every point and returns how many were removed.
    async fn clear_collection(&self, collection: &str) -> Result<u64, DriverError>;

    async fn delete_collection(&self, collection: &str) -> Result<(), DriverError>;

    /// Native similarity query. Records come back best first with `score` set.
    async fn vector_query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RawRecord>, DriverError>;
}

/// Decodes a vector field that is either a plain array or a map of named vectors.
/// For named vectors the first one in key order is taken.
pub(crate) fn decode_vector(value: &Value) -> Option<Vec<f32>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect(),
        Value::Object(named) => {
            let mut keys: Vec<&String> = named.keys().collect();
            keys.sort();
            keys.first().and_then(|k| decode_vector(&named[k.as_str()]))
        }
        _ => None,
    }
}
