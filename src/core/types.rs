// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Payload attached to a point. Key order is the order the backend returned.
pub type Payload = Map<String, Value>;

/// The two supported vector database kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Cursor-paged backend reporting segments and status.
    #[default]
    Qdrant,
    /// Offset-paged backend without segment or status metadata.
    #[serde(alias = "chroma")]
    Chromadb,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Qdrant => "qdrant",
            BackendType::Chromadb => "chromadb",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qdrant" => Ok(BackendType::Qdrant),
            "chromadb" | "chroma" => Ok(BackendType::Chromadb),
            other => Err(format!("Unsupported database type: {}", other)),
        }
    }
}

/// Connection descriptor for one configured instance. `name` is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(rename = "type", default)]
    pub backend: BackendType,
}

impl InstanceDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, backend: BackendType) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: None,
            backend,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Canonical distance metric. Backend tokens that are not recognised map to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    Dot,
    Manhattan,
    Unknown,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Dot => "dot",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only projection of a collection, recomputed on every listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    /// Vector dimensionality; `0` when the backend cannot report it.
    pub vector_size: u64,
    pub distance: DistanceMetric,
    pub points_count: u64,
    pub segments_count: u64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Point {
    pub fn new(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
            vector: None,
            score: None,
        }
    }
}

/// A bounded slice of a collection.
///
/// `total` is the backend's count at fetch time and is advisory: it can move
/// between two calls while the collection is being written to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: usize,
    pub offset: u64,
}

/// Result of a substring search.
///
/// The scan stops as soon as `results` reaches the requested maximum, so both
/// counters describe what was scanned up to that point, not the whole
/// collection. `total_matches` is therefore a lower bound on the global match
/// count whenever the result list is full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<Point>,
    pub total_matches: u64,
    pub total_scanned: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearOutcome {
    pub deleted: u64,
}
