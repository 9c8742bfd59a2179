// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::core::types::{BackendType, InstanceDescriptor};
use crate::drivers::{
    decode_vector, BackendDriver, DriverError, PageToken, PagingMode, RawCollection, RawPage,
    RawRecord,
};

/// REST driver for Qdrant. Scrolling is cursor based: each page hands back
/// the id of the first point of the next page.
#[derive(Debug, Clone)]
pub struct QdrantDriver {
    base_url: Url,
    api_key: Option<String>,
    http_client: Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionsResult {
    collections: Vec<CollectionName>,
}

#[derive(Debug, Deserialize)]
struct CollectionName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    segments_count: Option<u64>,
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    #[serde(default)]
    vectors: Option<VectorsConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VectorsConfig {
    Single(VectorParams),
    Named(BTreeMap<String, VectorParams>),
}

impl VectorsConfig {
    fn primary(&self) -> Option<&VectorParams> {
        match self {
            VectorsConfig::Single(params) => Some(params),
            VectorsConfig::Named(named) => named.values().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: u64,
    distance: String,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<WirePoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WirePoint {
    id: Value,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    vector: Option<Value>,
    #[serde(default)]
    score: Option<f32>,
}

impl WirePoint {
    fn into_raw(self) -> RawRecord {
        RawRecord {
            id: self.id,
            payload: self.payload.unwrap_or(Value::Null),
            vector: self.vector.as_ref().and_then(decode_vector),
            score: self.score,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

/// Qdrant ids are unsigned integers or UUID strings.
fn wire_id(id: &str) -> Value {
    id.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(id.to_string()))
}

impl QdrantDriver {
    pub fn new(descriptor: &InstanceDescriptor, timeout: Duration) -> Result<Self, DriverError> {
        let base_url = Url::parse(descriptor.base_url())
            .map_err(|e| DriverError::Protocol(format!("invalid URL '{}': {}", descriptor.url, e)))?;
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            api_key: descriptor.api_key.clone(),
            http_client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DriverError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| DriverError::Protocol(format!("not a base URL: {}", self.base_url)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http_client.request(method, url);
        match &self.api_key {
            Some(api_key) => request.header("api-key", api_key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, DriverError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(DriverError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DriverError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| DriverError::Protocol(format!("{}: {}", what, e)))?;
        Ok(envelope.result)
    }

    async fn count(&self, collection: &str) -> Result<u64, DriverError> {
        let url = self.endpoint(&["collections", collection, "points", "count"])?;
        let result: CountResult = self
            .send(
                self.request(Method::POST, url).json(&json!({ "exact": true })),
                &format!("collection {}", collection),
            )
            .await?;
        Ok(result.count)
    }
}

#[async_trait]
impl BackendDriver for QdrantDriver {
    fn backend_type(&self) -> BackendType {
        BackendType::Qdrant
    }

    fn paging_mode(&self) -> PagingMode {
        PagingMode::Cursor
    }

    async fn heartbeat(&self) -> Result<(), DriverError> {
        self.list_collections().await.map(|_| ())
    }

    async fn list_collections(&self) -> Result<Vec<String>, DriverError> {
        let url = self.endpoint(&["collections"])?;
        let result: CollectionsResult = self
            .send(self.request(Method::GET, url), "collections")
            .await?;
        Ok(result.collections.into_iter().map(|c| c.name).collect())
    }

    async fn collection_meta(&self, collection: &str) -> Result<RawCollection, DriverError> {
        let url = self.endpoint(&["collections", collection])?;
        let description: CollectionDescription = self
            .send(
                self.request(Method::GET, url),
                &format!("collection {}", collection),
            )
            .await?;

        let points_count = match description.points_count {
            Some(count) => count,
            None => self.count(collection).await?,
        };
        let params = description.config.params.vectors.as_ref().and_then(|v| v.primary());

        Ok(RawCollection {
            name: collection.to_string(),
            vector_size: params.map(|p| p.size),
            distance: params.map(|p| p.distance.clone()),
            points_count,
            segments_count: description.segments_count,
            status: description.status,
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
        let mut body = json!({
            "limit": limit,
            "with_payload": include_payload,
            "with_vector": include_vector,
        });
        match token {
            PageToken::Start => {}
            PageToken::Cursor(cursor) => body["offset"] = cursor.clone(),
            PageToken::Offset(offset) => {
                return Err(DriverError::Protocol(format!(
                    "qdrant scroll cannot start at numeric offset {}",
                    offset
                )))
            }
        }

        let url = self.endpoint(&["collections", collection, "points", "scroll"])?;
        let result: ScrollResult = self
            .send(
                self.request(Method::POST, url).json(&body),
                &format!("collection {}", collection),
            )
            .await?;

        debug!(
            "scrolled {} points from {} (more: {})",
            result.points.len(),
            collection,
            result.next_page_offset.is_some()
        );

        Ok(RawPage {
            records: result.points.into_iter().map(WirePoint::into_raw).collect(),
            next: result
                .next_page_offset
                .filter(|cursor| !cursor.is_null())
                .map(PageToken::Cursor),
        })
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), DriverError> {
        let url = self.endpoint(&["collections", collection, "points", "delete"])?;
        let points: Vec<Value> = ids.iter().map(|id| wire_id(id)).collect();
        let _: Value = self
            .send(
                self.request(Method::POST, url)
                    .query(&[("wait", "true")])
                    .json(&json!({ "points": points })),
                &format!("collection {}", collection),
            )
            .await?;
        Ok(())
    }

    async fn clear_collection(&self, collection: &str) -> Result<u64, DriverError> {
        let count = self.count(collection).await?;
        let url = self.endpoint(&["collections", collection, "points", "delete"])?;
        let _: Value = self
            .send(
                self.request(Method::POST, url)
                    .query(&[("wait", "true")])
                    .json(&json!({ "filter": { "must": [] } })),
                &format!("collection {}", collection),
            )
            .await?;
        Ok(count)
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), DriverError> {
        let url = self.endpoint(&["collections", collection])?;
        let _: Value = self
            .send(
                self.request(Method::DELETE, url),
                &format!("collection {}", collection),
            )
            .await?;
        Ok(())
    }

    async fn vector_query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RawRecord>, DriverError> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }

        let url = self.endpoint(&["collections", collection, "points", "search"])?;
        let points: Vec<WirePoint> = self
            .send(
                self.request(Method::POST, url).json(&body),
                &format!("collection {}", collection),
            )
            .await?;
        Ok(points.into_iter().map(WirePoint::into_raw).collect())
    }
}
