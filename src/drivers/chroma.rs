// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

use crate::core::types::{BackendType, InstanceDescriptor};
use crate::drivers::{
    decode_vector, BackendDriver, DriverError, PageToken, PagingMode, RawCollection, RawPage,
    RawRecord,
};

/// Payload key the stored document text is folded into.
pub const DOCUMENT_KEY: &str = "document";

const DEFAULT_TENANT: &str = "default_tenant";
const DEFAULT_DATABASE: &str = "default_database";
const CLEAR_BATCH: usize = 1000;

/// Which REST generation the server speaks. Probed once per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiGeneration {
    V1,
    V2,
}

/// REST driver for Chroma. Pages are addressed by numeric offset; the server
/// has no segment or status concept.
#[derive(Debug)]
pub struct ChromaDriver {
    base_url: Url,
    api_key: Option<String>,
    tenant: String,
    database: String,
    http_client: Client,
    api: OnceCell<ApiGeneration>,
    /// Collection name to server-side id, filled by every describe.
    ids: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct WireCollection {
    id: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    dimension: Option<u64>,
    #[serde(default)]
    configuration_json: Option<Value>,
}

impl WireCollection {
    /// Distance space token; Chroma falls back to squared L2 when none is configured.
    fn space(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("hnsw:space"))
            .and_then(Value::as_str)
            .or_else(|| {
                self.configuration_json
                    .as_ref()
                    .and_then(|c| c.pointer("/hnsw/space").or_else(|| c.pointer("/hnsw_configuration/space")))
                    .and_then(Value::as_str)
            })
            .unwrap_or("l2")
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct GetResult {
    ids: Vec<Value>,
    #[serde(default)]
    metadatas: Option<Vec<Value>>,
    #[serde(default)]
    documents: Option<Vec<Value>>,
    #[serde(default)]
    embeddings: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    ids: Vec<Vec<Value>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Value>>>,
}

fn column<'a>(values: &'a Option<Vec<Value>>, index: usize) -> Option<&'a Value> {
    values.as_ref().and_then(|v| v.get(index))
}

/// Builds a record payload from the metadata column, with the document text
/// folded in. Non-object metadata is left as is for the normalizer to reject.
fn assemble(id: Value, metadata: Option<&Value>, document: Option<&Value>, embedding: Option<&Value>) -> RawRecord {
    let document = document.filter(|d| !d.is_null());
    let payload = match (metadata.cloned().unwrap_or(Value::Null), document) {
        (Value::Null, Some(doc)) => {
            let mut fields = Map::new();
            fields.insert(DOCUMENT_KEY.to_string(), doc.clone());
            Value::Object(fields)
        }
        (Value::Object(mut fields), Some(doc)) => {
            fields.insert(DOCUMENT_KEY.to_string(), doc.clone());
            Value::Object(fields)
        }
        (other, _) => other,
    };

    RawRecord {
        id,
        payload,
        vector: embedding.and_then(decode_vector),
        score: None,
    }
}

impl ChromaDriver {
    pub fn new(descriptor: &InstanceDescriptor, timeout: Duration) -> Result<Self, DriverError> {
        let base_url = Url::parse(descriptor.base_url())
            .map_err(|e| DriverError::Protocol(format!("invalid URL '{}': {}", descriptor.url, e)))?;
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            api_key: descriptor.api_key.clone(),
            tenant: DEFAULT_TENANT.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            http_client,
            api: OnceCell::new(),
            ids: RwLock::new(HashMap::new()),
        })
    }

    /// The probed API generation, if the probe already ran on this handle.
    pub fn probed_generation(&self) -> Option<ApiGeneration> {
        self.api.get().copied()
    }

    fn endpoint<I, S>(&self, segments: I) -> Result<Url, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
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
            Some(api_key) => request.header("Authorization", format!("Bearer {}", api_key)),
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
            // Older servers answer a missing collection with a 4xx/5xx and a message.
            if message.contains("does not exist") {
                return Err(DriverError::NotFound(what.to_string()));
            }
            return Err(DriverError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| DriverError::Protocol(format!("{}: {}", what, e)))
    }

    async fn probe(&self) -> Result<ApiGeneration, DriverError> {
        for (generation, version) in [(ApiGeneration::V2, "v2"), (ApiGeneration::V1, "v1")] {
            let url = self.endpoint(["api", version, "heartbeat"])?;
            let response = self.request(Method::GET, url).send().await?;
            let status = response.status();
            if status.is_success() {
                info!("Chroma server at {} speaks API {}", self.base_url, version);
                return Ok(generation);
            }
            if status != StatusCode::NOT_FOUND {
                return Err(DriverError::Rejected {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default(),
                });
            }
        }
        Err(DriverError::Protocol(format!(
            "no supported Chroma API at {}",
            self.base_url
        )))
    }

    async fn generation(&self) -> Result<ApiGeneration, DriverError> {
        self.api.get_or_try_init(|| self.probe()).await.copied()
    }

    async fn collections_url(&self, tail: &[&str]) -> Result<Url, DriverError> {
        let mut segments: Vec<&str> = match self.generation().await? {
            ApiGeneration::V1 => vec!["api", "v1", "collections"],
            ApiGeneration::V2 => vec![
                "api",
                "v2",
                "tenants",
                self.tenant.as_str(),
                "databases",
                self.database.as_str(),
                "collections",
            ],
        };
        segments.extend_from_slice(tail);
        self.endpoint(segments)
    }

    async fn describe(&self, collection: &str) -> Result<WireCollection, DriverError> {
        let url = self.collections_url(&[collection]).await?;
        let described: WireCollection = self
            .send(
                self.request(Method::GET, url),
                &format!("collection {}", collection),
            )
            .await?;
        self.ids
            .write()
            .await
            .insert(collection.to_string(), described.id.clone());
        Ok(described)
    }

    /// Server-side id of `collection`, described on first use.
    async fn collection_id(&self, collection: &str) -> Result<String, DriverError> {
        if let Some(id) = self.ids.read().await.get(collection) {
            return Ok(id.clone());
        }
        Ok(self.describe(collection).await?.id)
    }

    async fn forget(&self, collection: &str) {
        self.ids.write().await.remove(collection);
    }

    async fn count_by_id(&self, collection: &str, id: &str) -> Result<u64, DriverError> {
        let url = self.collections_url(&[id, "count"]).await?;
        self.send(
            self.request(Method::GET, url),
            &format!("collection {}", collection),
        )
        .await
    }

    async fn get(&self, collection: &str, id: &str, body: Value) -> Result<GetResult, DriverError> {
        let url = self.collections_url(&[id, "get"]).await?;
        self.send(
            self.request(Method::POST, url).json(&body),
            &format!("collection {}", collection),
        )
        .await
    }

    async fn delete_ids(&self, collection: &str, id: &str, ids: &[Value]) -> Result<(), DriverError> {
        let url = self.collections_url(&[id, "delete"]).await?;
        let _: Value = self
            .send(
                self.request(Method::POST, url).json(&json!({ "ids": ids })),
                &format!("collection {}", collection),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BackendDriver for ChromaDriver {
    fn backend_type(&self) -> BackendType {
        BackendType::Chromadb
    }

    fn paging_mode(&self) -> PagingMode {
        PagingMode::Offset
    }

    fn reserved_payload_keys(&self) -> &'static [&'static str] {
        &["chroma:document"]
    }

    async fn heartbeat(&self) -> Result<(), DriverError> {
        self.generation().await.map(|_| ())
    }

    async fn list_collections(&self) -> Result<Vec<String>, DriverError> {
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }

        let url = self.collections_url(&[]).await?;
        let collections: Vec<Named> = self
            .send(self.request(Method::GET, url), "collections")
            .await?;
        Ok(collections.into_iter().map(|c| c.name).collect())
    }

    async fn collection_meta(&self, collection: &str) -> Result<RawCollection, DriverError> {
        let described = self.describe(collection).await?;
        let points_count = self.count_by_id(collection, &described.id).await?;

        let vector_size = match described.dimension {
            Some(dimension) => Some(dimension),
            None if points_count > 0 => {
                let sample = self
                    .get(collection, &described.id, json!({ "limit": 1, "include": ["embeddings"] }))
                    .await?;
                column(&sample.embeddings, 0)
                    .and_then(decode_vector)
                    .map(|v| v.len() as u64)
            }
            None => None,
        };

        Ok(RawCollection {
            name: collection.to_string(),
            vector_size,
            distance: Some(described.space()),
            points_count,
            segments_count: None,
            status: None,
        })
    }

    async fn points_count(&self, collection: &str) -> Result<u64, DriverError> {
        let id = self.collection_id(collection).await?;
        match self.count_by_id(collection, &id).await {
            Err(DriverError::NotFound(_)) => {
                self.forget(collection).await;
                let id = self.collection_id(collection).await?;
                self.count_by_id(collection, &id).await
            }
            other => other,
        }
    }

    async fn fetch_page(
        &self,
        collection: &str,
        token: &PageToken,
        limit: usize,
        include_payload: bool,
        include_vector: bool,
    ) -> Result<RawPage, DriverError> {
        let offset = match token {
            PageToken::Start => 0,
            PageToken::Offset(offset) => *offset,
            PageToken::Cursor(_) => {
                return Err(DriverError::Protocol(
                    "chroma pages by numeric offset, not cursor".to_string(),
                ))
            }
        };

        let mut include = Vec::new();
        if include_payload {
            include.extend(["metadatas", "documents"]);
        }
        if include_vector {
            include.push("embeddings");
        }

        let body = json!({ "limit": limit, "offset": offset, "include": include });
        let id = self.collection_id(collection).await?;
        let result = match self.get(collection, &id, body.clone()).await {
            // A remembered id goes stale when the collection is recreated.
            Err(DriverError::NotFound(_)) => {
                self.forget(collection).await;
                let id = self.collection_id(collection).await?;
                self.get(collection, &id, body).await?
            }
            other => other?,
        };

        let records: Vec<RawRecord> = result
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                assemble(
                    id.clone(),
                    column(&result.metadatas, i),
                    column(&result.documents, i),
                    column(&result.embeddings, i),
                )
            })
            .collect();

        debug!("fetched {} records from {} at offset {}", records.len(), collection, offset);

        let next = if records.len() >= limit {
            Some(PageToken::Offset(offset + records.len() as u64))
        } else {
            None
        };
        Ok(RawPage { records, next })
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<(), DriverError> {
        let described = self.describe(collection).await?;
        let ids: Vec<Value> = ids.iter().map(|id| Value::String(id.clone())).collect();
        self.delete_ids(collection, &described.id, &ids).await
    }

    async fn clear_collection(&self, collection: &str) -> Result<u64, DriverError> {
        let described = self.describe(collection).await?;
        let mut deleted = 0u64;
        let mut previous_first: Option<Value> = None;

        loop {
            let batch = self
                .get(
                    collection,
                    &described.id,
                    json!({ "limit": CLEAR_BATCH, "offset": 0, "include": [] }),
                )
                .await?;
            if batch.ids.is_empty() {
                break;
            }
            if previous_first.as_ref() == batch.ids.first() {
                return Err(DriverError::Protocol(format!(
                    "delete on {} made no progress",
                    collection
                )));
            }
            previous_first = batch.ids.first().cloned();

            self.delete_ids(collection, &described.id, &batch.ids).await?;
            deleted += batch.ids.len() as u64;
        }

        Ok(deleted)
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), DriverError> {
        let url = self.collections_url(&[collection]).await?;
        self.forget(collection).await;
        let response = self.request(Method::DELETE, url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DriverError::NotFound(format!("collection {}", collection)));
        }
        if !status.is_success() {
            return Err(DriverError::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Chroma ranks by distance, so `score` carries the raw distance and the
    /// threshold is an upper bound on it.
    async fn vector_query(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RawRecord>, DriverError> {
        let described = self.describe(collection).await?;
        let url = self.collections_url(&[described.id.as_str(), "query"]).await?;
        let body = json!({
            "query_embeddings": [vector],
            "n_results": limit,
            "include": ["metadatas", "documents", "distances"],
        });
        let result: QueryResult = self
            .send(
                self.request(Method::POST, url).json(&body),
                &format!("collection {}", collection),
            )
            .await?;

        let ids = match result.ids.into_iter().next() {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        let distances = result.distances.and_then(|d| d.into_iter().next());
        let metadatas = result.metadatas.and_then(|m| m.into_iter().next());
        let documents = result.documents.and_then(|d| d.into_iter().next());

        let records = ids
            .into_iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let distance = distances.as_ref().and_then(|d| d.get(i).copied().flatten())?;
                if score_threshold.map_or(false, |t| distance > t) {
                    return None;
                }
                let mut record = assemble(
                    id,
                    column(&metadatas, i),
                    column(&documents, i),
                    None,
                );
                record.score = Some(distance);
                Some(record)
            })
            .collect();
        Ok(records)
    }
}
