// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::browser::Browser;
use crate::core::error::BrowserError;
use crate::core::types::{
    BackendType, ClearOutcome, CollectionInfo, InstanceDescriptor, Page, Point, SearchOutcome,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size: usize,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_request_size: 10 * 1024 * 1024, // 10MB
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub browser: Browser,
}

// Request/Response types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddInstanceRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(rename = "type", default)]
    pub backend: BackendType,
}

impl From<AddInstanceRequest> for InstanceDescriptor {
    fn from(request: AddInstanceRequest) -> Self {
        InstanceDescriptor {
            name: request.name,
            url: request.url,
            api_key: request.api_key.filter(|k| !k.is_empty()),
            backend: request.backend,
        }
    }
}

/// Instance as shown to clients. The API key itself is never echoed back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceView {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub backend: BackendType,
    pub has_api_key: bool,
}

impl From<InstanceDescriptor> for InstanceView {
    fn from(descriptor: InstanceDescriptor) -> Self {
        Self {
            has_api_key: descriptor.api_key.is_some(),
            name: descriptor.name,
            url: descriptor.url,
            backend: descriptor.backend,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveInstanceResponse {
    pub message: String,
    pub removed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointsQuery {
    #[serde(default = "default_page_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_true")]
    pub with_payload: bool,
    #[serde(default)]
    pub with_vector: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchRequest {
    pub collection_name: String,
    pub query_vector: Vec<f32>,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSearchRequest {
    pub collection_name: String,
    pub search_text: String,
    #[serde(default = "default_text_limit")]
    pub limit: usize,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub with_vectors: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

fn default_page_limit() -> usize {
    10
}

fn default_text_limit() -> usize {
    50
}

fn default_true() -> bool {
    true
}

// Error handling
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl ErrorResponse {
    pub fn new(error: String) -> Self {
        Self {
            error,
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn with_status(error: String, status_code: StatusCode) -> Self {
        Self { error, status_code }
    }
}

pub fn status_for(err: &BrowserError) -> StatusCode {
    match err {
        BrowserError::NotFound(_) => StatusCode::NOT_FOUND,
        BrowserError::DuplicateName(_) => StatusCode::CONFLICT,
        BrowserError::InvalidLimit { .. }
        | BrowserError::DimensionMismatch { .. }
        | BrowserError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        BrowserError::BackendUnavailable { .. }
        | BrowserError::Backend { .. }
        | BrowserError::CorruptPage { .. }
        | BrowserError::PartialExportFailure { .. } => StatusCode::BAD_GATEWAY,
        BrowserError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        BrowserError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BrowserError> for ErrorResponse {
    fn from(err: BrowserError) -> Self {
        let status_code = status_for(&err);
        if status_code.is_server_error() {
            error!("request failed: {}", err);
        }
        Self::with_status(err.to_string(), status_code)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(allowed)
}

pub fn create_app(config: &ApiConfig, browser: Browser) -> Router {
    let state = AppState { browser };

    Router::new()
        .route("/health", get(health_handler))
        // Instances
        .route("/instances", get(list_instances).post(add_instance))
        .route("/instances/:name", delete(remove_instance))
        // Collections
        .route("/collections/:instance", get(list_collections))
        .route("/collections/:instance/:collection", delete(delete_collection))
        // Points
        .route(
            "/points/:instance/:collection",
            get(get_points).delete(clear_collection),
        )
        .route("/points/:instance/:collection/:point_id", delete(delete_point))
        // Search
        .route("/search/:instance", post(vector_search))
        .route("/text-search/:instance", post(text_search))
        // Export
        .route("/export/:instance/:collection", get(export_collection))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins))
        .layer(RequestBodyLimitLayer::new(config.max_request_size))
        .with_state(state)
}

// Handler implementations
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn list_instances(State(state): State<AppState>) -> Json<Vec<InstanceView>> {
    let instances = state.browser.list_instances().await;
    Json(instances.into_iter().map(InstanceView::from).collect())
}

async fn add_instance(
    State(state): State<AppState>,
    Json(request): Json<AddInstanceRequest>,
) -> Result<(StatusCode, Json<InstanceView>), ErrorResponse> {
    let descriptor = InstanceDescriptor::from(request);
    state.browser.add_instance(descriptor.clone()).await?;
    info!("Added {} instance '{}'", descriptor.backend, descriptor.name);
    Ok((StatusCode::CREATED, Json(InstanceView::from(descriptor))))
}

async fn remove_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RemoveInstanceResponse>, ErrorResponse> {
    let removed = state.browser.remove_instance(&name).await?;
    Ok(Json(RemoveInstanceResponse {
        message: format!("Instance '{}' removed", name),
        removed,
    }))
}

async fn list_collections(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> Result<Json<Vec<CollectionInfo>>, ErrorResponse> {
    Ok(Json(state.browser.list_collections(&instance).await?))
}

async fn delete_collection(
    State(state): State<AppState>,
    Path((instance, collection)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ErrorResponse> {
    state.browser.delete_collection(&instance, &collection).await?;
    Ok(Json(MessageResponse {
        message: format!("Collection '{}' deleted", collection),
    }))
}

async fn get_points(
    State(state): State<AppState>,
    Path((instance, collection)): Path<(String, String)>,
    Query(query): Query<PointsQuery>,
) -> Result<Json<Page<Point>>, ErrorResponse> {
    let page = state
        .browser
        .fetch_points(
            &instance,
            &collection,
            query.offset,
            query.limit,
            query.with_payload,
            query.with_vector,
        )
        .await?;
    Ok(Json(page))
}

async fn clear_collection(
    State(state): State<AppState>,
    Path((instance, collection)): Path<(String, String)>,
) -> Result<Json<ClearOutcome>, ErrorResponse> {
    Ok(Json(state.browser.clear_collection(&instance, &collection).await?))
}

async fn delete_point(
    State(state): State<AppState>,
    Path((instance, collection, point_id)): Path<(String, String, String)>,
) -> Result<Json<MessageResponse>, ErrorResponse> {
    state
        .browser
        .delete_point(&instance, &collection, &point_id)
        .await?;
    Ok(Json(MessageResponse {
        message: format!("Point '{}' deleted", point_id),
    }))
}

async fn vector_search(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Json(request): Json<VectorSearchRequest>,
) -> Result<Json<Vec<Point>>, ErrorResponse> {
    let results = state
        .browser
        .vector_search(
            &instance,
            &request.collection_name,
            &request.query_vector,
            request.limit,
            request.score_threshold,
        )
        .await?;
    Ok(Json(results))
}

async fn text_search(
    State(state): State<AppState>,
    Path(instance): Path<String>,
    Json(request): Json<TextSearchRequest>,
) -> Result<Json<SearchOutcome>, ErrorResponse> {
    let outcome = state
        .browser
        .text_search(
            &instance,
            &request.collection_name,
            &request.search_text,
            request.case_sensitive,
            request.limit,
        )
        .await?;
    Ok(Json(outcome))
}

async fn export_collection(
    State(state): State<AppState>,
    Path((instance, collection)): Path<(String, String)>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ErrorResponse> {
    let export = state
        .browser
        .export(&instance, &collection, query.with_vectors)
        .await?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename={}", export.file_name))
        .map_err(|e| ErrorResponse::new(format!("Invalid export file name: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(export.stream),
    )
        .into_response())
}
