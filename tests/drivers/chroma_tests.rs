// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vector_browser::core::types::{BackendType, InstanceDescriptor};
use vector_browser::drivers::chroma::ApiGeneration;
use vector_browser::drivers::{BackendDriver, BoundedDriver, ChromaDriver};
use vector_browser::search::{similarity_search, Paginator};

const V2_COLLECTIONS: &str = "/api/v2/tenants/default_tenant/databases/default_database/collections";

fn driver(url: &str) -> ChromaDriver {
    let descriptor =
        InstanceDescriptor::new("c", url, BackendType::Chromadb).with_api_key("token");
    ChromaDriver::new(&descriptor, Duration::from_secs(5)).unwrap()
}

/// A v2 server describing collection "docs" (id `c1`, 3 points, dimension 3).
/// Mocks stay registered only while the returned handles are alive.
async fn v2_server() -> (ServerGuard, Vec<Mock>) {
    let mut server = Server::new_async().await;
    let heartbeat = server
        .mock("GET", "/api/v2/heartbeat")
        .with_status(200)
        .with_body(r#"{"nanosecond heartbeat":1}"#)
        .create_async()
        .await;
    let describe = server
        .mock("GET", format!("{}/docs", V2_COLLECTIONS).as_str())
        .with_status(200)
        .with_body(
            json!({
                "id": "c1",
                "name": "docs",
                "metadata": {"hnsw:space": "cosine"},
                "dimension": 3
            })
            .to_string(),
        )
        .create_async()
        .await;
    let count = server
        .mock("GET", format!("{}/c1/count", V2_COLLECTIONS).as_str())
        .with_status(200)
        .with_body("3")
        .create_async()
        .await;
    (server, vec![heartbeat, describe, count])
}

#[tokio::test]
async fn test_api_check_runs_once_per_handle() {
    let mut server = Server::new_async().await;
    let heartbeat = server
        .mock("GET", "/api/v2/heartbeat")
        .match_header("authorization", "Bearer token")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let _list = server
        .mock("GET", V2_COLLECTIONS)
        .with_status(200)
        .with_body(r#"[{"id":"c1","name":"docs"},{"id":"c2","name":"notes"}]"#)
        .expect(2)
        .create_async()
        .await;

    let chroma = driver(&server.url());
    assert_eq!(chroma.list_collections().await.unwrap(), vec!["docs", "notes"]);
    assert_eq!(chroma.list_collections().await.unwrap().len(), 2);
    assert_eq!(chroma.probed_generation(), Some(ApiGeneration::V2));
    heartbeat.assert_async().await;
}

#[tokio::test]
async fn test_falls_back_to_v1_api() {
    let mut server = Server::new_async().await;
    let _v2 = server
        .mock("GET", "/api/v2/heartbeat")
        .with_status(404)
        .create_async()
        .await;
    let _v1 = server
        .mock("GET", "/api/v1/heartbeat")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let list = server
        .mock("GET", "/api/v1/collections")
        .with_status(200)
        .with_body(r#"[{"id":"c1","name":"legacy"}]"#)
        .create_async()
        .await;

    let chroma = driver(&server.url());
    chroma.heartbeat().await.unwrap();
    assert_eq!(chroma.probed_generation(), Some(ApiGeneration::V1));
    assert_eq!(chroma.list_collections().await.unwrap(), vec!["legacy"]);
    list.assert_async().await;
}

#[tokio::test]
async fn test_collection_meta_reads_space_and_count() {
    let (server, _mocks) = v2_server().await;
    let raw = driver(&server.url()).collection_meta("docs").await.unwrap();
    assert_eq!(raw.vector_size, Some(3));
    assert_eq!(raw.distance.as_deref(), Some("cosine"));
    assert_eq!(raw.points_count, 3);
    assert_eq!(raw.segments_count, None);
    assert_eq!(raw.status, None);
}

#[tokio::test]
async fn test_offset_page_folds_document_and_strips_reserved_keys() {
    let (mut server, _mocks) = v2_server().await;
    let get = server
        .mock("POST", format!("{}/c1/get", V2_COLLECTIONS).as_str())
        .match_body(Matcher::PartialJson(json!({"limit": 2, "offset": 2})))
        .with_status(200)
        .with_body(
            json!({
                "ids": ["c"],
                "metadatas": [{"lang": "en", "chroma:document": "internal"}],
                "documents": ["Banana bread"],
                "embeddings": null
            })
            .to_string(),
        )
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url())), Duration::from_secs(5));
    let mut pager = Paginator::new(bounded, "docs");
    let fetched = pager.fetch_page(2, 2, true, false).await.unwrap();

    get.assert_async().await;
    assert_eq!(fetched.page.total, 3);
    assert_eq!(fetched.page.offset, 2);
    assert_eq!(fetched.page.items.len(), 1);
    let point = &fetched.page.items[0];
    assert_eq!(point.id, "c");
    assert_eq!(point.payload.get("document"), Some(&json!("Banana bread")));
    assert_eq!(point.payload.get("lang"), Some(&json!("en")));
    assert!(!point.payload.contains_key("chroma:document"));
    assert!(fetched.exhausted);
}

#[tokio::test]
async fn test_paging_describes_collection_once() {
    let mut server = Server::new_async().await;
    let _heartbeat = server
        .mock("GET", "/api/v2/heartbeat")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let describe = server
        .mock("GET", format!("{}/docs", V2_COLLECTIONS).as_str())
        .with_status(200)
        .with_body(r#"{"id": "c1", "name": "docs", "metadata": null}"#)
        .expect(1)
        .create_async()
        .await;
    let count = server
        .mock("GET", format!("{}/c1/count", V2_COLLECTIONS).as_str())
        .with_status(200)
        .with_body("4")
        .expect(2)
        .create_async()
        .await;
    let get = server
        .mock("POST", format!("{}/c1/get", V2_COLLECTIONS).as_str())
        .with_status(200)
        .with_body(r#"{"ids": ["a", "b"], "metadatas": [{"n": 1}, {"n": 2}], "documents": null}"#)
        .expect(2)
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url())), Duration::from_secs(5));
    let mut pager = Paginator::new(bounded, "docs");
    let first = pager.fetch_page(0, 2, true, false).await.unwrap();
    let second = pager.fetch_page(2, 2, true, false).await.unwrap();

    assert_eq!(first.page.total, 4);
    assert_eq!(second.page.items.len(), 2);
    describe.assert_async().await;
    count.assert_async().await;
    get.assert_async().await;
}

#[tokio::test]
async fn test_distance_threshold_is_an_upper_bound() {
    let (mut server, _mocks) = v2_server().await;
    let _query = server
        .mock("POST", format!("{}/c1/query", V2_COLLECTIONS).as_str())
        .match_body(Matcher::PartialJson(json!({"n_results": 5})))
        .with_status(200)
        .with_body(
            json!({
                "ids": [["a", "b"]],
                "distances": [[0.1, 0.8]],
                "metadatas": [[{"title": "near"}, {"title": "far"}]],
                "documents": [[null, null]]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url())), Duration::from_secs(5));
    let results = similarity_search(&bounded, "docs", &[1.0, 0.0, 0.0], 5, Some(0.5))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "a");
    assert_eq!(results[0].score, Some(0.1));
    assert_eq!(results[0].payload.get("title"), Some(&json!("near")));
}

#[tokio::test]
async fn test_missing_collection_message_maps_to_not_found() {
    let mut server = Server::new_async().await;
    let _heartbeat = server
        .mock("GET", "/api/v2/heartbeat")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _describe = server
        .mock("GET", format!("{}/ghost", V2_COLLECTIONS).as_str())
        .with_status(500)
        .with_body(r#"{"error":"Collection ghost does not exist."}"#)
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url())), Duration::from_secs(5));
    let err = bounded.collection_meta("ghost").await.unwrap_err();
    assert!(matches!(err, vector_browser::BrowserError::NotFound(_)));
}
