// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vector_browser::core::error::BrowserError;
use vector_browser::core::normalizer::normalize_collection;
use vector_browser::core::types::{BackendType, DistanceMetric, InstanceDescriptor};
use vector_browser::drivers::{BackendDriver, BoundedDriver, PageToken, QdrantDriver};
use vector_browser::search::{similarity_search, Paginator};

fn driver(url: &str, api_key: Option<&str>) -> QdrantDriver {
    let mut descriptor = InstanceDescriptor::new("q", url, BackendType::Qdrant);
    descriptor.api_key = api_key.map(str::to_string);
    QdrantDriver::new(&descriptor, Duration::from_secs(5)).unwrap()
}

fn collection_body(points_count: Option<u64>) -> String {
    json!({
        "result": {
            "status": "green",
            "points_count": points_count,
            "segments_count": 2,
            "config": {"params": {"vectors": {"size": 3, "distance": "Cosine"}}}
        },
        "status": "ok",
        "time": 0.001
    })
    .to_string()
}

#[tokio::test]
async fn test_list_collections_sends_api_key() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/collections")
        .match_header("api-key", "secret")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"result":{"collections":[{"name":"docs"},{"name":"images"}]},"status":"ok"}"#)
        .create_async()
        .await;

    let names = driver(&server.url(), Some("secret")).list_collections().await.unwrap();
    assert_eq!(names, vec!["docs", "images"]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_collection_meta_normalizes() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/collections/docs")
        .with_status(200)
        .with_body(collection_body(Some(3)))
        .create_async()
        .await;

    let raw = driver(&server.url(), None).collection_meta("docs").await.unwrap();
    let info = normalize_collection(raw);
    assert_eq!(info.vector_size, 3);
    assert_eq!(info.distance, DistanceMetric::Cosine);
    assert_eq!(info.points_count, 3);
    assert_eq!(info.segments_count, 2);
    assert_eq!(info.status, "green");
}

#[tokio::test]
async fn test_missing_points_count_falls_back_to_count() {
    let mut server = mockito::Server::new_async().await;
    let _m1 = server
        .mock("GET", "/collections/docs")
        .with_status(200)
        .with_body(collection_body(None))
        .create_async()
        .await;
    let _m2 = server
        .mock("POST", "/collections/docs/points/count")
        .match_body(Matcher::PartialJson(json!({"exact": true})))
        .with_status(200)
        .with_body(r#"{"result":{"count":42}}"#)
        .create_async()
        .await;

    let raw = driver(&server.url(), None).collection_meta("docs").await.unwrap();
    assert_eq!(raw.points_count, 42);
}

#[tokio::test]
async fn test_scroll_follows_next_page_offset() {
    let mut server = mockito::Server::new_async().await;
    let _meta = server
        .mock("GET", "/collections/docs")
        .with_status(200)
        .with_body(collection_body(Some(3)))
        .expect(2)
        .create_async()
        .await;
    let _first = server
        .mock("POST", "/collections/docs/points/scroll")
        .match_body(Matcher::Json(json!({"limit": 2, "with_payload": true, "with_vector": false})))
        .with_status(200)
        .with_body(
            json!({"result": {
                "points": [
                    {"id": 1, "payload": {"title": "Apple pie"}},
                    {"id": "9b1c4f0e-0000-0000-0000-000000000002", "payload": {"title": "apple tart"}}
                ],
                "next_page_offset": 3
            }})
            .to_string(),
        )
        .create_async()
        .await;
    let _second = server
        .mock("POST", "/collections/docs/points/scroll")
        .match_body(Matcher::PartialJson(json!({"offset": 3})))
        .with_status(200)
        .with_body(
            json!({"result": {
                "points": [{"id": 3, "payload": {"title": "Banana"}}],
                "next_page_offset": null
            }})
            .to_string(),
        )
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url(), None)), Duration::from_secs(5));
    let mut pager = Paginator::new(bounded, "docs");

    let first = pager.fetch_page(0, 2, true, false).await.unwrap();
    let ids: Vec<&str> = first.page.items.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "9b1c4f0e-0000-0000-0000-000000000002"]);

    let second = pager.fetch_page(2, 2, true, false).await.unwrap();
    assert_eq!(second.page.items[0].id, "3");
    assert_eq!(second.page.total, 3);
    assert!(second.exhausted);
}

#[tokio::test]
async fn test_numeric_offset_token_rejected() {
    let result = driver("http://localhost:6333", None)
        .fetch_page("docs", &PageToken::Offset(5), 10, true, false)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_missing_collection_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/collections/gone")
        .with_status(404)
        .with_body(r#"{"status":{"error":"Not found: Collection `gone` doesn't exist!"}}"#)
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url(), None)), Duration::from_secs(5));
    let err = bounded.collection_meta("gone").await.unwrap_err();
    assert!(matches!(err, BrowserError::NotFound(_)));
}

#[tokio::test]
async fn test_server_error_is_wrapped_with_operation() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("DELETE", "/collections/docs")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url(), None)), Duration::from_secs(5));
    let err = bounded.delete_collection("docs").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("delete_collection"));
    assert!(message.contains("docs"));
    assert!(message.contains("500"));
}

#[tokio::test]
async fn test_vector_search_forwards_threshold() {
    let mut server = mockito::Server::new_async().await;
    let _meta = server
        .mock("GET", "/collections/docs")
        .with_status(200)
        .with_body(collection_body(Some(3)))
        .create_async()
        .await;
    let search = server
        .mock("POST", "/collections/docs/points/search")
        .match_body(Matcher::PartialJson(json!({"limit": 2, "score_threshold": 0.5})))
        .with_status(200)
        .with_body(
            json!({"result": [
                {"id": 1, "score": 0.99, "payload": {"title": "Apple pie"}},
                {"id": 3, "score": 0.71, "payload": {"title": "Banana"}}
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let bounded = BoundedDriver::new(Arc::new(driver(&server.url(), None)), Duration::from_secs(5));
    let results = similarity_search(&bounded, "docs", &[1.0, 0.0, 0.0], 2, Some(0.5))
        .await
        .unwrap();

    search.assert_async().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].id, "3");
    assert_eq!(results[1].score, Some(0.71));
}

#[tokio::test]
async fn test_clear_counts_then_deletes_everything() {
    let mut server = mockito::Server::new_async().await;
    let _count = server
        .mock("POST", "/collections/docs/points/count")
        .with_status(200)
        .with_body(r#"{"result":{"count":7}}"#)
        .create_async()
        .await;
    let delete = server
        .mock("POST", "/collections/docs/points/delete")
        .match_query(Matcher::UrlEncoded("wait".into(), "true".into()))
        .match_body(Matcher::Json(json!({"filter": {"must": []}})))
        .with_status(200)
        .with_body(r#"{"result":{"operation_id":1,"status":"completed"}}"#)
        .create_async()
        .await;

    let removed = driver(&server.url(), None).clear_collection("docs").await.unwrap();
    assert_eq!(removed, 7);
    delete.assert_async().await;
}
