// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::common::{bounded, docs_driver, numbered_driver, PAGING_MODES};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use vector_browser::core::error::{BrowserError, Result};
use vector_browser::drivers::{MemoryDriver, PagingMode};
use vector_browser::export::{export_stream, plan_export};

async fn collect(mut stream: BoxStream<'static, Result<Bytes>>) -> (Vec<u8>, Option<BrowserError>) {
    let mut body = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => body.extend_from_slice(&chunk),
            Err(e) => return (body, Some(e)),
        }
    }
    (body, None)
}

fn read_rows(body: &[u8]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new().from_reader(body);
    let header = reader
        .headers()
        .unwrap()
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(|c| c.to_string()).collect())
        .collect();
    (header, rows)
}

#[tokio::test]
async fn test_empty_collection_exports_header_only() {
    let driver = Arc::new(MemoryDriver::new(PagingMode::Offset));
    driver.create_collection("empty", 4, "Cosine").await;
    let driver = bounded(driver);

    let plan = plan_export(&driver, "empty", false).await.unwrap();
    let (body, err) = collect(export_stream(driver, plan)).await;

    assert!(err.is_none());
    assert!(!body.is_empty());
    assert_eq!(body, b"id\n");
}

#[tokio::test]
async fn test_payload_id_key_gets_its_own_column() {
    let driver = Arc::new(MemoryDriver::new(PagingMode::Cursor));
    driver.create_collection("c", 2, "Cosine").await;
    driver
        .upsert("c", 1, json!({"id": "ext-A", "t": "x"}), Some(vec![1.0, 0.0]))
        .await;
    driver
        .upsert("c", 2, json!({"id": "ext-B", "t": "y", "vector_0": 9}), Some(vec![0.0, 1.0]))
        .await;
    let driver = bounded(driver);

    let plan = plan_export(&driver, "c", true).await.unwrap();
    let (body, err) = collect(export_stream(driver, plan)).await;
    assert!(err.is_none());

    let (header, rows) = read_rows(&body);
    assert_eq!(
        header,
        vec!["id", "payload.id", "t", "payload.vector_0", "vector_0", "vector_1"]
    );
    let unique: HashSet<&String> = header.iter().collect();
    assert_eq!(unique.len(), header.len());
    assert_eq!(rows[0], vec!["1", "ext-A", "x", "", "1", "0"]);
    assert_eq!(rows[1], vec!["2", "ext-B", "y", "9", "0", "1"]);
}

#[tokio::test]
async fn test_row_count_and_ids_round_trip() {
    for mode in PAGING_MODES {
        let driver = bounded(numbered_driver(mode, "c", 600).await);
        let plan = plan_export(&driver, "c", false).await.unwrap();
        let (body, err) = collect(export_stream(driver, plan)).await;
        assert!(err.is_none());

        let (header, rows) = read_rows(&body);
        assert_eq!(header, vec!["id", "n", "label"]);
        assert_eq!(rows.len(), 600);
        let ids: HashSet<String> = rows.iter().map(|r| r[0].clone()).collect();
        let expected: HashSet<String> = (0..600).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected);
    }
}

#[tokio::test]
async fn test_late_columns_land_in_header() {
    let driver = Arc::new(MemoryDriver::new(PagingMode::Cursor));
    for i in 0..300u64 {
        driver.upsert("c", i, json!({"title": format!("t{}", i)}), None).await;
    }
    driver
        .upsert("c", 300, json!({"title": "last", "meta": {"tags": ["a", "b"]}}), None)
        .await;
    let driver = bounded(driver);

    let plan = plan_export(&driver, "c", false).await.unwrap();
    assert_eq!(plan.payload_keys, vec!["title", "meta"]);

    let (body, _) = collect(export_stream(driver, plan)).await;
    let (header, rows) = read_rows(&body);
    assert_eq!(header, vec!["id", "title", "meta"]);
    assert_eq!(rows[0], vec!["0", "t0", ""]);
    assert_eq!(rows[300], vec!["300", "last", r#"{"tags":["a","b"]}"#]);
}

#[tokio::test]
async fn test_vectors_one_column_per_dimension() {
    let driver = bounded(docs_driver(PagingMode::Offset).await);
    let plan = plan_export(&driver, "docs", true).await.unwrap();
    let (body, err) = collect(export_stream(driver, plan)).await;
    assert!(err.is_none());

    let (header, rows) = read_rows(&body);
    assert_eq!(header, vec!["id", "title", "vector_0", "vector_1", "vector_2"]);
    assert_eq!(rows[0], vec!["1", "Apple pie", "1", "0", "0"]);
    assert_eq!(rows[2][2], "0.7");
}

#[tokio::test]
async fn test_dimension_probed_when_backend_does_not_report_it() {
    let driver = Arc::new(MemoryDriver::new(PagingMode::Offset));
    driver.create_collection("c", 0, "l2").await;
    driver.upsert("c", "a", json!({"k": 1}), Some(vec![0.25, 0.5])).await;
    let driver = bounded(driver);

    let plan = plan_export(&driver, "c", true).await.unwrap();
    assert_eq!(plan.dimension, 2);
    let (body, _) = collect(export_stream(driver, plan)).await;
    let (header, rows) = read_rows(&body);
    assert_eq!(header, vec!["id", "k", "vector_0", "vector_1"]);
    assert_eq!(rows[0], vec!["a", "1", "0.25", "0.5"]);
}

#[tokio::test]
async fn test_failure_mid_stream_is_reported_not_truncated() {
    // The header pass uses the first two fetches; the row pass dies after one page.
    let memory = Arc::new(MemoryDriver::new(PagingMode::Cursor).fail_fetch_after(3));
    for i in 0..400u64 {
        memory.upsert("c", i, json!({"n": i}), None).await;
    }
    let driver = bounded(memory);

    let plan = plan_export(&driver, "c", false).await.unwrap();
    let (body, err) = collect(export_stream(driver, plan)).await;

    match err {
        Some(BrowserError::PartialExportFailure {
            collection,
            rows_written,
            ..
        }) => {
            assert_eq!(collection, "c");
            assert_eq!(rows_written, 256);
        }
        other => panic!("expected partial export failure, got {:?}", other),
    }
    let (_, rows) = read_rows(&body);
    assert_eq!(rows.len(), 256);
}

#[tokio::test]
async fn test_dropping_stream_stops_fetching() {
    let memory = numbered_driver(PagingMode::Cursor, "c", 1000).await;
    let driver = bounded(memory.clone());
    let plan = plan_export(&driver, "c", false).await.unwrap();
    let after_plan = memory.fetch_calls();

    let mut stream = export_stream(driver, plan);
    // Header, then one page of rows.
    stream.next().await.unwrap().unwrap();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    tokio::task::yield_now().await;
    assert_eq!(memory.fetch_calls(), after_plan + 1);
}
