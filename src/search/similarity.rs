// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use tracing::{info, warn};

use crate::core::error::{BrowserError, Result};
use crate::core::normalizer::normalize_scored;
use crate::core::types::Point;
use crate::drivers::BoundedDriver;
use crate::search::pagination::{validate_limit, MAX_PAGE_LIMIT};

/// Forwards a query vector to the backend's native search.
///
/// The dimension is checked against the collection before anything is sent.
/// Ranking and scores are the backend's own: scores from different distance
/// metrics are not comparable. A collection reporting a vector size of 0 has
/// an unknown dimension and is not checked.
pub async fn similarity_search(
    driver: &BoundedDriver,
    collection: &str,
    query: &[f32],
    limit: usize,
    score_threshold: Option<f32>,
) -> Result<Vec<Point>> {
    validate_limit(limit, MAX_PAGE_LIMIT)?;

    let meta = driver.collection_meta(collection).await?;
    if let Some(expected) = meta.vector_size.filter(|size| *size > 0) {
        if expected != query.len() as u64 {
            return Err(BrowserError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
    }

    let raw = driver
        .vector_query(collection, query, limit, score_threshold)
        .await?;

    let reserved = driver.reserved_payload_keys();
    let mut points = Vec::with_capacity(raw.len());
    for record in raw {
        match normalize_scored(record, reserved) {
            Ok(point) => points.push(point),
            Err(e) => warn!("dropping similarity result from '{}': {}", collection, e),
        }
    }

    info!("vector search in '{}' returned {} points", collection, points.len());
    Ok(points)
}
