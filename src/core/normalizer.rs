// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Maps driver-native collections and records onto [`CollectionInfo`] and [`Point`].
//!
//! Pure functions: nothing here talks to a backend.

use serde_json::Value;
use thiserror::Error;

use crate::core::error::{BrowserError, Result};
use crate::core::types::{CollectionInfo, DistanceMetric, Payload, Point};
use crate::drivers::{RawCollection, RawRecord};

/// Status reported for backends without a status concept.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Why a single record could not be normalized.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("id must be an integer or a string, got {0}")]
    MalformedId(Value),

    #[error("payload of point {0} is not an object")]
    MalformedPayload(String),

    #[error("similarity result {0} carries no score")]
    MissingScore(String),
}

/// Points decoded from one page, plus how many records had to be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPage {
    pub points: Vec<Point>,
    pub skipped: u64,
    /// For each dropped record, how many points were decoded before it.
    pub skipped_at: Vec<usize>,
}

pub fn parse_distance(token: &str) -> DistanceMetric {
    match token.trim().to_ascii_lowercase().as_str() {
        "cosine" => DistanceMetric::Cosine,
        "euclid" | "euclidean" | "l2" => DistanceMetric::Euclidean,
        "dot" | "ip" => DistanceMetric::Dot,
        "manhattan" | "l1" => DistanceMetric::Manhattan,
        _ => DistanceMetric::Unknown,
    }
}

pub fn normalize_collection(raw: RawCollection) -> CollectionInfo {
    CollectionInfo {
        name: raw.name,
        vector_size: raw.vector_size.unwrap_or(0),
        distance: raw
            .distance
            .as_deref()
            .map(parse_distance)
            .unwrap_or(DistanceMetric::Unknown),
        points_count: raw.points_count,
        segments_count: raw.segments_count.unwrap_or(0),
        status: raw
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
    }
}

fn coerce_id(id: &Value) -> std::result::Result<String, RecordError> {
    match id {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        other => Err(RecordError::MalformedId(other.clone())),
    }
}

/// Normalizes a record from a plain read. Never sets `score`.
pub fn normalize_record(
    raw: RawRecord,
    reserved_keys: &[&str],
    include_vector: bool,
) -> std::result::Result<Point, RecordError> {
    let id = coerce_id(&raw.id)?;
    let payload = match raw.payload {
        Value::Null => Payload::new(),
        Value::Object(mut fields) => {
            for key in reserved_keys {
                fields.shift_remove(*key);
            }
            fields
        }
        _ => return Err(RecordError::MalformedPayload(id)),
    };

    Ok(Point {
        id,
        payload,
        vector: if include_vector { raw.vector } else { None },
        score: None,
    })
}

/// Normalizes a similarity result; the backend's score is carried through untouched.
pub fn normalize_scored(
    raw: RawRecord,
    reserved_keys: &[&str],
) -> std::result::Result<Point, RecordError> {
    let score = raw.score;
    let mut point = normalize_record(raw, reserved_keys, false)?;
    match score {
        Some(score) => {
            point.score = Some(score);
            Ok(point)
        }
        None => Err(RecordError::MissingScore(point.id)),
    }
}

/// Normalizes a whole page. Malformed records are skipped and counted; a
/// non-empty page in which every record is malformed is a [`BrowserError::CorruptPage`].
pub fn normalize_page(
    records: Vec<RawRecord>,
    reserved_keys: &[&str],
    include_vector: bool,
    collection: &str,
    offset: u64,
) -> Result<NormalizedPage> {
    let fetched = records.len();
    let mut points = Vec::with_capacity(fetched);
    let mut skipped_at = Vec::new();

    for raw in records {
        match normalize_record(raw, reserved_keys, include_vector) {
            Ok(point) => points.push(point),
            Err(e) => {
                tracing::warn!("skipping record in '{}' near offset {}: {}", collection, offset, e);
                skipped_at.push(points.len());
            }
        }
    }

    if fetched > 0 && points.is_empty() {
        return Err(BrowserError::CorruptPage {
            collection: collection.to_string(),
            offset,
        });
    }

    Ok(NormalizedPage {
        points,
        skipped: skipped_at.len() as u64,
        skipped_at,
    })
}
