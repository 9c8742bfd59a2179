// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod canonical;
pub mod error;
pub mod normalizer;
pub mod types;

pub use canonical::{canonical_payload, canonical_value};
pub use error::{BrowserError, Result};
pub use normalizer::{
    normalize_collection, normalize_page, normalize_record, normalize_scored, parse_distance,
    NormalizedPage, RecordError,
};
pub use types::{
    BackendType, ClearOutcome, CollectionInfo, DistanceMetric, InstanceDescriptor, Page, Payload,
    Point, SearchOutcome,
};
