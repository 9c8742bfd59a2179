// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! CSV export of a whole collection.
//!
//! Export runs in two passes. The header pass walks the collection once to
//! collect the union of top-level payload keys (in first-seen order) and,
//! when vectors are requested, the vector dimension. The row pass then
//! streams one CSV chunk per backend page. Both passes fetch one page at a
//! time, and the row pass only fetches when the stream is polled, so dropping
//! the stream stops the export.

use std::collections::HashSet;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use indexmap::IndexSet;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::error::{BrowserError, Result};
use crate::core::types::Point;
use crate::drivers::BoundedDriver;
use crate::search::pagination::{PageScan, Paginator};

pub const EXPORT_PAGE_SIZE: usize = 256;

/// Prefix given to a payload column whose key clashes with another column.
pub const PAYLOAD_COLUMN_PREFIX: &str = "payload.";

const ID_COLUMN: &str = "id";

fn vector_column(index: usize) -> String {
    format!("vector_{}", index)
}

/// Column layout decided by the header pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub collection: String,
    pub payload_keys: Vec<String>,
    pub dimension: usize,
    pub include_vectors: bool,
    /// Records seen by the header pass.
    pub scanned: u64,
}

impl ExportPlan {
    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(1 + self.payload_keys.len() + self.dimension);
        header.push(ID_COLUMN.to_string());
        header.extend(self.payload_columns());
        if self.include_vectors {
            header.extend((0..self.dimension).map(vector_column));
        }
        header
    }

    /// Column name for each payload key, in `payload_keys` order.
    ///
    /// A key equal to `id` or to an exported `vector_N` column is prefixed with
    /// [`PAYLOAD_COLUMN_PREFIX`], repeatedly if the prefixed name is itself a
    /// payload key, so every header name is unique. Other keys keep their name.
    pub fn payload_columns(&self) -> Vec<String> {
        let mut reserved: HashSet<String> = HashSet::new();
        reserved.insert(ID_COLUMN.to_string());
        if self.include_vectors {
            reserved.extend((0..self.dimension).map(vector_column));
        }

        let mut taken: HashSet<String> = reserved.clone();
        taken.extend(
            self.payload_keys
                .iter()
                .filter(|key| !reserved.contains(*key))
                .cloned(),
        );

        self.payload_keys
            .iter()
            .map(|key| {
                if !reserved.contains(key) {
                    return key.clone();
                }
                let mut name = key.clone();
                while taken.contains(&name) {
                    name = format!("{}{}", PAYLOAD_COLUMN_PREFIX, name);
                }
                taken.insert(name.clone());
                name
            })
            .collect()
    }

    pub fn row(&self, point: &Point) -> Vec<String> {
        let mut row = Vec::with_capacity(1 + self.payload_keys.len() + self.dimension);
        row.push(point.id.clone());
        for key in &self.payload_keys {
            row.push(match point.payload.get(key) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            });
        }
        if self.include_vectors {
            let components = point.vector.as_deref().unwrap_or(&[]);
            for i in 0..self.dimension {
                row.push(components.get(i).map(|c| c.to_string()).unwrap_or_default());
            }
        }
        row
    }
}

/// A ready-to-consume export.
pub struct CollectionExport {
    pub file_name: String,
    pub stream: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for CollectionExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionExport")
            .field("file_name", &self.file_name)
            .finish()
    }
}

pub fn export_file_name(collection: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}.csv", collection, at.format("%Y%m%d_%H%M%S"))
}

/// Header pass.
pub async fn plan_export(
    driver: &BoundedDriver,
    collection: &str,
    include_vectors: bool,
) -> Result<ExportPlan> {
    let reported_dimension = driver.collection_meta(collection).await?.vector_size.unwrap_or(0) as usize;
    let probe_vectors = include_vectors && reported_dimension == 0;

    let mut scan = PageScan::new(
        Paginator::new(driver.clone(), collection),
        EXPORT_PAGE_SIZE,
        probe_vectors,
    );
    let mut payload_keys: IndexSet<String> = IndexSet::new();
    let mut dimension = reported_dimension;
    let mut scanned = 0u64;

    while let Some(fetched) = scan.next_page().await? {
        scanned += fetched.fetched;
        for point in &fetched.page.items {
            for key in point.payload.keys() {
                if !payload_keys.contains(key) {
                    payload_keys.insert(key.clone());
                }
            }
            if let Some(vector) = &point.vector {
                dimension = dimension.max(vector.len());
            }
        }
    }

    debug!(
        "export plan for '{}': {} payload columns, dimension {}",
        collection,
        payload_keys.len(),
        dimension
    );

    Ok(ExportPlan {
        collection: collection.to_string(),
        payload_keys: payload_keys.into_iter().collect(),
        dimension,
        include_vectors,
        scanned,
    })
}

fn encode_rows(rows: impl IntoIterator<Item = Vec<String>>) -> std::result::Result<Bytes, String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(&row).map_err(|e| e.to_string())?;
    }
    writer
        .into_inner()
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}

enum Stage {
    Header,
    Rows,
    Done,
}

struct RowPass {
    plan: ExportPlan,
    scan: PageScan,
    stage: Stage,
    rows_written: u64,
}

impl RowPass {
    fn fail(&mut self, message: String) -> BrowserError {
        self.stage = Stage::Done;
        warn!(
            "export of '{}' aborted after {} rows: {}",
            self.plan.collection, self.rows_written, message
        );
        BrowserError::PartialExportFailure {
            collection: self.plan.collection.clone(),
            rows_written: self.rows_written,
            message,
        }
    }
}

/// Row pass. The first chunk is always the header, so even an empty
/// collection produces a non-empty artifact. A failure after that point ends
/// the stream with a [`BrowserError::PartialExportFailure`] item.
pub fn export_stream(driver: BoundedDriver, plan: ExportPlan) -> BoxStream<'static, Result<Bytes>> {
    let scan = PageScan::new(
        Paginator::new(driver, plan.collection.clone()),
        EXPORT_PAGE_SIZE,
        plan.include_vectors,
    );
    let state = RowPass {
        plan,
        scan,
        stage: Stage::Header,
        rows_written: 0,
    };

    stream::unfold(state, |mut state| async move {
        match state.stage {
            Stage::Header => {
                state.stage = Stage::Rows;
                let item = encode_rows(std::iter::once(state.plan.header()))
                    .map_err(|message| state.fail(message));
                Some((item, state))
            }
            Stage::Rows => match state.scan.next_page().await {
                Ok(Some(fetched)) => {
                    let rows: Vec<Vec<String>> =
                        fetched.page.items.iter().map(|p| state.plan.row(p)).collect();
                    let count = rows.len() as u64;
                    let item = match encode_rows(rows) {
                        Ok(chunk) => {
                            state.rows_written += count;
                            Ok(chunk)
                        }
                        Err(message) => Err(state.fail(message)),
                    };
                    Some((item, state))
                }
                Ok(None) => {
                    info!(
                        "export of '{}' finished: {} rows",
                        state.plan.collection, state.rows_written
                    );
                    None
                }
                Err(e) => {
                    let err = state.fail(e.to_string());
                    Some((Err(err), state))
                }
            },
            Stage::Done => None,
        }
    })
    .boxed()
}
