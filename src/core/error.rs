// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Error taxonomy surfaced by every browser operation.
//!
//! Driver failures never leak unannotated: they are wrapped with the logical
//! operation and the collection (or instance) they were issued against.

use thiserror::Error;

use crate::drivers::DriverError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrowserError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Instance with this name already exists: {0}")]
    DuplicateName(String),

    #[error("Invalid limit {limit}: must be between 1 and {max}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("Dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: u64, actual: usize },

    #[error("Backend unavailable during {operation} on '{target}': {message}")]
    BackendUnavailable {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("Backend timed out during {operation} on '{target}'")]
    BackendTimeout {
        operation: &'static str,
        target: String,
    },

    #[error("Backend error during {operation} on '{target}': {message}")]
    Backend {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("Corrupt page in '{collection}' at offset {offset}")]
    CorruptPage { collection: String, offset: u64 },

    #[error("Export of '{collection}' failed after {rows_written} rows: {message}")]
    PartialExportFailure {
        collection: String,
        rows_written: u64,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

impl BrowserError {
    /// Wraps a driver failure with the operation and target it belongs to.
    pub fn from_driver(operation: &'static str, target: &str, err: DriverError) -> Self {
        let target = target.to_string();
        match err {
            DriverError::NotFound(what) => {
                BrowserError::NotFound(format!("{} (during {} on '{}')", what, operation, target))
            }
            DriverError::Timeout => BrowserError::BackendTimeout { operation, target },
            DriverError::Unavailable(message) => BrowserError::BackendUnavailable {
                operation,
                target,
                message,
            },
            DriverError::Rejected { status, message } => BrowserError::Backend {
                operation,
                target,
                message: format!("status {}: {}", status, message),
            },
            DriverError::Protocol(message) => BrowserError::Backend {
                operation,
                target,
                message: format!("malformed response: {}", message),
            },
        }
    }

    /// Conditions a caller may retry once with backoff. Nothing here retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::BackendUnavailable { .. } | BrowserError::BackendTimeout { .. }
        )
    }
}
