// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use tracing::{debug, info};

use crate::core::canonical::canonical_payload;
use crate::core::error::Result;
use crate::core::types::{Payload, SearchOutcome};
use crate::drivers::BoundedDriver;
use crate::search::pagination::{validate_limit, FetchedPage, PageScan, Paginator};

/// Records fetched per round trip while scanning. Independent of the result limit.
pub const SEARCH_PAGE_SIZE: usize = 256;

pub const MAX_SEARCH_RESULTS: usize = 10_000;

/// Per-character lowercase mapping. Unlike `str::to_lowercase` it ignores
/// context (final sigma), so folding a substring always yields a substring of
/// the folded text.
pub fn fold_case(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).collect()
}

/// Plain substring test against a payload's canonical text.
#[derive(Debug, Clone)]
pub struct Matcher {
    needle: String,
    case_sensitive: bool,
}

impl Matcher {
    pub fn new(needle: &str, case_sensitive: bool) -> Self {
        let needle = if case_sensitive {
            needle.to_string()
        } else {
            fold_case(needle)
        };
        Self {
            needle,
            case_sensitive,
        }
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        let text = canonical_payload(payload);
        if self.case_sensitive {
            text.contains(&self.needle)
        } else {
            fold_case(&text).contains(&self.needle)
        }
    }
}

/// A substring search over every payload in a collection.
///
/// Points are visited in backend order and each one matches at most once.
/// The scan stops as soon as `max_results` matches are collected, so the
/// counters in the returned [`SearchOutcome`] cover only the part of the
/// collection scanned before that point: with a small `max_results` against a
/// large collection `total_matches` is not the global match count. Callers
/// that need the exact global count must pass a `max_results` at least as
/// large as the collection.
#[derive(Debug, Clone)]
pub struct TextSearch {
    matcher: Matcher,
    max_results: usize,
    page_size: usize,
}

impl TextSearch {
    pub fn new(needle: &str, case_sensitive: bool, max_results: usize) -> Result<Self> {
        validate_limit(max_results, MAX_SEARCH_RESULTS)?;
        Ok(Self {
            matcher: Matcher::new(needle, case_sensitive),
            max_results,
            page_size: SEARCH_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub async fn run(&self, driver: BoundedDriver, collection: &str) -> Result<SearchOutcome> {
        let mut scan = PageScan::new(Paginator::new(driver, collection), self.page_size, false);
        let mut results = Vec::new();
        let mut total_scanned = 0u64;

        'pages: while let Some(fetched) = scan.next_page().await? {
            let FetchedPage {
                page,
                skipped,
                skipped_at,
                ..
            } = fetched;
            let page_len = page.items.len() as u64;

            for (index, point) in page.items.into_iter().enumerate() {
                if self.matcher.matches(&point.payload) {
                    results.push(point);
                    if results.len() >= self.max_results {
                        // Malformed records after the stop point were never examined.
                        let skipped_before = skipped_at.iter().filter(|&&at| at <= index).count();
                        total_scanned += (index + 1 + skipped_before) as u64;
                        debug!("text search in '{}' reached {} results", collection, self.max_results);
                        break 'pages;
                    }
                }
            }
            total_scanned += page_len + skipped;
        }

        info!(
            "text search in '{}': {} matches over {} scanned",
            collection,
            results.len(),
            total_scanned
        );

        Ok(SearchOutcome {
            total_matches: results.len() as u64,
            results,
            total_scanned,
        })
    }
}
