// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Offset-addressable paging over any backend.
//!
//! Offset-native backends get the offset passed straight through. Cursor-native
//! backends have no random seek, so the paginator remembers the cursor found at
//! every page boundary it has crossed and walks forward from the nearest known
//! boundary when asked for an offset it has not visited yet.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::error::{BrowserError, Result};
use crate::core::normalizer::normalize_page;
use crate::core::types::{Page, Point};
use crate::drivers::{BoundedDriver, PageToken, PagingMode};

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Records per round trip when walking a cursor forward.
const SKIP_BATCH: usize = 1000;

pub fn validate_limit(limit: usize, max: usize) -> Result<()> {
    if limit == 0 || limit > max {
        return Err(BrowserError::InvalidLimit { limit, max });
    }
    Ok(())
}

/// A normalized page plus the bookkeeping scans need.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub page: Page<Point>,
    /// Records the backend returned, malformed ones included.
    pub fetched: u64,
    /// Malformed records dropped from `page.items`.
    pub skipped: u64,
    /// Position of each dropped record, as the number of items before it.
    pub skipped_at: Vec<usize>,
    /// The backend has nothing after this page.
    pub exhausted: bool,
}

/// Pager for one collection, scoped to a single logical request.
pub struct Paginator {
    driver: BoundedDriver,
    collection: String,
    cursors: BTreeMap<u64, PageToken>,
    end: Option<u64>,
}

impl Paginator {
    pub fn new(driver: BoundedDriver, collection: impl Into<String>) -> Self {
        let mut cursors = BTreeMap::new();
        cursors.insert(0, PageToken::Start);
        Self {
            driver,
            collection: collection.into(),
            cursors,
            end: None,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of page boundaries currently known.
    pub fn cached_boundaries(&self) -> usize {
        self.cursors.len()
    }

    pub async fn fetch_page(
        &mut self,
        offset: u64,
        limit: usize,
        include_payload: bool,
        include_vector: bool,
    ) -> Result<FetchedPage> {
        validate_limit(limit, MAX_PAGE_LIMIT)?;

        let total = self.driver.points_count(&self.collection).await?;

        let token = match self.driver.paging_mode() {
            PagingMode::Offset if offset == 0 => PageToken::Start,
            PagingMode::Offset => PageToken::Offset(offset),
            PagingMode::Cursor => match self.seek(offset).await? {
                Some(token) => token,
                None => return Ok(self.empty_page(offset, limit, total)),
            },
        };

        let raw = self
            .driver
            .fetch_page(&self.collection, &token, limit, include_payload, include_vector)
            .await?;
        let fetched = raw.records.len() as u64;
        let exhausted = raw.next.is_none() || fetched == 0;

        if self.driver.paging_mode() == PagingMode::Cursor {
            match raw.next {
                Some(next) if fetched > 0 => {
                    self.cursors.insert(offset + fetched, next);
                }
                _ => self.end = Some(offset + fetched),
            }
        }

        let normalized = normalize_page(
            raw.records,
            self.driver.reserved_payload_keys(),
            include_vector,
            &self.collection,
            offset,
        )?;

        Ok(FetchedPage {
            page: Page {
                items: normalized.points,
                total,
                limit,
                offset,
            },
            fetched,
            skipped: normalized.skipped,
            skipped_at: normalized.skipped_at,
            exhausted,
        })
    }

    /// Resolves `target` to a cursor, walking forward from the nearest cached
    /// boundary below it. `None` means the collection ends at or before `target`.
    async fn seek(&mut self, target: u64) -> Result<Option<PageToken>> {
        let (mut at, mut token) = match self.cursors.range(..=target).next_back() {
            Some((at, token)) => (*at, token.clone()),
            None => (0, PageToken::Start),
        };

        if at < target {
            debug!(
                "advancing cursor in '{}' from offset {} to {}",
                self.collection, at, target
            );
        }

        while at < target {
            if self.end.map_or(false, |end| at >= end) {
                return Ok(None);
            }
            let step = (target - at).min(SKIP_BATCH as u64) as usize;
            let raw = self
                .driver
                .fetch_page(&self.collection, &token, step, false, false)
                .await?;
            let walked = raw.records.len() as u64;

            match raw.next {
                Some(next) if walked > 0 => {
                    at += walked;
                    token = next;
                    self.cursors.insert(at, token.clone());
                }
                _ => {
                    self.end = Some(at + walked);
                    return Ok(None);
                }
            }
        }

        Ok(Some(token))
    }

    fn empty_page(&self, offset: u64, limit: usize, total: u64) -> FetchedPage {
        FetchedPage {
            page: Page {
                items: Vec::new(),
                total,
                limit,
                offset,
            },
            fetched: 0,
            skipped: 0,
            skipped_at: Vec::new(),
            exhausted: true,
        }
    }
}

/// Sequential walk over a whole collection, one page in flight at a time.
///
/// Stops when the backend reports no further page, returns an empty page, or
/// the offset reaches the count reported alongside the last page.
pub struct PageScan {
    paginator: Paginator,
    offset: u64,
    page_size: usize,
    include_vector: bool,
    done: bool,
}

impl PageScan {
    pub fn new(paginator: Paginator, page_size: usize, include_vector: bool) -> Self {
        Self {
            paginator,
            offset: 0,
            page_size,
            include_vector,
            done: false,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub async fn next_page(&mut self) -> Result<Option<FetchedPage>> {
        if self.done {
            return Ok(None);
        }

        let fetched = self
            .paginator
            .fetch_page(self.offset, self.page_size, true, self.include_vector)
            .await?;
        self.offset += fetched.fetched;

        if fetched.exhausted || self.offset >= fetched.page.total {
            self.done = true;
        }
        if fetched.fetched == 0 {
            return Ok(None);
        }
        Ok(Some(fetched))
    }
}
