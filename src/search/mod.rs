// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod pagination;
pub mod similarity;
pub mod text;

pub use pagination::{validate_limit, FetchedPage, PageScan, Paginator, MAX_PAGE_LIMIT};
pub use similarity::similarity_search;
pub use text::{fold_case, Matcher, TextSearch, MAX_SEARCH_RESULTS, SEARCH_PAGE_SIZE};
