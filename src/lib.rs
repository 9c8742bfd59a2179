// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod api;
pub mod browser;
pub mod core;
pub mod drivers;
pub mod export;
pub mod registry;
pub mod search;

pub use browser::{Browser, BrowserConfig};
pub use crate::core::error::{BrowserError, Result};
