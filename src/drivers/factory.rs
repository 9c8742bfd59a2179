// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::time::Duration;

use crate::core::types::{BackendType, InstanceDescriptor};
use crate::drivers::{BackendDriver, ChromaDriver, DriverError, QdrantDriver};

/// Builds a driver handle for a descriptor. Must not perform I/O: handles are
/// built when instances are loaded, before anyone talks to the backend.
pub trait DriverFactory: Send + Sync {
    fn create(&self, descriptor: &InstanceDescriptor) -> Result<Arc<dyn BackendDriver>, DriverError>;
}

/// Factory for the REST drivers.
#[derive(Debug, Clone)]
pub struct HttpDriverFactory {
    timeout: Duration,
}

impl HttpDriverFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpDriverFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl DriverFactory for HttpDriverFactory {
    fn create(&self, descriptor: &InstanceDescriptor) -> Result<Arc<dyn BackendDriver>, DriverError> {
        let driver: Arc<dyn BackendDriver> = match descriptor.backend {
            BackendType::Qdrant => Arc::new(QdrantDriver::new(descriptor, self.timeout)?),
            BackendType::Chromadb => Arc::new(ChromaDriver::new(descriptor, self.timeout)?),
        };
        Ok(driver)
    }
}
