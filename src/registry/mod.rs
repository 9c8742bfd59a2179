// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Instance Registry.
//!
//! Holds the configured instances and the driver handle built for each one.
//! Handles are created once, when an instance is registered or loaded, so
//! per-handle state such as a capability probe survives across requests.

pub mod store;

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::error::{BrowserError, Result};
use crate::core::types::InstanceDescriptor;
use crate::drivers::{BackendDriver, DriverFactory};

pub use store::{JsonFileStore, MemoryStore, RegistryStore};

struct RegisteredInstance {
    descriptor: InstanceDescriptor,
    driver: Arc<dyn BackendDriver>,
}

pub struct InstanceRegistry {
    instances: RwLock<Vec<RegisteredInstance>>,
    factory: Arc<dyn DriverFactory>,
    store: Arc<dyn RegistryStore>,
    /// Stored entries that could not be loaded. They are written back on
    /// every save so a bad entry is never silently erased from the file.
    retained: Vec<InstanceDescriptor>,
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry").finish_non_exhaustive()
    }
}

impl InstanceRegistry {
    /// Empty registry. Nothing is read from the store.
    pub fn new(factory: Arc<dyn DriverFactory>, store: Arc<dyn RegistryStore>) -> Self {
        Self {
            instances: RwLock::new(Vec::new()),
            factory,
            store,
            retained: Vec::new(),
        }
    }

    /// Registry populated from the store. Entries that are invalid or repeat
    /// an earlier name are not loaded, but stay in the store.
    pub async fn open(factory: Arc<dyn DriverFactory>, store: Arc<dyn RegistryStore>) -> Result<Self> {
        let mut registry = Self::new(factory, store);
        let loaded = registry.store.load_all().await?;

        let mut instances: Vec<RegisteredInstance> = Vec::new();
        let mut retained = Vec::new();
        for descriptor in loaded {
            if instances.iter().any(|i| i.descriptor.name == descriptor.name) {
                warn!(
                    "instance '{}' appears twice in store; keeping the later entry in the file but not loading it",
                    descriptor.name
                );
                retained.push(descriptor);
                continue;
            }
            match registry.connect(&descriptor) {
                Ok(driver) => instances.push(RegisteredInstance { descriptor, driver }),
                Err(e) => {
                    warn!(
                        "instance '{}' not loaded, kept in store unchanged: {}",
                        descriptor.name, e
                    );
                    retained.push(descriptor);
                }
            }
        }
        info!(
            "instance registry opened with {} instances ({} not loaded)",
            instances.len(),
            retained.len()
        );

        registry.instances = RwLock::new(instances);
        registry.retained = retained;
        Ok(registry)
    }

    /// What the store should hold: loaded instances first, then retained entries.
    fn snapshot(&self, instances: &[RegisteredInstance]) -> Vec<InstanceDescriptor> {
        instances
            .iter()
            .map(|i| i.descriptor.clone())
            .chain(self.retained.iter().cloned())
            .collect()
    }

    pub fn validate(descriptor: &InstanceDescriptor) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(BrowserError::InvalidConfig("instance name must not be empty".to_string()));
        }
        if !(descriptor.url.starts_with("http://") || descriptor.url.starts_with("https://")) {
            return Err(BrowserError::InvalidConfig(format!(
                "instance url must start with http:// or https://, got '{}'",
                descriptor.url
            )));
        }
        Ok(())
    }

    /// Builds a driver handle for `descriptor` without registering it.
    pub fn connect(&self, descriptor: &InstanceDescriptor) -> Result<Arc<dyn BackendDriver>> {
        Self::validate(descriptor)?;
        self.factory.create(descriptor).map_err(|e| {
            BrowserError::InvalidConfig(format!("instance '{}': {}", descriptor.name, e))
        })
    }

    pub async fn register(&self, descriptor: InstanceDescriptor) -> Result<()> {
        let driver = self.connect(&descriptor)?;
        self.insert(descriptor, driver).await
    }

    /// Registers an already built handle and persists the new instance list.
    pub async fn insert(&self, descriptor: InstanceDescriptor, driver: Arc<dyn BackendDriver>) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.iter().any(|i| i.descriptor.name == descriptor.name) {
            return Err(BrowserError::DuplicateName(descriptor.name));
        }

        let name = descriptor.name.clone();
        instances.push(RegisteredInstance { descriptor, driver });
        let snapshot = self.snapshot(&instances);
        if let Err(e) = self.store.save_all(&snapshot).await {
            instances.pop();
            return Err(e);
        }

        info!("registered instance '{}'", name);
        Ok(())
    }

    pub async fn resolve(&self, name: &str) -> Result<Arc<dyn BackendDriver>> {
        self.instances
            .read()
            .await
            .iter()
            .find(|i| i.descriptor.name == name)
            .map(|i| Arc::clone(&i.driver))
            .ok_or_else(|| BrowserError::NotFound(format!("instance '{}'", name)))
    }

    pub async fn descriptor(&self, name: &str) -> Result<InstanceDescriptor> {
        self.instances
            .read()
            .await
            .iter()
            .find(|i| i.descriptor.name == name)
            .map(|i| i.descriptor.clone())
            .ok_or_else(|| BrowserError::NotFound(format!("instance '{}'", name)))
    }

    /// Removes an instance. Returns whether it was present; removing an
    /// unknown name is not an error.
    pub async fn unregister(&self, name: &str) -> Result<bool> {
        let mut instances = self.instances.write().await;
        let Some(position) = instances.iter().position(|i| i.descriptor.name == name) else {
            return Ok(false);
        };

        let removed = instances.remove(position);
        let snapshot = self.snapshot(&instances);
        if let Err(e) = self.store.save_all(&snapshot).await {
            instances.insert(position, removed);
            return Err(e);
        }

        info!("removed instance '{}'", name);
        Ok(true)
    }

    /// Descriptors in registration order.
    pub async fn list(&self) -> Vec<InstanceDescriptor> {
        self.instances
            .read()
            .await
            .iter()
            .map(|i| i.descriptor.clone())
            .collect()
    }
}
