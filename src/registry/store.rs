// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::error::{BrowserError, Result};
use crate::core::types::InstanceDescriptor;

/// Load-all/save-all persistence for registered instances.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<InstanceDescriptor>>;
    async fn save_all(&self, instances: &[InstanceDescriptor]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstanceFile {
    instances: Vec<InstanceDescriptor>,
}

/// Keeps instances in a pretty-printed JSON file of the form
/// `{"instances": [...]}`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(".backup")
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<InstanceDescriptor>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BrowserError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        match serde_json::from_slice::<InstanceFile>(&content) {
            Ok(file) => {
                info!(
                    "loaded {} instances from {}",
                    file.instances.len(),
                    self.path.display()
                );
                Ok(file.instances)
            }
            Err(e) => {
                error!("instance file {} is not valid: {}", self.path.display(), e);
                let backup = self.backup_path();
                match tokio::fs::copy(&self.path, &backup).await {
                    Ok(_) => warn!("kept unreadable instance file as {}", backup.display()),
                    Err(copy_err) => warn!("could not back up instance file: {}", copy_err),
                }
                Ok(Vec::new())
            }
        }
    }

    async fn save_all(&self, instances: &[InstanceDescriptor]) -> Result<()> {
        let file = InstanceFile {
            instances: instances.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&file)
            .map_err(|e| BrowserError::Persistence(format!("failed to encode instances: {}", e)))?;

        let temp = self.sibling(".tmp");
        if let Err(e) = tokio::fs::write(&temp, &content).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(BrowserError::Persistence(format!(
                "failed to write {}: {}",
                temp.display(),
                e
            )));
        }
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            BrowserError::Persistence(format!("failed to replace {}: {}", self.path.display(), e))
        })
    }
}

/// Store that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: Mutex<Vec<InstanceDescriptor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(instances: Vec<InstanceDescriptor>) -> Self {
        Self {
            instances: Mutex::new(instances),
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<InstanceDescriptor>> {
        Ok(self.instances.lock().await.clone())
    }

    async fn save_all(&self, instances: &[InstanceDescriptor]) -> Result<()> {
        *self.instances.lock().await = instances.to_vec();
        Ok(())
    }
}
