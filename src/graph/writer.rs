//! Annotation sink.
//!
//! [`AnnotationStore`] is the boundary to the persistence collaborator. The
//! bundled [`JsonFileStore`] writes the whole export as one pretty-printed JSON
//! document; re-running overwrites the previous file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::export::AnalyticsExport;

/// Receives the export of each completed run.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    async fn write_export(&self, export: &AnalyticsExport) -> Result<()>;
}

/// Writes exports to a JSON file.
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

    /// Read back the last export written to this file.
    pub async fn load(&self) -> Result<AnalyticsExport> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse export in {}", self.path.display()))
    }
}

#[async_trait]
impl AnnotationStore for JsonFileStore {
    async fn write_export(&self, export: &AnalyticsExport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = export.to_json().context("Failed to serialize export")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        debug!(
            path = %self.path.display(),
            nodes = export.nodes.len(),
            "Wrote analytics export"
        );
        Ok(())
    }
}
