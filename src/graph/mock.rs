//! In-memory annotation store for testing the engine.
//!
//! Records every export it receives instead of persisting it.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::export::AnalyticsExport;
use super::writer::AnnotationStore;

/// Mock implementation of `AnnotationStore`.
#[derive(Default)]
pub struct MockAnnotationStore {
    pub exports: RwLock<Vec<AnalyticsExport>>,
    fail_writes: bool,
}

impl MockAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub async fn last(&self) -> Option<AnalyticsExport> {
        self.exports.read().await.last().cloned()
    }
}

#[async_trait]
impl AnnotationStore for MockAnnotationStore {
    async fn write_export(&self, export: &AnalyticsExport) -> Result<()> {
        if self.fail_writes {
            bail!("mock store rejected export {}", export.run_id);
        }
        self.exports.write().await.push(export.clone());
        Ok(())
    }
}
