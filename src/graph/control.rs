//! Cooperative cancellation and progress reporting.
//!
//! Long-running loops (Brandes, the Leiden passes, PPR power iteration) call
//! [`RunControl::checkpoint`] between outer iterations. The check is a relaxed
//! atomic load, so a caller on another thread can abort a run by flipping the
//! flag; nothing is preempted.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, AnalyticsResult};

/// Pipeline stage reported in progress events and cancellation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Build,
    KCore,
    Betweenness,
    Components,
    Communities,
    PersonalizedPageRank,
    Ranking,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::KCore => write!(f, "k-core"),
            Self::Betweenness => write!(f, "betweenness"),
            Self::Components => write!(f, "components"),
            Self::Communities => write!(f, "community detection"),
            Self::PersonalizedPageRank => write!(f, "personalized pagerank"),
            Self::Ranking => write!(f, "ranking"),
            Self::Export => write!(f, "export"),
        }
    }
}

/// A progress tick: `completed` out of `total` outer iterations of `stage`.
///
/// For iterative stages `total` is the iteration budget, so a converging run
/// finishes below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub stage: Stage,
    pub completed: usize,
    pub total: usize,
}

/// Borrowed cancellation flag and progress sink for one run.
///
/// `Copy` so the same control can be handed to analyses running in parallel.
#[derive(Clone, Copy, Default)]
pub struct RunControl<'a> {
    cancel: Option<&'a AtomicBool>,
    progress: Option<&'a (dyn Fn(Progress) + Sync)>,
}

impl<'a> RunControl<'a> {
    /// No cancellation, no progress reporting.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_progress(mut self, sink: &'a (dyn Fn(Progress) + Sync)) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Report progress, then fail with [`AnalyticsError::Cancelled`] if the
    /// flag is raised.
    pub fn checkpoint(&self, stage: Stage, completed: usize, total: usize) -> AnalyticsResult<()> {
        if let Some(sink) = self.progress {
            sink(Progress {
                stage,
                completed,
                total,
            });
        }
        if self.is_cancelled() {
            tracing::info!("{} cancelled at {}/{}", stage, completed, total);
            return Err(AnalyticsError::Cancelled {
                stage,
                completed,
                total,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for RunControl<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControl")
            .field("cancellable", &self.cancel.is_some())
            .field("reports_progress", &self.progress.is_some())
            .finish()
    }
}
