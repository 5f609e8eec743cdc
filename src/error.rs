//! Error types for the analytics core.
//!
//! Only caller contract violations and cooperative cancellation are errors.
//! Empty graphs, skipped centrality and non-convergence are normal outcomes
//! reported through the result types.

use thiserror::Error;

use crate::graph::control::Stage;

/// Errors raised by the graph analytics operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    /// A parameter is outside its valid domain. Raised before any computation.
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A personalization seed does not name a node of the graph.
    #[error("unknown seed node `{0}`")]
    UnknownSeed(String),

    /// The caller raised the cancellation flag while a stage was running.
    #[error("{stage} cancelled after {completed} of {total} steps")]
    Cancelled {
        stage: Stage,
        completed: usize,
        total: usize,
    },
}

impl AnalyticsError {
    pub(crate) fn invalid(
        name: &'static str,
        value: impl ToString,
        reason: &'static str,
    ) -> Self {
        Self::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }
}

pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;
