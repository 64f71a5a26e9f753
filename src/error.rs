//! Run-level failure kinds.
//!
//! Per-item failures inside a phase never surface here; they are counted in the
//! phase reports. These variants are the conditions that abort a whole run.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineReport;

/// Conditions that abort a document run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be read.
    #[error("cannot read source {path:?}: {reason}")]
    Input { path: PathBuf, reason: String },

    /// A required collaborator could not be constructed.
    #[error("failed to initialize {component}: {reason}")]
    Initialization {
        component: &'static str,
        reason: String,
    },

    /// Upstream chunk production failed.
    #[error("failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    /// The embedding provider could not be invoked at all.
    #[error("embedding provider failed: {0}")]
    EmbeddingProvider(String),

    /// The provider returned a batch that does not line up with the input.
    #[error("embedding provider returned {returned} records for {expected} inputs")]
    EmbeddingContract { expected: usize, returned: usize },

    /// Inserts were attempted but none succeeded.
    #[error("no nodes persisted ({failed} of {attempted} insert attempts failed)")]
    NothingPersisted { attempted: usize, failed: usize },

    /// Another run for the same document is still in flight.
    #[error("document {0} is already being processed")]
    DocumentBusy(String),
}

/// A fatal error together with everything the run had counted before it stopped.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineFailure {
    #[source]
    pub error: PipelineError,
    pub report: PipelineReport,
}

impl PipelineFailure {
    pub fn new(error: PipelineError, report: PipelineReport) -> Self {
        Self { error, report }
    }
}
