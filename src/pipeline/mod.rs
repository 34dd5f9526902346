//! Receive → analyze → compose → forward
//!
//! [`handler::IngestHandler`] answers C-STORE requests and enqueues objects
//! on the [`executor::AnalysisPipeline`], which runs one chain per object on
//! a bounded worker pool. [`cleanup::Cleanup`] releases transient storage once
//! a chain ends in a terminal state.

pub mod cleanup;
pub mod context;
pub mod executor;
pub mod handler;


use std::time::Duration;
use thiserror::Error;

use crate::analyzer::{AnalyzerError, DecodeError};

// Re-exports for convenience
pub use cleanup::{Cleanup, CleanupError, CleanupOutcome};
pub use context::{ObjectLocks, PipelineContext};
pub use executor::{AnalysisPipeline, PipelineError};
pub use handler::{IngestError, IngestHandler};

/// Why an object's analysis failed
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read stored object: {0}")]
    Storage(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error("analyzer returned no result")]
    NoResult,

    #[error("analyzer exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("analysis task failed: {0}")]
    Task(String),
}
