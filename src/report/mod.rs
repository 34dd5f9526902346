//! Report composition
//!
//! [`ReportComposer`] turns an [`AnalysisResult`](crate::models::AnalysisResult)
//! into report text and a DICOM Basic Text SR document ([`sr`]) stored next to
//! the received objects.

use thiserror::Error;

pub mod composer;
pub mod sr;

pub use composer::ReportComposer;

#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("failed to read source object: {0}")]
    Source(String),

    #[error("failed to encode structured report: {0}")]
    Encode(String),

    #[error("failed to store structured report: {0}")]
    Store(String),
}
