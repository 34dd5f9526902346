pub mod analysis;
pub mod object;
pub mod report;

pub use analysis::{AnalysisResult, Finding, FindingError, Region, Severity};
pub use object::{IncomingObject, Modality, ObjectState, ObjectStatus};
pub use report::{
    AttemptOutcome, ForwardingAttempt, ForwardingFailure, ForwardingState, Report, ReportContent,
    ReportSection,
};
