//! DIMSE Status Code Mapping
//!
//! Converts the outcome of handling a received object into the status sent
//! back in the C-STORE-RSP, as defined in DICOM PS3.4:
//! - `0x0000`: Success
//! - `0x0110`: Processing failure
//!
//! Every refusal maps to a processing failure; the sender learns nothing
//! more specific, the cause is in the log.

use crate::models::IncomingObject;
use crate::pipeline::IngestError;
use dimse::StoreStatus;

/// Maps an ingest outcome to the C-STORE reply status
pub fn ingest_result_to_status(result: &Result<IncomingObject, IngestError>) -> StoreStatus {
    match result {
        Ok(_) => StoreStatus::Success,
        Err(e) => ingest_error_to_status(e),
    }
}

/// Maps an [`IngestError`] to a DIMSE status
pub fn ingest_error_to_status(error: &IngestError) -> StoreStatus {
    match error {
        IngestError::MissingMetadata(_)
        | IngestError::UnsupportedModality(_)
        | IngestError::InvalidIdentifier(_)
        | IngestError::Payload(_)
        | IngestError::Persistence(_)
        | IngestError::State(_)
        | IngestError::Pipeline(_) => StoreStatus::ProcessingFailure,
    }
}
