//! Report forwarding
//!
//! Every send opens a fresh association to the configured destination through
//! a [`ReportTransport`]. The outcome is always recorded on the report as a
//! [`ForwardingAttempt`]; a failed delivery leaves the object in
//! `ReportGenerated` so it can be resent.

use async_trait::async_trait;
use bytes::Bytes;
use dimse::{DatasetMetadata, DatasetStream, DimseError, DimseScu, RemoteNode};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{ForwardingAttempt, ForwardingFailure, ObjectState};
use crate::state::{ObjectRecord, ObjectRegistry, StateError};
use crate::storage::StorageBackend;

/// A failed delivery, already classified
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct DeliveryError {
    pub kind: ForwardingFailure,
    pub detail: String,
}

impl DeliveryError {
    pub fn new(kind: ForwardingFailure, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Map a DIMSE error onto the three delivery failure kinds
pub fn classify(err: &DimseError) -> ForwardingFailure {
    if err.is_session_refused() {
        return ForwardingFailure::SessionRefused;
    }
    match err {
        DimseError::StoreRejected { .. } => ForwardingFailure::TransferRejected,
        _ => ForwardingFailure::TransportFailure,
    }
}

/// Sends one encoded document to a remote node
#[async_trait]
pub trait ReportTransport: Send + Sync {
    async fn send(&self, destination: &RemoteNode, document: DatasetStream) -> Result<(), DeliveryError>;
}

#[async_trait]
impl ReportTransport for DimseScu {
    async fn send(&self, destination: &RemoteNode, document: DatasetStream) -> Result<(), DeliveryError> {
        self.store(destination, &document)
            .await
            .map_err(|e| DeliveryError::new(classify(&e), e.to_string()))
    }
}

/// Errors that stop a send before anything reaches the destination
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{id}' is {state}; only generated reports can be forwarded")]
    NotForwardable { id: String, state: ObjectState },

    #[error("report document for '{id}' unavailable: {detail}")]
    Document { id: String, detail: String },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Result of one send
#[derive(Debug, Clone)]
pub struct ForwardingOutcome {
    pub attempt: ForwardingAttempt,
    /// Record after the attempt was appended
    pub record: ObjectRecord,
}

#[derive(Clone)]
pub struct ForwardingClient {
    registry: ObjectRegistry,
    storage: Arc<dyn StorageBackend>,
    transport: Arc<dyn ReportTransport>,
    destination: RemoteNode,
}

impl ForwardingClient {
    pub fn new(
        registry: ObjectRegistry,
        storage: Arc<dyn StorageBackend>,
        transport: Arc<dyn ReportTransport>,
        destination: RemoteNode,
    ) -> Self {
        Self {
            registry,
            storage,
            transport,
            destination,
        }
    }

    pub fn destination(&self) -> &RemoteNode {
        &self.destination
    }

    /// Send the object's report and record the attempt
    ///
    /// Delivery failures are not errors here; they come back as a failed
    /// attempt in the outcome.
    #[tracing::instrument(skip(self), fields(destination = %self.destination.descriptor()))]
    pub async fn forward(&self, object_id: &str, generation: u64) -> Result<ForwardingOutcome, ForwardingError> {
        let record = self
            .registry
            .get(object_id)?
            .ok_or_else(|| ForwardingError::NotFound(object_id.to_string()))?;

        let state = record.object.state;
        let report = match (&record.report, state) {
            (Some(report), ObjectState::ReportGenerated | ObjectState::Forwarded) => report,
            _ => {
                return Err(ForwardingError::NotForwardable {
                    id: object_id.to_string(),
                    state,
                })
            }
        };

        let document = self
            .storage
            .read_file_str(&report.document_key)
            .await
            .map_err(|e| {
                tracing::error!(object_id, "Report document unreadable: {}", e);
                ForwardingError::Document {
                    id: object_id.to_string(),
                    detail: e.to_string(),
                }
            })?;

        let mut metadata = DatasetMetadata::new();
        metadata.sop_instance_uid = Some(report.sr_instance_uid.clone());
        let dataset = DatasetStream::from_bytes(Bytes::from(document), metadata);

        let descriptor = self.destination.descriptor();
        let attempt = match self.transport.send(&self.destination, dataset).await {
            Ok(()) => {
                tracing::info!(object_id, "📤 Report forwarded to {}", descriptor);
                ForwardingAttempt::success(descriptor)
            }
            Err(e) => {
                tracing::warn!(
                    object_id,
                    kind = %e.kind,
                    "Forwarding to {} failed: {}",
                    descriptor,
                    e.detail
                );
                ForwardingAttempt::failure(descriptor, e.kind, e.detail)
            }
        };

        let record = self
            .registry
            .record_attempt(object_id, generation, attempt.clone())?;
        Ok(ForwardingOutcome { attempt, record })
    }
}
