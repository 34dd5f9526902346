use async_trait::async_trait;
use dimse::{StoreHandler, StoreRequest, StoreStatus};
use thiserror::Error;

use crate::adapters::dimse::status_mapper;
use crate::models::{IncomingObject, Modality};
use crate::pipeline::{AnalysisPipeline, PipelineContext, PipelineError};
use crate::state::StateError;
use crate::storage::StorageError;

/// Longest identifier accepted, matching the DICOM UI value limit
const MAX_IDENTIFIER_LEN: usize = 64;

/// Why a received object was refused
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing mandatory attribute {0}")]
    MissingMetadata(&'static str),

    #[error("unsupported modality '{0}'")]
    UnsupportedModality(String),

    #[error("identifier '{0}' is not a valid UID")]
    InvalidIdentifier(String),

    #[error("unreadable payload: {0}")]
    Payload(String),

    #[error("failed to persist payload: {0}")]
    Persistence(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Accepts C-STORE requests: validate, persist, register, enqueue
#[derive(Clone)]
pub struct IngestHandler {
    ctx: PipelineContext,
    pipeline: AnalysisPipeline,
}

impl IngestHandler {
    pub fn new(pipeline: AnalysisPipeline) -> Self {
        Self {
            ctx: pipeline.context().clone(),
            pipeline,
        }
    }

    /// Handle one received object
    ///
    /// On success the object is registered in `Received` and its chain is
    /// scheduled. Nothing is registered when validation or persistence fails.
    pub async fn ingest(&self, request: StoreRequest) -> Result<IncomingObject, IngestError> {
        let metadata = request.dataset.metadata();
        let id = metadata
            .sop_instance_uid
            .clone()
            .ok_or(IngestError::MissingMetadata("SOPInstanceUID"))?;
        let modality_code = metadata
            .modality
            .clone()
            .ok_or(IngestError::MissingMetadata("Modality"))?;
        let patient_id = metadata
            .patient_id
            .clone()
            .ok_or(IngestError::MissingMetadata("PatientID"))?;

        let modality =
            Modality::from_code(&modality_code).ok_or(IngestError::UnsupportedModality(modality_code))?;
        if !is_valid_identifier(&id) {
            return Err(IngestError::InvalidIdentifier(id));
        }

        let mut object = IncomingObject::new(id, modality, patient_id);
        object.study_instance_uid = metadata.study_instance_uid.clone();
        object.series_instance_uid = metadata.series_instance_uid.clone();
        object.sop_class_uid = metadata.sop_class_uid.clone();

        let bytes = request
            .dataset
            .to_bytes()
            .await
            .map_err(|e| IngestError::Payload(e.to_string()))?;

        let (object, displaced) = {
            let _payload = self.ctx.payload_locks.lock(&object.id).await;
            self.ctx
                .storage
                .write_file_str(&object.storage_key, &bytes)
                .await?;
            match self.ctx.registry.register_received(object.clone()) {
                Ok(registered) => registered,
                Err(e) => {
                    self.discard_unregistered(&object).await;
                    return Err(e.into());
                }
            }
        };
        let duplicate = displaced.is_some();
        if let Some(report) = displaced.and_then(|record| record.report) {
            self.ctx.composer.discard(&object.id, &report.document_key).await;
        }

        tracing::info!(
            object_id = %object.id,
            modality = %object.modality,
            calling_aet = %request.calling_aet,
            size = bytes.len(),
            duplicate,
            "📥 Object received"
        );

        if let Err(e) = self.pipeline.enqueue(&object.id, object.generation).await {
            self.abandon(&object, &e).await;
            return Err(e.into());
        }
        Ok(object)
    }

    /// Remove a payload whose registration failed
    ///
    /// A payload still owned by an unreleased earlier transfer is kept.
    async fn discard_unregistered(&self, object: &IncomingObject) {
        match self.ctx.registry.get(&object.id) {
            Ok(Some(record)) if !record.object.storage_released => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(object_id = %object.id, "Keeping unregistered payload: {}", e);
                return;
            }
        }
        if let Err(e) = self.ctx.storage.remove_str(&object.storage_key).await {
            tracing::warn!(object_id = %object.id, "Could not remove unregistered payload: {}", e);
        }
    }

    /// Fail and release an object the pipeline would not take
    async fn abandon(&self, object: &IncomingObject, reason: &PipelineError) {
        if let Err(e) = self
            .ctx
            .registry
            .fail(&object.id, object.generation, &reason.to_string())
        {
            tracing::warn!(object_id = %object.id, "Could not fail refused object: {}", e);
            return;
        }
        if let Err(e) = self.ctx.cleanup.release(&object.id, object.generation).await {
            tracing::warn!(object_id = %object.id, "Cleanup of refused object failed: {}", e);
        }
    }
}

#[async_trait]
impl StoreHandler for IngestHandler {
    async fn store(&self, request: StoreRequest) -> StoreStatus {
        let sop_instance = request.dataset.metadata().sop_instance_uid.clone();
        let result = self.ingest(request).await;
        if let Err(e) = &result {
            tracing::error!(
                object_id = sop_instance.as_deref().unwrap_or("<unknown>"),
                "Object refused: {}",
                e
            );
        }
        status_mapper::ingest_result_to_status(&result)
    }
}

/// UID-safe characters only, so the identifier can name a storage key
fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
