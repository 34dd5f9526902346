use std::sync::Arc;
use thiserror::Error;

use crate::models::ObjectState;
use crate::pipeline::ObjectLocks;
use crate::state::{ObjectRegistry, StateError};
use crate::storage::{StorageBackend, StorageError};

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{id}' is {state}; only finished objects can be released")]
    NotTerminal { id: String, state: ObjectState },

    #[error("object '{id}' changed since generation {generation}")]
    Superseded { id: String, generation: u64 },

    #[error("failed to remove payload: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupOutcome {
    Released,
    AlreadyReleased,
}

/// Releases the transient payload of finished objects
///
/// Only `incoming/<id>.dcm` is removed; the report document stays so the
/// report can still be resent.
#[derive(Clone, Debug)]
pub struct Cleanup {
    registry: ObjectRegistry,
    storage: Arc<dyn StorageBackend>,
    payload_locks: ObjectLocks,
}

impl Cleanup {
    pub fn new(registry: ObjectRegistry, storage: Arc<dyn StorageBackend>, payload_locks: ObjectLocks) -> Self {
        Self {
            registry,
            storage,
            payload_locks,
        }
    }

    /// Release the payload of `object_id` as stored for `generation`
    pub async fn release(&self, object_id: &str, generation: u64) -> Result<CleanupOutcome, CleanupError> {
        let _payload = self.payload_locks.lock(object_id).await;

        let record = self
            .registry
            .get(object_id)?
            .ok_or_else(|| CleanupError::NotFound(object_id.to_string()))?;
        let object = record.object;
        if object.generation != generation {
            return Err(CleanupError::Superseded {
                id: object_id.to_string(),
                generation,
            });
        }
        if !object.state.is_terminal() {
            return Err(CleanupError::NotTerminal {
                id: object_id.to_string(),
                state: object.state,
            });
        }
        if object.storage_released {
            tracing::debug!(object_id, "Payload already released");
            return Ok(CleanupOutcome::AlreadyReleased);
        }

        let removed = self.storage.remove_str(&object.storage_key).await?;
        if !removed {
            tracing::warn!(object_id, key = %object.storage_key, "Payload was already missing from storage");
        }
        self.registry.mark_released(object_id, generation)?;
        tracing::info!(object_id, state = %object.state, "🧹 Payload released");
        Ok(CleanupOutcome::Released)
    }
}
