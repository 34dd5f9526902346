//! Query surface for external collaborators
//!
//! [`Relay`] exposes object status, recent objects, reports and manual
//! report resends. It shares the pipeline's registry and per-object locks, so
//! a resend never overlaps a running chain for the same object.

use thiserror::Error;

use crate::forward::{ForwardingClient, ForwardingError};
use crate::models::{ForwardingAttempt, IncomingObject, ObjectState, ObjectStatus, Report};
use crate::pipeline::{Cleanup, ObjectLocks, PipelineContext};
use crate::state::{ObjectRegistry, StateError};

#[derive(Debug, Error)]
pub enum ResendError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{id}' is {state}; only generated or forwarded reports can be resent")]
    NotEligible { id: String, state: ObjectState },

    #[error(transparent)]
    Forwarding(ForwardingError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<ForwardingError> for ResendError {
    fn from(err: ForwardingError) -> Self {
        match err {
            ForwardingError::NotFound(id) => ResendError::NotFound(id),
            ForwardingError::NotForwardable { id, state } => ResendError::NotEligible { id, state },
            ForwardingError::State(e) => ResendError::State(e),
            other => ResendError::Forwarding(other),
        }
    }
}

#[derive(Clone)]
pub struct Relay {
    registry: ObjectRegistry,
    forwarder: ForwardingClient,
    cleanup: Cleanup,
    locks: ObjectLocks,
}

impl Relay {
    pub fn new(ctx: &PipelineContext) -> Self {
        Self {
            registry: ctx.registry.clone(),
            forwarder: ctx.forwarder.clone(),
            cleanup: ctx.cleanup.clone(),
            locks: ctx.locks.clone(),
        }
    }

    pub fn get_object_status(&self, id: &str) -> Result<Option<ObjectStatus>, StateError> {
        Ok(self.registry.get(id)?.map(|record| record.status()))
    }

    /// Objects newest first
    pub fn list_recent_objects(&self, limit: usize, offset: usize) -> Result<Vec<IncomingObject>, StateError> {
        self.registry.list_recent(limit, offset)
    }

    pub fn get_report(&self, id: &str) -> Result<Option<Report>, StateError> {
        Ok(self.registry.get(id)?.and_then(|record| record.report))
    }

    /// Send the object's report again
    ///
    /// Allowed in `ReportGenerated` and `Forwarded`. Every call appends one
    /// attempt; a success from `ReportGenerated` finishes the object and
    /// releases its payload.
    pub async fn resend_report(&self, id: &str) -> Result<ForwardingAttempt, ResendError> {
        // objects still inside a chain are refused without waiting on its lock
        self.eligible(id)?;
        let _guard = self.locks.lock(id).await;
        let object = self.eligible(id)?;

        tracing::info!(object_id = id, state = %object.state, "🔁 Resending report");
        let outcome = self.forwarder.forward(id, object.generation).await?;

        if object.state == ObjectState::ReportGenerated && outcome.record.object.state == ObjectState::Forwarded {
            if let Err(e) = self.cleanup.release(id, object.generation).await {
                tracing::warn!(object_id = id, "Cleanup after resend failed: {}", e);
            }
        }
        Ok(outcome.attempt)
    }

    fn eligible(&self, id: &str) -> Result<IncomingObject, ResendError> {
        let object = self
            .registry
            .get(id)?
            .ok_or_else(|| ResendError::NotFound(id.to_string()))?
            .object;
        match object.state {
            ObjectState::ReportGenerated | ObjectState::Forwarded => Ok(object),
            state => Err(ResendError::NotEligible {
                id: id.to_string(),
                state,
            }),
        }
    }
}
