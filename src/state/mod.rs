//! Lifecycle records for received objects
//!
//! Each object owns exactly one [`ObjectRecord`] holding the object itself,
//! its analysis result and its report. All changes go through
//! [`RecordStore::update`], which applies a read-modify-write atomically, so
//! "a report exists iff the object reached `ReportGenerated`" holds after
//! every update.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    AnalysisResult, ForwardingAttempt, IncomingObject, ObjectState, ObjectStatus, Report,
};

pub mod memory;
pub mod redb_store;

pub use memory::MemoryRecordStore;
pub use redb_store::RedbRecordStore;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ObjectState,
        to: ObjectState,
    },

    /// The object was replaced by a later transfer
    #[error("object '{id}' generation {expected} superseded by {actual}")]
    Superseded {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("object '{0}' has no report")]
    MissingReport(String),

    #[error("state backend error: {0}")]
    Backend(String),

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state configuration error: {0}")]
    Config(String),
}

pub type StateResult<T> = Result<T, StateError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object: IncomingObject,
    #[serde(default)]
    pub analysis: Option<AnalysisResult>,
    #[serde(default)]
    pub report: Option<Report>,
}

impl ObjectRecord {
    pub fn new(object: IncomingObject) -> Self {
        Self {
            object,
            analysis: None,
            report: None,
        }
    }

    pub fn status(&self) -> ObjectStatus {
        ObjectStatus {
            id: self.object.id.clone(),
            modality: self.object.modality,
            state: self.object.state,
            received_at: self.object.received_at,
            updated_at: self.object.updated_at,
            storage_released: self.object.storage_released,
            failure: self.object.failure.clone(),
            forwarding_state: self.report.as_ref().map(|r| r.forwarding_state),
            forwarding_attempts: self.report.as_ref().map_or(0, |r| r.attempts.len()),
        }
    }
}

/// Closure applied inside an atomic update
pub type RecordUpdate<'a> = dyn FnMut(Option<ObjectRecord>) -> StateResult<ObjectRecord> + 'a;

/// Storage for object records
pub trait RecordStore: Send + Sync + fmt::Debug {
    fn get(&self, id: &str) -> StateResult<Option<ObjectRecord>>;

    fn list(&self) -> StateResult<Vec<ObjectRecord>>;

    /// Atomically replace the record for `id` with the closure's result
    ///
    /// When the closure fails nothing is written.
    fn update(&self, id: &str, apply: &mut RecordUpdate<'_>) -> StateResult<ObjectRecord>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    Redb,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,
    /// Database file for the redb backend
    #[serde(default)]
    pub path: Option<String>,
}

impl StateConfig {
    pub fn validate(&self) -> StateResult<()> {
        if self.backend == StateBackend::Redb
            && self.path.as_deref().map_or(true, |p| p.trim().is_empty())
        {
            return Err(StateError::Config(
                "state.path is required for the redb backend".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn create_record_store(config: &StateConfig) -> StateResult<Arc<dyn RecordStore>> {
    config.validate()?;
    match config.backend {
        StateBackend::Memory => Ok(Arc::new(MemoryRecordStore::new())),
        StateBackend::Redb => {
            let path = config.path.as_deref().unwrap_or_default();
            Ok(Arc::new(RedbRecordStore::open(path)?))
        }
    }
}

/// State machine operations over a [`RecordStore`]
///
/// Every pipeline-driven change names the generation it was started for and
/// fails with [`StateError::Superseded`] once a duplicate transfer has reset
/// the object.
#[derive(Clone, Debug)]
pub struct ObjectRegistry {
    store: Arc<dyn RecordStore>,
}

impl ObjectRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()))
    }

    /// Create the object in `Received`, or reset it if the id is known
    ///
    /// Returns the stored object and the record of the transfer it replaced.
    pub fn register_received(
        &self,
        object: IncomingObject,
    ) -> StateResult<(IncomingObject, Option<ObjectRecord>)> {
        let mut displaced = None;
        let id = object.id.clone();
        let record = self.store.update(&id, &mut |existing| {
            let mut fresh = object.clone();
            if let Some(previous) = &existing {
                fresh.generation = previous.object.generation + 1;
            }
            displaced = existing;
            Ok(ObjectRecord::new(fresh))
        })?;
        Ok((record.object, displaced))
    }

    /// Move the object along the state machine
    pub fn transition(&self, id: &str, generation: u64, to: ObjectState) -> StateResult<IncomingObject> {
        self.modify(id, generation, |record| {
            advance(record, to)?;
            Ok(())
        })
        .map(|r| r.object)
    }

    /// Move the object to `Failed`, recording why
    pub fn fail(&self, id: &str, generation: u64, reason: &str) -> StateResult<IncomingObject> {
        self.modify(id, generation, |record| {
            advance(record, ObjectState::Failed)?;
            record.object.failure = Some(reason.to_string());
            Ok(())
        })
        .map(|r| r.object)
    }

    /// `Analyzing → Analyzed` together with the result
    pub fn complete_analysis(
        &self,
        id: &str,
        generation: u64,
        analysis: AnalysisResult,
    ) -> StateResult<IncomingObject> {
        self.modify(id, generation, |record| {
            advance(record, ObjectState::Analyzed)?;
            record.analysis = Some(analysis.clone());
            Ok(())
        })
        .map(|r| r.object)
    }

    /// `Analyzed → ReportGenerated` together with the report
    pub fn commit_report(&self, id: &str, generation: u64, report: Report) -> StateResult<IncomingObject> {
        self.modify(id, generation, |record| {
            advance(record, ObjectState::ReportGenerated)?;
            record.report = Some(report.clone());
            Ok(())
        })
        .map(|r| r.object)
    }

    /// Append a forwarding attempt to the object's report
    ///
    /// A successful attempt from `ReportGenerated` moves the object to
    /// `Forwarded`; any other outcome leaves the state alone.
    pub fn record_attempt(
        &self,
        id: &str,
        generation: u64,
        attempt: ForwardingAttempt,
    ) -> StateResult<ObjectRecord> {
        self.modify(id, generation, |record| {
            let state = record.object.state;
            if !matches!(state, ObjectState::ReportGenerated | ObjectState::Forwarded) {
                return Err(StateError::InvalidTransition {
                    id: record.object.id.clone(),
                    from: state,
                    to: ObjectState::Forwarded,
                });
            }
            let success = attempt.is_success();
            let report = record
                .report
                .as_mut()
                .ok_or_else(|| StateError::MissingReport(record.object.id.clone()))?;
            report.record_attempt(attempt.clone());
            if success && state == ObjectState::ReportGenerated {
                advance(record, ObjectState::Forwarded)?;
            }
            Ok(())
        })
    }

    /// Flag the object's transient payload as released
    ///
    /// Returns `false` if it was already released.
    pub fn mark_released(&self, id: &str, generation: u64) -> StateResult<bool> {
        let mut newly = false;
        self.modify(id, generation, |record| {
            if !record.object.state.is_terminal() {
                return Err(StateError::InvalidTransition {
                    id: record.object.id.clone(),
                    from: record.object.state,
                    to: record.object.state,
                });
            }
            newly = !record.object.storage_released;
            record.object.storage_released = true;
            Ok(())
        })?;
        Ok(newly)
    }

    pub fn get(&self, id: &str) -> StateResult<Option<ObjectRecord>> {
        self.store.get(id)
    }

    /// Objects ordered newest first
    pub fn list_recent(&self, limit: usize, offset: usize) -> StateResult<Vec<IncomingObject>> {
        let mut objects: Vec<IncomingObject> =
            self.store.list()?.into_iter().map(|r| r.object).collect();
        objects.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(objects.into_iter().skip(offset).take(limit).collect())
    }

    fn modify(
        &self,
        id: &str,
        generation: u64,
        mut change: impl FnMut(&mut ObjectRecord) -> StateResult<()>,
    ) -> StateResult<ObjectRecord> {
        self.store.update(id, &mut |existing| {
            let mut record = existing.ok_or_else(|| StateError::NotFound(id.to_string()))?;
            if record.object.generation != generation {
                return Err(StateError::Superseded {
                    id: id.to_string(),
                    expected: generation,
                    actual: record.object.generation,
                });
            }
            change(&mut record)?;
            record.object.updated_at = Utc::now();
            Ok(record)
        })
    }
}

fn advance(record: &mut ObjectRecord, to: ObjectState) -> StateResult<()> {
    let from = record.object.state;
    if !from.can_transition_to(to) {
        return Err(StateError::InvalidTransition {
            id: record.object.id.clone(),
            from,
            to,
        });
    }
    record.object.state = to;
    Ok(())
}
