use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::task::TaskTracker;

use crate::analyzer::{decode_input, AnalyzerError};
use crate::config::Backpressure;
use crate::models::{AnalysisResult, IncomingObject, ObjectState};
use crate::pipeline::{AnalysisError, PipelineContext};
use crate::state::StateError;

/// Error type for enqueueing work
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("all {0} analysis workers are busy")]
    AtCapacity(usize),

    #[error("pipeline is shutting down")]
    ShuttingDown,
}

/// Bounded pool running one chain per received object
///
/// A chain is `Analyzing → Analyzed → ReportGenerated → Forwarded`; any
/// failure ends it in `Failed`. Terminal objects have their payload released.
#[derive(Clone)]
pub struct AnalysisPipeline {
    ctx: PipelineContext,
    permits: Arc<Semaphore>,
    capacity: usize,
    tracker: TaskTracker,
}

enum ChainEnd {
    Terminal,
    AwaitingResend,
}

impl AnalysisPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        let capacity = ctx.config.max_concurrent_analyses;
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            tracker: TaskTracker::new(),
            ctx,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Chains spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Schedule the chain for `object_id` at `generation`
    ///
    /// Under [`Backpressure::Wait`] this waits for a free worker; under
    /// [`Backpressure::Reject`] it fails with [`PipelineError::AtCapacity`].
    pub async fn enqueue(&self, object_id: &str, generation: u64) -> Result<(), PipelineError> {
        if self.tracker.is_closed() {
            return Err(PipelineError::ShuttingDown);
        }

        let permit = match self.ctx.config.backpressure {
            Backpressure::Wait => self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::ShuttingDown)?,
            Backpressure::Reject => match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => return Err(PipelineError::AtCapacity(self.capacity)),
                Err(TryAcquireError::Closed) => return Err(PipelineError::ShuttingDown),
            },
        };

        let ctx = self.ctx.clone();
        let id = object_id.to_string();
        self.tracker.spawn(async move {
            run_chain(ctx, id, generation, permit).await;
        });
        tracing::debug!(object_id, generation, "Chain scheduled");
        Ok(())
    }

    /// Stop accepting work and wait up to `grace` for running chains
    ///
    /// Returns the number of chains abandoned at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.tracker.close();
        self.permits.close();

        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!("Waiting for {} analysis chain(s) to finish", pending);
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => 0,
            Err(_) => {
                let abandoned = self.tracker.len();
                tracing::warn!(
                    abandoned,
                    "Shutdown grace of {:?} elapsed; abandoning unfinished chains",
                    grace
                );
                abandoned
            }
        }
    }
}

#[tracing::instrument(skip_all, fields(object_id = %object_id, generation = generation))]
async fn run_chain(ctx: PipelineContext, object_id: String, generation: u64, _permit: OwnedSemaphorePermit) {
    let _guard = ctx.locks.lock(&object_id).await;

    let mut document = None;
    match drive(&ctx, &object_id, generation, &mut document).await {
        Ok(ChainEnd::Terminal) => release(&ctx, &object_id, generation).await,
        Ok(ChainEnd::AwaitingResend) => {}
        Err(ChainError::Superseded) => {
            tracing::debug!(object_id = %object_id, generation, "Chain superseded by a later transfer");
            discard(&ctx, &object_id, document).await;
        }
        Err(ChainError::Failed(reason)) => {
            match ctx.registry.fail(&object_id, generation, &reason) {
                Ok(_) => release(&ctx, &object_id, generation).await,
                Err(StateError::Superseded { .. }) => {
                    tracing::debug!(object_id = %object_id, generation, "Chain superseded by a later transfer");
                }
                Err(e) => tracing::error!(object_id = %object_id, "Failed to record failure: {}", e),
            }
            discard(&ctx, &object_id, document).await;
        }
    }
}

enum ChainError {
    Superseded,
    /// Already logged; the reason is stored on the object
    Failed(String),
}

impl From<StateError> for ChainError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Superseded { .. } => ChainError::Superseded,
            other => {
                tracing::error!("State update failed: {}", other);
                ChainError::Failed(other.to_string())
            }
        }
    }
}

/// `document` holds the key of an SR document written but not yet committed
async fn drive(
    ctx: &PipelineContext,
    object_id: &str,
    generation: u64,
    document: &mut Option<String>,
) -> Result<ChainEnd, ChainError> {
    let object = ctx.registry.transition(object_id, generation, ObjectState::Analyzing)?;
    tracing::info!(object_id, modality = %object.modality, "🔬 Analysis started");

    let result = analyze(ctx, &object).await.map_err(|e| {
        tracing::error!(object_id, "Analysis failed: {}", e);
        ChainError::Failed(format!("analysis failed: {}", e))
    })?;
    tracing::info!(
        object_id,
        findings = result.findings.len(),
        elapsed_ms = result.processing_time_ms,
        "✅ Analysis completed"
    );
    ctx.registry.complete_analysis(object_id, generation, result.clone())?;

    let report = ctx.composer.compose(&object, &result).await.map_err(|e| {
        tracing::error!(object_id, "Report composition failed: {}", e);
        ChainError::Failed(format!("report composition failed: {}", e))
    })?;
    *document = Some(report.document_key.clone());
    ctx.registry.commit_report(object_id, generation, report)?;
    // the record owns the document from here on
    *document = None;

    match ctx.forwarder.forward(object_id, generation).await {
        Ok(outcome) if outcome.record.object.state == ObjectState::Forwarded => Ok(ChainEnd::Terminal),
        Ok(_) => Ok(ChainEnd::AwaitingResend),
        Err(crate::forward::ForwardingError::State(e)) => Err(e.into()),
        Err(e) => {
            // the report stays available for a manual resend
            tracing::warn!(object_id, "Report not forwarded: {}", e);
            Ok(ChainEnd::AwaitingResend)
        }
    }
}

async fn analyze(ctx: &PipelineContext, object: &IncomingObject) -> Result<AnalysisResult, AnalysisError> {
    let started = Instant::now();
    let bytes = ctx
        .storage
        .read_file_str(&object.storage_key)
        .await
        .map_err(|e| AnalysisError::Storage(e.to_string()))?;

    let id = object.id.clone();
    let modality = object.modality;
    let input = tokio::task::spawn_blocking(move || decode_input(&id, modality, &bytes))
        .await
        .map_err(|e| AnalysisError::Task(e.to_string()))??;

    let call = ctx.analyzer.analyze(&input);
    let output = match ctx.config.analysis_timeout() {
        Some(deadline) => tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| AnalysisError::Timeout(deadline))??,
        None => call.await?,
    }
    .ok_or(AnalysisError::NoResult)?;

    for finding in &output.findings {
        finding.validate().map_err(AnalyzerError::from)?;
    }

    Ok(AnalysisResult::new(
        object.id.clone(),
        object.modality,
        output.findings,
        started.elapsed(),
        ctx.analyzer.version(),
    ))
}

async fn discard(ctx: &PipelineContext, object_id: &str, document: Option<String>) {
    if let Some(key) = document {
        ctx.composer.discard(object_id, &key).await;
    }
}

async fn release(ctx: &PipelineContext, object_id: &str, generation: u64) {
    if let Err(e) = ctx.cleanup.release(object_id, generation).await {
        tracing::warn!(object_id, "Cleanup failed: {}", e);
    }
}
