pub mod adapters;
pub mod analyzer;
pub mod config;
pub mod forward;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod service;
pub mod state;
pub mod storage;

use std::sync::Arc;

use dimse::DimseScu;
use tokio_util::sync::CancellationToken;

use crate::adapters::dimse::DimseAdapter;
use crate::adapters::ProtocolAdapter;
use crate::analyzer::{Analyzer, ModalityRuleAnalyzer, NullScorer};
use crate::config::Config;
use crate::forward::ReportTransport;
use crate::pipeline::{AnalysisPipeline, IngestHandler, PipelineContext};
use crate::service::Relay;
use crate::state::{create_record_store, ObjectRegistry};
use crate::storage::{create_storage_backend, StorageBackend};

/// The wired components of a running relay
#[derive(Clone)]
pub struct Assembly {
    pub context: PipelineContext,
    pub pipeline: AnalysisPipeline,
    pub handler: Arc<IngestHandler>,
    pub relay: Relay,
}

/// Wire the pipeline from already constructed collaborators
pub fn assemble(
    config: &Config,
    registry: ObjectRegistry,
    storage: Arc<dyn StorageBackend>,
    analyzer: Arc<dyn Analyzer>,
    transport: Arc<dyn ReportTransport>,
) -> Assembly {
    let context = PipelineContext::new(
        config.pipeline.clone(),
        registry,
        storage,
        analyzer,
        transport,
        config.destination.clone(),
    );
    let pipeline = AnalysisPipeline::new(context.clone());
    let handler = Arc::new(IngestHandler::new(pipeline.clone()));
    let relay = Relay::new(&context);
    Assembly {
        context,
        pipeline,
        handler,
        relay,
    }
}

/// Run the relay until `shutdown` is cancelled
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    tracing::info!("🔧 Starting pacsai '{}'", config.service.id);

    let storage = create_storage_backend(&config.storage)?;
    let registry = ObjectRegistry::new(create_record_store(&config.state)?);

    tracing::warn!(
        "No anomaly model configured; analyzer '{}' will report no findings",
        config.analyzer.model_version
    );
    let analyzer: Arc<dyn Analyzer> = Arc::new(ModalityRuleAnalyzer::new(
        NullScorer,
        config.analyzer.confidence_threshold,
        config.analyzer.model_version.clone(),
    ));
    let transport: Arc<dyn ReportTransport> = Arc::new(DimseScu::new(config.dimse.clone()));

    let assembly = assemble(&config, registry, storage, analyzer, transport);
    tracing::info!(
        "📤 Reports go to {}",
        assembly.context.forwarder.destination().descriptor()
    );

    let config = Arc::new(config);
    let adapter = DimseAdapter::new(assembly.handler.clone());
    tracing::info!("🚀 Starting {}", adapter.summary());
    let listener = adapter.start(config.clone(), shutdown.clone()).await?;

    shutdown.cancelled().await;
    tracing::info!("🛑 Shutdown requested");

    if let Err(e) = listener.await {
        tracing::error!("DIMSE adapter task failed: {}", e);
    }
    let abandoned = assembly
        .pipeline
        .shutdown(config.pipeline.shutdown_grace())
        .await;
    if abandoned == 0 {
        tracing::info!("✅ All analysis chains finished");
    }
    Ok(())
}
