pub mod status_mapper;

use crate::adapters::ProtocolAdapter;
use crate::config::Config;
use async_trait::async_trait;
use dimse::{DimseScp, StoreHandler};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// DIMSE protocol adapter
///
/// Runs the C-STORE SCP described by `[dimse]` and hands every received
/// object to the store handler.
pub struct DimseAdapter {
    handler: Arc<dyn StoreHandler>,
}

impl DimseAdapter {
    pub fn new(handler: Arc<dyn StoreHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ProtocolAdapter for DimseAdapter {
    async fn start(
        &self,
        config: Arc<Config>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<JoinHandle<()>> {
        let scp = DimseScp::new(config.dimse.clone(), self.handler.clone());
        // bind before returning so address errors surface at startup
        let bound = scp.bind().await?;
        tracing::info!("DIMSE adapter listening on {}", bound.local_addr()?);

        let handle = tokio::spawn(async move {
            if let Err(e) = bound.serve(shutdown).await {
                tracing::error!("DIMSE SCP stopped with error: {}", e);
            }
            tracing::info!("DIMSE adapter stopped");
        });
        Ok(handle)
    }

    fn summary(&self) -> String {
        "DIMSE C-STORE SCP".to_string()
    }
}
