pub mod dimse;

use crate::config::Config;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Protocol adapter trait
///
/// An adapter owns one inbound listener and feeds what it receives into the
/// analysis pipeline.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Start the adapter
    ///
    /// # Arguments
    /// * `config` - Application configuration
    /// * `shutdown` - Cancellation token for graceful shutdown
    ///
    /// # Returns
    /// JoinHandle for the adapter task
    async fn start(
        &self,
        config: Arc<Config>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<JoinHandle<()>>;

    /// Returns a human-readable summary of the adapter configuration
    /// Used for logging and debugging
    fn summary(&self) -> String;
}
