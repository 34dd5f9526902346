use dimse::RemoteNode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::analyzer::Analyzer;
use crate::config::PipelineConfig;
use crate::forward::{ForwardingClient, ReportTransport};
use crate::pipeline::Cleanup;
use crate::report::ReportComposer;
use crate::state::ObjectRegistry;
use crate::storage::StorageBackend;

/// Per-object async locks
///
/// Distinct objects never contend. The pipeline keeps two tables: one
/// serializing an object's chain against manual resends, and a short-lived
/// one guarding its transient payload while it is written or released.
#[derive(Clone, Debug, Default)]
pub struct ObjectLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ObjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `object_id` for the lifetime of the returned guard
    pub async fn lock(&self, object_id: &str) -> ObjectGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(object_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        ObjectGuard {
            object_id: object_id.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ObjectGuard {
    object_id: String,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for ObjectGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // drop the entry once nobody else holds or waits on it
        if locks
            .get(&self.object_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.object_id);
        }
    }
}

/// Everything a pipeline chain needs, built once at startup
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: ObjectRegistry,
    pub storage: Arc<dyn StorageBackend>,
    pub analyzer: Arc<dyn Analyzer>,
    pub composer: ReportComposer,
    pub forwarder: ForwardingClient,
    pub cleanup: Cleanup,
    /// Held for a whole chain or resend
    pub locks: ObjectLocks,
    /// Held while an object's payload is persisted or released
    pub payload_locks: ObjectLocks,
    pub config: Arc<PipelineConfig>,
}

impl PipelineContext {
    pub fn new(
        config: PipelineConfig,
        registry: ObjectRegistry,
        storage: Arc<dyn StorageBackend>,
        analyzer: Arc<dyn Analyzer>,
        transport: Arc<dyn ReportTransport>,
        destination: RemoteNode,
    ) -> Self {
        let payload_locks = ObjectLocks::new();
        Self {
            composer: ReportComposer::new(storage.clone()),
            forwarder: ForwardingClient::new(registry.clone(), storage.clone(), transport, destination),
            cleanup: Cleanup::new(registry.clone(), storage.clone(), payload_locks.clone()),
            locks: ObjectLocks::new(),
            payload_locks,
            config: Arc::new(config),
            registry,
            storage,
            analyzer,
        }
    }
}
