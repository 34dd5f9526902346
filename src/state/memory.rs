use std::collections::HashMap;
use std::sync::Mutex;

use crate::state::{ObjectRecord, RecordStore, RecordUpdate, StateError, StateResult};

/// Process-local record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, ObjectRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StateResult<std::sync::MutexGuard<'_, HashMap<String, ObjectRecord>>> {
        self.records
            .lock()
            .map_err(|e| StateError::Backend(format!("Failed to lock record map: {}", e)))
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &str) -> StateResult<Option<ObjectRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn list(&self) -> StateResult<Vec<ObjectRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn update(&self, id: &str, apply: &mut RecordUpdate<'_>) -> StateResult<ObjectRecord> {
        let mut records = self.lock()?;
        let updated = apply(records.get(id).cloned())?;
        records.insert(id.to_string(), updated.clone());
        Ok(updated)
    }
}
