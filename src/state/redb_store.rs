use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

use crate::state::{ObjectRecord, RecordStore, RecordUpdate, StateError, StateResult};

/// Object records keyed by SOP Instance UID, stored as JSON
const OBJECTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("objects");

/// Record store persisted in a redb database file
pub struct RedbRecordStore {
    db: Database,
}

impl std::fmt::Debug for RedbRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRecordStore").finish_non_exhaustive()
    }
}

fn backend<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> StateError {
    move |e| StateError::Backend(format!("{}: {}", context, e))
}

impl RedbRecordStore {
    /// Open or create the database and its table
    pub fn open(path: impl AsRef<Path>) -> StateResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(backend("Failed to create database directory"))?;
        }

        tracing::info!("🗄️  Initializing state database: {}", path.display());
        let db = Database::create(path).map_err(backend("Failed to create database"))?;

        let write_txn = db
            .begin_write()
            .map_err(backend("Failed to begin write transaction"))?;
        {
            let _ = write_txn
                .open_table(OBJECTS_TABLE)
                .map_err(backend("Failed to open objects table"))?;
        }
        write_txn
            .commit()
            .map_err(backend("Failed to commit table initialization"))?;

        Ok(Self { db })
    }
}

impl RecordStore for RedbRecordStore {
    fn get(&self, id: &str) -> StateResult<Option<ObjectRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(backend("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(OBJECTS_TABLE)
            .map_err(backend("Failed to open objects table"))?;

        let json = table
            .get(id)
            .map_err(backend("Failed to read record"))?
            .map(|guard| guard.value().to_string());
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn list(&self) -> StateResult<Vec<ObjectRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(backend("Failed to begin read transaction"))?;
        let table = read_txn
            .open_table(OBJECTS_TABLE)
            .map_err(backend("Failed to open objects table"))?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(backend("Failed to iterate records"))? {
            let (_, value) = entry.map_err(backend("Failed to read record"))?;
            records.push(serde_json::from_str(value.value())?);
        }
        Ok(records)
    }

    fn update(&self, id: &str, apply: &mut RecordUpdate<'_>) -> StateResult<ObjectRecord> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(backend("Failed to begin write transaction"))?;

        let updated = {
            let mut table = write_txn
                .open_table(OBJECTS_TABLE)
                .map_err(backend("Failed to open objects table"))?;

            let existing = table
                .get(id)
                .map_err(backend("Failed to read record"))?
                .map(|guard| guard.value().to_string());
            let existing = match existing {
                Some(json) => Some(serde_json::from_str::<ObjectRecord>(&json)?),
                None => None,
            };

            // An error here drops the transaction uncommitted
            let updated = apply(existing)?;
            let json = serde_json::to_string(&updated)?;
            table
                .insert(id, json.as_str())
                .map_err(backend("Failed to write record"))?;
            updated
        };

        write_txn
            .commit()
            .map_err(backend("Failed to commit record"))?;
        Ok(updated)
    }
}
