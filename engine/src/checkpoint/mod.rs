//! Checkpoint Store (C2): durable per-workflow snapshots keyed by `thread_id`.
//!
//! §4.2 names SQLite as the "canonical choice" backend but only requires a single-writer
//! embedded transactional store. This implementation uses RocksDB column families instead
//! (see DESIGN.md) — the same atomicity and durability guarantees, and `WORKFLOW_DB` still
//! names a single filesystem path (now a database directory rather than a file).

mod schema;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::model::WorkflowState;

pub use schema::{ALL_CFS, CF_CHECKPOINTS, CF_TRANSITIONS};

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

/// Single-writer embedded transactional store, one database per repository (§4.2, §5).
pub struct CheckpointStore {
    db: RwLock<DB>,
}

impl CheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cfs)
            .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;

        Ok(Self { db: RwLock::new(db) })
    }

    /// Durably stores the serialized state, overwriting any prior snapshot for
    /// `thread_id`. RocksDB's `put_cf` is atomic per key, so a concurrent reader never
    /// observes a torn write.
    pub fn save(&self, thread_id: &str, state: &WorkflowState) -> EngineResult<()> {
        let db = self.db.write().map_err(|_| lock_poisoned())?;
        let cf = cf_handle(&db, CF_CHECKPOINTS)?;
        let bytes = bincode::serde::encode_to_vec(state, BINCODE_CONFIG)
            .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
        db.put_cf(&cf, schema::keys::checkpoint(thread_id), bytes)
            .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
        Ok(())
    }

    pub fn load(&self, thread_id: &str) -> EngineResult<Option<WorkflowState>> {
        let db = self.db.read().map_err(|_| lock_poisoned())?;
        let cf = cf_handle(&db, CF_CHECKPOINTS)?;
        let bytes = db
            .get_cf(&cf, schema::keys::checkpoint(thread_id))
            .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
        match bytes {
            None => Ok(None),
            Some(bytes) => {
                let (state, _): (WorkflowState, usize) =
                    bincode::serde::decode_from_slice(&bytes, BINCODE_CONFIG)
                        .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
                Ok(Some(state))
            }
        }
    }

    /// Enumerates `thread_id`s whose last saved snapshot is still active (`terminal` is
    /// null), for the resume driver.
    pub fn list_active(&self) -> EngineResult<Vec<String>> {
        let db = self.db.read().map_err(|_| lock_poisoned())?;
        let cf = cf_handle(&db, CF_CHECKPOINTS)?;
        let mut active = Vec::new();
        let iter = db.iterator_cf(&cf, rocksdb::IteratorMode::Start);
        for item in iter {
            let (key, value) = item.map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
            let (state, _): (WorkflowState, usize) =
                bincode::serde::decode_from_slice(&value, BINCODE_CONFIG)
                    .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
            if state.is_active() {
                active.push(String::from_utf8_lossy(&key).to_string());
            }
        }
        Ok(active)
    }

    /// Persists an arbitrary serializable transition history alongside the checkpoint
    /// (§4.5's forensic replay requirement). Generic so `graph::node::Transition` doesn't
    /// need to live in this module.
    pub fn save_transitions<T: Serialize>(&self, thread_id: &str, transitions: &[T]) -> EngineResult<()> {
        let db = self.db.write().map_err(|_| lock_poisoned())?;
        let cf = cf_handle(&db, CF_TRANSITIONS)?;
        let bytes = bincode::serde::encode_to_vec(transitions, BINCODE_CONFIG)
            .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
        db.put_cf(&cf, schema::keys::transitions(thread_id), bytes)
            .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
        Ok(())
    }

    pub fn load_transitions<T: DeserializeOwned>(&self, thread_id: &str) -> EngineResult<Vec<T>> {
        let db = self.db.read().map_err(|_| lock_poisoned())?;
        let cf = cf_handle(&db, CF_TRANSITIONS)?;
        let bytes = db
            .get_cf(&cf, schema::keys::transitions(thread_id))
            .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
        match bytes {
            None => Ok(Vec::new()),
            Some(bytes) => {
                let (transitions, _): (Vec<T>, usize) =
                    bincode::serde::decode_from_slice(&bytes, BINCODE_CONFIG)
                        .map_err(|e| EngineError::CheckpointError { message: e.to_string() })?;
                Ok(transitions)
            }
        }
    }
}

fn cf_handle<'a>(db: &'a DB, name: &str) -> EngineResult<std::sync::Arc<rocksdb::BoundColumnFamily<'a>>> {
    db.cf_handle(name)
        .ok_or_else(|| EngineError::CheckpointError {
            message: format!("column family not found: {name}"),
        })
}

fn lock_poisoned() -> EngineError {
    EngineError::CheckpointError {
        message: "checkpoint store lock poisoned".to_string(),
    }
}
