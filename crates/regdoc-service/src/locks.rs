//! Per-regulation lock table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Locks guarding one regulation directory.
#[derive(Debug, Default)]
pub struct RegulationLocks {
    /// Shared by readers; exclusive for the ingest swap and for delete.
    pub state: RwLock<()>,
    /// Serializes ingests of the same regulation.
    pub ingest: Mutex<()>,
}

/// Lazily populated map from regulation id to its locks. Regulations never
/// share a lock, so work on different ids does not contend.
#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<String, Arc<RegulationLocks>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg_id: &str) -> Arc<RegulationLocks> {
        Arc::clone(self.entries.lock().entry(reg_id.to_string()).or_default())
    }
}
