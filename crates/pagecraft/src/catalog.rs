use std::collections::HashMap;
use std::sync::Mutex;

use orchestrator::{TaskId, TaskStatus};
use uuid::Uuid;

/// One row of the "what has this CLI generated" ledger. Grounded on the
/// original service's `History` table, trimmed to the fields that still
/// mean something without a database behind them: no `created_at` (nothing
/// here survives a restart to make one meaningful).
#[derive(Debug, Clone)]
pub struct CatalogRecord {
    pub id: Uuid,
    pub task_id: TaskId,
    pub outline: String,
    pub generated: Vec<String>,
    pub status: TaskStatus,
}

/// In-memory catalog, not a persistence layer (see Non-goals: no durable
/// job queueing across restarts). One process, one `Mutex<HashMap<..>>` —
/// this is glue for the CLI to report on, not a shared hot resource like
/// `TaskStateRegistry`, so a single lock is enough.
#[derive(Default)]
pub struct CatalogStore {
    records: Mutex<HashMap<Uuid, CatalogRecord>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task_id: TaskId, outline: String, generated: Vec<String>, status: TaskStatus) -> Uuid {
        let id = Uuid::new_v4();
        self.records.lock().expect("catalog lock poisoned").insert(
            id,
            CatalogRecord {
                id,
                task_id,
                outline,
                generated,
                status,
            },
        );
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<CatalogRecord> {
        self.records.lock().expect("catalog lock poisoned").get(id).cloned()
    }

    pub fn list(&self) -> Vec<CatalogRecord> {
        let mut records: Vec<_> = self.records.lock().expect("catalog lock poisoned").values().cloned().collect();
        records.sort_by_key(|r| r.task_id.0.clone());
        records
    }
}
