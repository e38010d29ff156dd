//! Shared table of in-flight and finished pipeline runs.

use crate::error::PipelineError;
use crate::pipeline::types::ExecutionStatus;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One registry entry.
#[derive(Debug, Clone)]
pub struct ExecutionEntry {
    pub execution_id: Uuid,
    pub pipeline_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub token: CancellationToken,
}

impl ExecutionEntry {
    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }
}

/// Finished entries kept by [`ExecutionRegistry::new`].
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Cheaply cloneable handle; clones share the same table.
///
/// Running entries are always kept. Once more than `history_limit` entries
/// have finished, the oldest finished ones are dropped.
#[derive(Debug, Clone)]
pub struct ExecutionRegistry {
    entries: Arc<Mutex<HashMap<Uuid, ExecutionEntry>>>,
    history_limit: usize,
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            history_limit,
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub async fn register(&self, execution_id: Uuid, pipeline_id: &str, token: CancellationToken) {
        let entry = ExecutionEntry {
            execution_id,
            pipeline_id: pipeline_id.to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            token,
        };
        self.entries.lock().await.insert(execution_id, entry);
    }

    /// Record a status change; leaving `Running` stamps `finished_at`.
    pub async fn set_status(&self, execution_id: Uuid, status: ExecutionStatus) -> Result<(), PipelineError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&execution_id)
            .ok_or(PipelineError::RunNotFound { execution_id })?;
        entry.status = status;
        entry.finished_at = match status {
            ExecutionStatus::Running => None,
            _ => Some(Utc::now()),
        };
        if entry.is_finished() {
            prune_finished(&mut entries, self.history_limit);
        }
        Ok(())
    }

    pub async fn get(&self, execution_id: Uuid) -> Option<ExecutionEntry> {
        self.entries.lock().await.get(&execution_id).cloned()
    }

    /// All entries, oldest first.
    pub async fn list(&self) -> Vec<ExecutionEntry> {
        let mut all: Vec<ExecutionEntry> = self.entries.lock().await.values().cloned().collect();
        all.sort_by_key(|e| e.started_at);
        all
    }

    /// Request cancellation. The run stops before its next step starts.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), PipelineError> {
        let entries = self.entries.lock().await;
        let entry = entries
            .get(&execution_id)
            .ok_or(PipelineError::RunNotFound { execution_id })?;
        entry.token.cancel();
        Ok(())
    }

    /// Drop finished entries, returning how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_finished());
        before - entries.len()
    }

    /// Drop every entry. Running executions are not cancelled.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let n = entries.len();
        entries.clear();
        n
    }
}

fn prune_finished(entries: &mut HashMap<Uuid, ExecutionEntry>, limit: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = entries
        .values()
        .filter(|e| e.is_finished())
        .map(|e| (e.finished_at.unwrap_or(e.started_at), e.execution_id))
        .collect();
    if finished.len() <= limit {
        return;
    }
    finished.sort();
    let excess = finished.len() - limit;
    for (_, id) in finished.into_iter().take(excess) {
        entries.remove(&id);
    }
}
