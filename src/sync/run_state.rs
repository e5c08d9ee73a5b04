use crate::error::Result;
use crate::storage::{repository, Database};
use crate::sync::RunState;

/// Durable store for the single run-state record.
///
/// All mutation funnels through the writer connection, which serializes
/// calls; `apply_chunk_result` is additionally a single SQL statement, so
/// counters stay accurate even if the host runs chunk jobs concurrently.
#[derive(Clone)]
pub struct RunStateStore {
    db: Database,
}

impl RunStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self) -> Result<Option<RunState>> {
        self.db
            .reader()
            .call(|conn| repository::get_run_state(conn))
            .await
            .map_err(Into::into)
    }

    /// Create the record for a new run. Overwrites unconditionally; callers
    /// must check `get()` for an in-progress run first.
    pub async fn init(&self, run_id: i64, total_items: u64, total_chunks: u32) -> Result<RunState> {
        self.db
            .writer()
            .call(move |conn| repository::init_run_state(conn, run_id, total_items, total_chunks))
            .await
            .map_err(Into::into)
    }

    /// Fold one chunk's counts into the record. Safe to call when the chunk
    /// failed entirely (`success_count = 0`, `failure_count = item_count`).
    /// When the applied chunk is the last one the record transitions to
    /// `completed` and `finished_at` is stamped, in the same statement.
    pub async fn apply_chunk_result(
        &self,
        chunk_index: u32,
        item_count: u64,
        success_count: u64,
        failure_count: u64,
    ) -> Result<Option<RunState>> {
        let state = self
            .db
            .writer()
            .call(move |conn| {
                repository::apply_chunk_result(conn, item_count, success_count, failure_count)
            })
            .await?;

        match &state {
            None => log::warn!("chunk {chunk_index}: no run in progress, result dropped"),
            Some(s) => log::debug!(
                "chunk {chunk_index}: {}/{} chunks, {}/{} items processed",
                s.current_chunk,
                s.total_chunks,
                s.processed_items,
                s.total_items
            ),
        }
        Ok(state)
    }

    /// Delete the record entirely (back to idle). Also invoked at the start
    /// of run initiation to purge stale state from an aborted run.
    pub async fn reset(&self) -> Result<bool> {
        self.db
            .writer()
            .call(|conn| repository::delete_run_state(conn))
            .await
            .map_err(Into::into)
    }
}
