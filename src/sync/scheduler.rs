use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::remote::StockClient;
use crate::storage::Database;
use crate::sync::{executor, ChunkJob};

/// Registers chunk jobs as one-shot, time-delayed tokio tasks.
///
/// The scheduler owns the task handles until they fire; it performs no
/// retry or dead-lettering. A chunk that fails records its counts through
/// the executor and the remaining schedule is unaffected. `cancel_all`
/// aborts every pending handle regardless of run; the executor's run-id
/// guard covers whatever a blunt cancel misses.
pub struct ChunkScheduler {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ChunkScheduler {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register all jobs of a run for delayed execution.
    pub fn enqueue(&self, db: &Database, client: &Arc<dyn StockClient>, jobs: Vec<ChunkJob>) {
        let mut pending = self.lock();
        pending.retain(|h| !h.is_finished());

        for job in jobs {
            let db = db.clone();
            let client = Arc::clone(client);
            log::debug!(
                "scheduling chunk {} ({} items) in {}s",
                job.chunk_index,
                job.item_ids.len(),
                job.delay.as_secs()
            );
            pending.push(tokio::spawn(async move {
                tokio::time::sleep(job.delay).await;
                if let Err(e) = executor::execute_chunk(&db, client.as_ref(), &job).await {
                    log::error!("chunk {} failed: {e}", job.chunk_index);
                }
            }));
        }
    }

    /// Abort every chunk task that has not fired yet. Returns how many were
    /// still pending. Cannot interrupt a chunk that is already executing.
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.lock();
        let cancelled = pending.iter().filter(|h| !h.is_finished()).count();
        for handle in pending.drain(..) {
            handle.abort();
        }
        if cancelled > 0 {
            log::info!("cancelled {cancelled} pending chunk jobs");
        }
        cancelled
    }

    pub fn has_pending(&self) -> bool {
        let mut pending = self.lock();
        pending.retain(|h| !h.is_finished());
        !pending.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for ChunkScheduler {
    fn default() -> Self {
        Self::new()
    }
}
