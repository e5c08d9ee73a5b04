use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::error::{Error, Result};
use crate::remote::StockClient;
use crate::storage::{repository, Database};
use crate::sync::run_state::RunStateStore;
use crate::sync::scheduler::ChunkScheduler;
use crate::sync::{executor, planner, NoopProgress, RunState, RunStatus, SyncConfig, SyncProgress};

/// Start a sync run.
///
/// Refuses while another run is in progress, leaving its state untouched.
/// An empty eligible set is not an error: the catalog simply has nothing to
/// sync and no run state is created. Otherwise stale state is purged, the
/// run is planned and initialized, and the chunks either execute inline in
/// order (blocking) or are handed to the scheduler (non-blocking).
///
/// Returns the final run state in blocking mode, the freshly initialized
/// state in non-blocking mode, and `None` when there was nothing to do.
pub async fn start_manual_run(
    db: &Database,
    client: &Arc<dyn StockClient>,
    scheduler: &ChunkScheduler,
    config: &SyncConfig,
    blocking: bool,
    progress: &dyn SyncProgress,
) -> Result<Option<RunState>> {
    let store = RunStateStore::new(db.clone());

    if let Some(state) = store.get().await? {
        if state.status == RunStatus::InProgress {
            return Err(Error::RunInProgress {
                started_at: state.started_at,
            });
        }
    }

    let item_ids: Vec<String> = db
        .reader()
        .call(|conn| repository::list_syncable_item_ids(conn))
        .await?;
    if item_ids.is_empty() {
        log::info!("no catalog items carry a SKU, nothing to sync");
        return Ok(None);
    }

    // Purge leftover state from a completed or aborted prior run
    store.reset().await?;

    let run_id = chrono::Utc::now().timestamp_millis();
    let jobs = planner::plan(run_id, &item_ids, config.chunk_size, config.interval_minutes);
    let state = store
        .init(run_id, item_ids.len() as u64, jobs.len() as u32)
        .await?;

    log::info!(
        "run {run_id}: {} items in {} chunks of {} (interval {} min, {})",
        item_ids.len(),
        jobs.len(),
        config.chunk_size,
        config.interval_minutes,
        if blocking { "blocking" } else { "scheduled" }
    );
    progress.on_run_start(item_ids.len(), jobs.len());

    if blocking {
        let total = jobs.len() as u32;
        for job in &jobs {
            progress.on_chunk_start(job.chunk_index, total);
            let outcome = executor::execute_chunk(db, client.as_ref(), job).await?;
            progress.on_chunk_complete(job.chunk_index, &outcome);
        }
        let state = store.get().await?;
        if let Some(ref state) = state {
            progress.on_run_complete(state);
        }
        Ok(state)
    } else {
        scheduler.enqueue(db, client, jobs);
        Ok(Some(state))
    }
}

/// Daily-trigger entry point. Always non-blocking; a still-running prior run
/// is logged and skipped rather than treated as a failure, so the schedule
/// keeps firing on subsequent days.
pub async fn start_scheduled_run(
    db: &Database,
    client: &Arc<dyn StockClient>,
    scheduler: &ChunkScheduler,
    config: &SyncConfig,
) -> Result<Option<RunState>> {
    match start_manual_run(db, client, scheduler, config, false, &NoopProgress).await {
        Err(Error::RunInProgress { started_at }) => {
            log::warn!("scheduled sync skipped: run started {started_at} is still in progress");
            Ok(None)
        }
        other => other,
    }
}

/// Cancel the active run: abort pending chunk jobs and delete the run state.
/// Returns whether a run-state record existed.
pub async fn cancel_run(db: &Database, scheduler: &ChunkScheduler) -> Result<bool> {
    let unfired = scheduler.cancel_all();
    let existed = RunStateStore::new(db.clone()).reset().await?;
    if existed {
        log::info!("sync run cancelled ({unfired} chunks had not fired)");
    }
    Ok(existed)
}

/// Delay until the next local midnight, when the daily trigger fires.
pub fn until_next_local_midnight(now: DateTime<Local>) -> std::time::Duration {
    let tomorrow = now.date_naive() + chrono::Duration::days(1);
    let midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap();
    let next = match midnight.and_local_timezone(Local) {
        chrono::LocalResult::Single(t) | chrono::LocalResult::Ambiguous(t, _) => t,
        // Midnight erased by a DST jump: fire an hour later
        chrono::LocalResult::None => (midnight + chrono::Duration::hours(1))
            .and_local_timezone(Local)
            .earliest()
            .unwrap_or(now + chrono::Duration::days(1)),
    };
    (next - now).to_std().unwrap_or_default()
}
