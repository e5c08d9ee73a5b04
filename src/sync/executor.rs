use crate::error::Result;
use crate::remote::{index_by_external_id, StockClient};
use crate::storage::{repository, Database};
use crate::sync::run_state::RunStateStore;
use crate::sync::{ChunkJob, ChunkOutcome, RunStatus};

/// Process one chunk: fetch remote stock for the chunk's items, apply the
/// quantities to the local catalog, and fold the counts into the run state.
///
/// Errors never abort the run from here: a failed remote call marks the whole
/// chunk failed, a failed item marks that item failed, and the schedule
/// continues either way. The run state is updated after every attempt except
/// when the guard finds no matching active run.
pub async fn execute_chunk(
    db: &Database,
    client: &dyn StockClient,
    job: &ChunkJob,
) -> Result<ChunkOutcome> {
    let store = RunStateStore::new(db.clone());

    // Stale-job guard: the run this chunk belongs to must still be active.
    match store.get().await? {
        None => {
            log::warn!("chunk {}: no active run, skipping", job.chunk_index);
            return Ok(ChunkOutcome::default());
        }
        Some(state) if state.status != RunStatus::InProgress => {
            log::warn!("chunk {}: run already completed, skipping", job.chunk_index);
            return Ok(ChunkOutcome::default());
        }
        Some(state) if state.run_id != job.run_id => {
            log::warn!(
                "chunk {}: belongs to run {} but run {} is active, skipping",
                job.chunk_index,
                job.run_id,
                state.run_id
            );
            return Ok(ChunkOutcome::default());
        }
        Some(_) => {}
    }

    let item_count = job.item_ids.len() as u64;
    let outcome = match client.fetch_stock(&job.item_ids).await {
        Ok(groups) => apply_stock(db, job, &groups).await?,
        Err(e) => {
            log::warn!(
                "chunk {}: stock fetch failed, all {item_count} items marked failed: {e}",
                job.chunk_index
            );
            ChunkOutcome {
                updated: 0,
                skipped: 0,
                errors: item_count,
            }
        }
    };

    log::info!(
        "chunk {}: {} updated, {} skipped, {} failed",
        job.chunk_index,
        outcome.updated,
        outcome.skipped,
        outcome.errors
    );

    // Skipped items are healthy (no current remote record), so they count on
    // the success side; updated + skipped + errors always equals item_count.
    store
        .apply_chunk_result(
            job.chunk_index,
            item_count,
            outcome.updated + outcome.skipped,
            outcome.errors,
        )
        .await?;

    Ok(outcome)
}

/// Apply a fetched stock dataset to the chunk's local items. The nested
/// group/variant structure is flattened once; each item then resolves by
/// exact SKU lookup. Item-level failures are counted and do not affect
/// siblings.
async fn apply_stock(
    db: &Database,
    job: &ChunkJob,
    groups: &[crate::remote::StockGroup],
) -> Result<ChunkOutcome> {
    let index = index_by_external_id(groups);
    let item_ids = job.item_ids.clone();
    let chunk_index = job.chunk_index;

    let outcome = db
        .writer()
        .call(move |conn| {
            let mut outcome = ChunkOutcome::default();
            for sku in &item_ids {
                let Some(&quantity) = index.get(sku) else {
                    log::debug!("chunk {chunk_index}: {sku} absent from remote dataset, skipped");
                    outcome.skipped += 1;
                    continue;
                };
                match repository::set_item_quantity(conn, sku, quantity) {
                    Ok(true) => outcome.updated += 1,
                    Ok(false) => {
                        log::warn!("chunk {chunk_index}: {sku} no longer in local catalog");
                        outcome.errors += 1;
                    }
                    Err(e) => {
                        log::warn!("chunk {chunk_index}: failed to update {sku}: {e}");
                        outcome.errors += 1;
                    }
                }
            }
            Ok::<ChunkOutcome, rusqlite::Error>(outcome)
        })
        .await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::error::Error;
    use crate::remote::{StockGroup, StockVariant};

    struct FixedClient {
        groups: Vec<StockGroup>,
    }

    #[async_trait]
    impl StockClient for FixedClient {
        async fn fetch_stock(&self, _ids: &[String]) -> crate::error::Result<Vec<StockGroup>> {
            Ok(self.groups.clone())
        }

        async fn fetch_catalog_page(
            &self,
            _page: u32,
            _limit: u32,
        ) -> crate::error::Result<Vec<StockGroup>> {
            Ok(Vec::new())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl StockClient for FailingClient {
        async fn fetch_stock(&self, _ids: &[String]) -> crate::error::Result<Vec<StockGroup>> {
            Err(Error::Remote("connection refused".into()))
        }

        async fn fetch_catalog_page(
            &self,
            _page: u32,
            _limit: u32,
        ) -> crate::error::Result<Vec<StockGroup>> {
            Err(Error::Remote("connection refused".into()))
        }
    }

    fn stock(pairs: &[(&str, i64)]) -> Vec<StockGroup> {
        vec![StockGroup {
            external_id: "g1".to_string(),
            name: Some("Group".to_string()),
            variants: pairs
                .iter()
                .map(|(sku, q)| StockVariant {
                    external_id: sku.to_string(),
                    quantity: *q,
                    unit: Some("pcs".to_string()),
                })
                .collect(),
        }]
    }

    async fn seed(db: &Database, skus: &[&str]) {
        let skus: Vec<String> = skus.iter().map(|s| s.to_string()).collect();
        db.writer()
            .call(move |conn| {
                for sku in &skus {
                    repository::upsert_catalog_item(conn, Some(sku), "Item", 1, None)?;
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    fn job(run_id: i64, ids: &[&str]) -> ChunkJob {
        ChunkJob {
            run_id,
            chunk_index: 0,
            item_ids: ids.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
        }
    }

    async fn quantity(db: &Database, sku: &str) -> Option<i64> {
        let sku = sku.to_string();
        db.reader()
            .call(move |conn| repository::get_item_quantity(conn, &sku))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_chunk_updates_quantities() {
        let db = Database::open_memory().await.unwrap();
        seed(&db, &["SKU-1", "SKU-2"]).await;
        let store = RunStateStore::new(db.clone());
        store.init(1, 2, 1).await.unwrap();

        let client = FixedClient {
            groups: stock(&[("SKU-1", 40), ("SKU-2", 0)]),
        };
        let outcome = execute_chunk(&db, &client, &job(1, &["SKU-1", "SKU-2"]))
            .await
            .unwrap();

        assert_eq!(outcome, ChunkOutcome { updated: 2, skipped: 0, errors: 0 });
        assert_eq!(quantity(&db, "SKU-1").await, Some(40));
        assert_eq!(quantity(&db, "SKU-2").await, Some(0));

        let state = store.get().await.unwrap().unwrap();
        assert_eq!(state.processed_items, 2);
        assert_eq!(state.successful_updates, 2);
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_absent_sku_is_skipped_not_failed() {
        let db = Database::open_memory().await.unwrap();
        seed(&db, &["SKU-1", "SKU-2"]).await;
        let store = RunStateStore::new(db.clone());
        store.init(1, 2, 1).await.unwrap();

        // Remote only knows SKU-1; SKU-2 is e.g. discontinued
        let client = FixedClient {
            groups: stock(&[("SKU-1", 9)]),
        };
        let outcome = execute_chunk(&db, &client, &job(1, &["SKU-1", "SKU-2"]))
            .await
            .unwrap();

        assert_eq!(outcome, ChunkOutcome { updated: 1, skipped: 1, errors: 0 });
        // Skipped item's local quantity untouched
        assert_eq!(quantity(&db, "SKU-2").await, Some(1));

        let state = store.get().await.unwrap().unwrap();
        assert_eq!(state.processed_items, 2);
        assert_eq!(state.successful_updates, 2);
        assert_eq!(state.failed_updates, 0);
    }

    #[tokio::test]
    async fn test_total_fetch_failure_marks_whole_chunk_failed() {
        let db = Database::open_memory().await.unwrap();
        seed(&db, &["SKU-1", "SKU-2", "SKU-3"]).await;
        let store = RunStateStore::new(db.clone());
        store.init(1, 6, 2).await.unwrap();

        let outcome = execute_chunk(&db, &FailingClient, &job(1, &["SKU-1", "SKU-2", "SKU-3"]))
            .await
            .unwrap();

        assert_eq!(outcome, ChunkOutcome { updated: 0, skipped: 0, errors: 3 });
        assert_eq!(quantity(&db, "SKU-1").await, Some(1));

        // Progress still advances; the run continues to the next chunk
        let state = store.get().await.unwrap().unwrap();
        assert_eq!(state.current_chunk, 1);
        assert_eq!(state.processed_items, 3);
        assert_eq!(state.failed_updates, 3);
        assert_eq!(state.status, RunStatus::InProgress);
    }

    #[tokio::test]
    async fn test_missing_local_item_counts_as_error() {
        let db = Database::open_memory().await.unwrap();
        seed(&db, &["SKU-1"]).await;
        let store = RunStateStore::new(db.clone());
        store.init(1, 2, 1).await.unwrap();

        // SKU-GONE was planned into the chunk but deleted locally since
        let client = FixedClient {
            groups: stock(&[("SKU-1", 5), ("SKU-GONE", 5)]),
        };
        let outcome = execute_chunk(&db, &client, &job(1, &["SKU-1", "SKU-GONE"]))
            .await
            .unwrap();

        assert_eq!(outcome, ChunkOutcome { updated: 1, skipped: 0, errors: 1 });

        let state = store.get().await.unwrap().unwrap();
        assert_eq!(state.successful_updates, 1);
        assert_eq!(state.failed_updates, 1);
    }

    #[tokio::test]
    async fn test_no_active_run_means_no_side_effects() {
        let db = Database::open_memory().await.unwrap();
        seed(&db, &["SKU-1"]).await;

        let client = FixedClient {
            groups: stock(&[("SKU-1", 99)]),
        };
        let outcome = execute_chunk(&db, &client, &job(1, &["SKU-1"])).await.unwrap();

        assert_eq!(outcome, ChunkOutcome::default());
        assert_eq!(quantity(&db, "SKU-1").await, Some(1));
        assert!(RunStateStore::new(db).get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_run_id_is_rejected() {
        let db = Database::open_memory().await.unwrap();
        seed(&db, &["SKU-1"]).await;
        let store = RunStateStore::new(db.clone());
        store.init(2, 1, 1).await.unwrap();

        let client = FixedClient {
            groups: stock(&[("SKU-1", 99)]),
        };
        // Job tagged with run 1, but run 2 is active
        let outcome = execute_chunk(&db, &client, &job(1, &["SKU-1"])).await.unwrap();

        assert_eq!(outcome, ChunkOutcome::default());
        assert_eq!(quantity(&db, "SKU-1").await, Some(1));
        let state = store.get().await.unwrap().unwrap();
        assert_eq!(state.processed_items, 0);
        assert_eq!(state.current_chunk, 0);
    }
}
