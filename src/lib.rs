pub mod error;
pub mod remote;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
pub use remote::{HttpStockClient, StockClient, StockGroup, StockVariant};
pub use storage::Database;
pub use sync::{
    ChunkOutcome, NoopProgress, RunState, RunStatus, SyncConfig, SyncProgress,
};

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::CatalogItem;

use std::sync::Arc;

use storage::repository;
use sync::controller;
use sync::scheduler::ChunkScheduler;

/// Page size used when importing the remote product catalog.
const CATALOG_PAGE_LIMIT: u32 = 100;
/// Hard stop for catalog paging, in case the remote never returns an empty page.
const MAX_CATALOG_PAGES: u32 = 1000;

/// Build an HTTP client for the ERP from stored configuration.
/// A missing base URL is a configuration error, surfaced before any run
/// state is created.
pub async fn client_from_config(db: &Database) -> Result<HttpStockClient> {
    let (base_url, api_key) = db
        .reader()
        .call(|conn| {
            Ok::<_, rusqlite::Error>((
                repository::get_config(conn, "erp_base_url")?,
                repository::get_config(conn, "erp_api_key")?,
            ))
        })
        .await?;

    let base_url = base_url.ok_or_else(|| {
        Error::Config("erp_base_url not set. Run: stocksync config set erp_base_url <URL>".into())
    })?;
    HttpStockClient::new(&base_url, api_key)
}

/// Main entry point: the local catalog database plus the ERP client and the
/// in-process chunk scheduler.
pub struct StockSync {
    db: Database,
    client: Arc<dyn StockClient>,
    scheduler: ChunkScheduler,
}

impl StockSync {
    pub fn new(db: Database, client: Arc<dyn StockClient>) -> Self {
        Self {
            db,
            client,
            scheduler: ChunkScheduler::new(),
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Access the chunk scheduler (for drain-waiting in the CLI).
    pub fn scheduler(&self) -> &ChunkScheduler {
        &self.scheduler
    }

    /// Load the chunking configuration (defaults if unset).
    pub async fn sync_config(&self) -> Result<SyncConfig> {
        SyncConfig::load(&self.db).await
    }

    // ── Sync commands ──────────────────────────────────────────────

    pub async fn start_manual_run(
        &self,
        blocking: bool,
        progress: &dyn SyncProgress,
    ) -> Result<Option<RunState>> {
        let config = self.sync_config().await?;
        controller::start_manual_run(
            &self.db,
            &self.client,
            &self.scheduler,
            &config,
            blocking,
            progress,
        )
        .await
    }

    pub async fn start_scheduled_run(&self) -> Result<Option<RunState>> {
        let config = self.sync_config().await?;
        controller::start_scheduled_run(&self.db, &self.client, &self.scheduler, &config).await
    }

    /// Cancel the active run and any pending chunk jobs.
    pub async fn cancel(&self) -> Result<bool> {
        controller::cancel_run(&self.db, &self.scheduler).await
    }

    /// Current run state, or None when idle.
    pub async fn sync_status(&self) -> Result<Option<RunState>> {
        self.db
            .reader()
            .call(|conn| repository::get_run_state(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Catalog commands ───────────────────────────────────────────

    pub async fn catalog_add(
        &self,
        sku: Option<&str>,
        name: &str,
        quantity: i64,
        unit: Option<&str>,
    ) -> Result<()> {
        let sku = sku.map(|s| s.to_string());
        let name = name.to_string();
        let unit = unit.map(|s| s.to_string());
        self.db
            .writer()
            .call(move |conn| {
                repository::upsert_catalog_item(
                    conn,
                    sku.as_deref(),
                    &name,
                    quantity,
                    unit.as_deref(),
                )
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn catalog_remove(&self, sku: &str) -> Result<bool> {
        let sku = sku.to_string();
        self.db
            .writer()
            .call(move |conn| repository::remove_catalog_item(conn, &sku))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn catalog_list(&self) -> Result<Vec<CatalogItem>> {
        self.db
            .reader()
            .call(|conn| repository::list_catalog_items(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Import the remote product catalog: page through the ERP's product
    /// listing and upsert every variant as a local item keyed by its
    /// external id. Returns the number of items written.
    pub async fn import_remote_catalog(&self) -> Result<u64> {
        let mut imported: u64 = 0;
        for page in 1..=MAX_CATALOG_PAGES {
            let groups = self
                .client
                .fetch_catalog_page(page, CATALOG_PAGE_LIMIT)
                .await?;
            if groups.is_empty() {
                return Ok(imported);
            }

            let count = self
                .db
                .writer()
                .call(move |conn| {
                    let mut count: u64 = 0;
                    for group in &groups {
                        let name = group.name.as_deref().unwrap_or("");
                        for variant in &group.variants {
                            repository::upsert_catalog_item(
                                conn,
                                Some(&variant.external_id),
                                name,
                                variant.quantity,
                                variant.unit.as_deref(),
                            )?;
                            count += 1;
                        }
                    }
                    Ok::<u64, rusqlite::Error>(count)
                })
                .await?;
            imported += count;
        }
        log::warn!("catalog import stopped after {MAX_CATALOG_PAGES} pages");
        Ok(imported)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::remote::StockVariant;

    /// Serves two catalog pages, then an empty one.
    struct PagedCatalogClient;

    #[async_trait]
    impl StockClient for PagedCatalogClient {
        async fn fetch_stock(&self, _ids: &[String]) -> Result<Vec<StockGroup>> {
            Ok(Vec::new())
        }

        async fn fetch_catalog_page(&self, page: u32, _limit: u32) -> Result<Vec<StockGroup>> {
            if page > 2 {
                return Ok(Vec::new());
            }
            Ok(vec![StockGroup {
                external_id: format!("g{page}"),
                name: Some(format!("Group {page}")),
                variants: vec![
                    StockVariant {
                        external_id: format!("SKU-{page}A"),
                        quantity: 5,
                        unit: Some("pcs".to_string()),
                    },
                    StockVariant {
                        external_id: format!("SKU-{page}B"),
                        quantity: 2,
                        unit: None,
                    },
                ],
            }])
        }
    }

    #[tokio::test]
    async fn test_import_remote_catalog_pages_until_empty() {
        let db = Database::open_memory().await.unwrap();
        let app = StockSync::new(db, Arc::new(PagedCatalogClient));

        let imported = app.import_remote_catalog().await.unwrap();
        assert_eq!(imported, 4);

        let items = app.catalog_list().await.unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].sku.as_deref(), Some("SKU-1A"));
        assert_eq!(items[0].name, "Group 1");
        assert_eq!(items[0].quantity, 5);

        // Re-import is idempotent on SKUs
        let imported = app.import_remote_catalog().await.unwrap();
        assert_eq!(imported, 4);
        assert_eq!(app.catalog_list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_client_from_config_requires_base_url() {
        let db = Database::open_memory().await.unwrap();
        let err = client_from_config(&db).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        db.writer()
            .call(|conn| {
                repository::set_config(conn, "erp_base_url", "https://erp.example.com/api/")
            })
            .await
            .unwrap();
        assert!(client_from_config(&db).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_starts_idle() {
        let db = Database::open_memory().await.unwrap();
        let app = StockSync::new(db, Arc::new(PagedCatalogClient));
        assert!(app.sync_status().await.unwrap().is_none());
    }
}
