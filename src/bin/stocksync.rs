use std::sync::Arc;

use clap::{Parser, Subcommand};

use stocksync::sync::controller;
use stocksync::sync::scheduler::ChunkScheduler;
use stocksync::{ChunkOutcome, RunState, RunStatus, StockSync};

#[derive(Parser)]
#[command(name = "stocksync", about = "ERP stock sync for a local storefront catalog")]
struct Cli {
    /// Database path (default: ~/.stocksync/stocksync.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl stocksync::SyncProgress for StderrProgress {
    fn on_run_start(&self, total_items: usize, total_chunks: usize) {
        eprintln!("Syncing {} items in {} chunks...", total_items, total_chunks);
    }

    fn on_chunk_start(&self, chunk_index: u32, total_chunks: u32) {
        eprintln!("[{}/{}] Processing chunk...", chunk_index + 1, total_chunks);
    }

    fn on_chunk_complete(&self, _chunk_index: u32, outcome: &ChunkOutcome) {
        eprintln!(
            "  {} updated, {} skipped, {} failed",
            outcome.updated, outcome.skipped, outcome.errors
        );
    }

    fn on_run_complete(&self, state: &RunState) {
        eprintln!(
            "Done: {}/{} items updated, {} failed",
            state.successful_updates, state.total_items, state.failed_updates
        );
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run or manage stock synchronization
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Show the current sync run state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage local catalog items
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Run a full sync now, processing all chunks in this process
    Run {
        /// Space chunks out on the configured interval instead of running
        /// them back to back; waits until the schedule drains
        #[arg(long)]
        paced: bool,
    },
    /// Cancel the active run and discard pending chunks
    Cancel,
    /// Run as a daemon, firing a sync at each local midnight
    Schedule,
}

#[derive(Subcommand)]
enum CatalogAction {
    /// List catalog items
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add or update a catalog item
    Add {
        /// Display name
        name: String,
        /// External identifier shared with the ERP; items without one are
        /// excluded from sync
        #[arg(long)]
        sku: Option<String>,
        /// Initial stock quantity
        #[arg(long, default_value = "0")]
        quantity: i64,
        /// Stock unit (e.g. pcs)
        #[arg(long)]
        unit: Option<String>,
    },
    /// Remove a catalog item by SKU
    Remove { sku: String },
    /// Import the remote product catalog into the local one
    Pull,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => stocksync::Database::open_at(path).await?,
        None => stocksync::Database::open().await?,
    };

    match cli.command {
        Commands::Status { json } => {
            let state = db
                .reader()
                .call(|conn| stocksync::storage::repository::get_run_state(conn))
                .await?;
            print_status(state.as_ref(), json)?;
        }
        Commands::Sync { action } => match action {
            SyncAction::Run { paced } => {
                let client = stocksync::client_from_config(&db).await?;
                let app = StockSync::new(db, Arc::new(client));
                if paced {
                    match app.start_manual_run(false, &StderrProgress).await? {
                        None => eprintln!("Nothing to sync."),
                        Some(_) => {
                            while app.scheduler().has_pending() {
                                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                            }
                            if let Some(state) = app.sync_status().await? {
                                print_status(Some(&state), false)?;
                            }
                        }
                    }
                } else {
                    match app.start_manual_run(true, &StderrProgress).await? {
                        None => eprintln!("Nothing to sync."),
                        Some(state) => print_status(Some(&state), false)?,
                    }
                }
            }
            SyncAction::Cancel => {
                let scheduler = ChunkScheduler::new();
                if controller::cancel_run(&db, &scheduler).await? {
                    eprintln!("Sync run cancelled.");
                } else {
                    eprintln!("No sync run to cancel.");
                }
            }
            SyncAction::Schedule => {
                let client = stocksync::client_from_config(&db).await?;
                let app = StockSync::new(db, Arc::new(client));
                run_daily_schedule(&app).await?;
            }
        },
        Commands::Catalog { action } => {
            handle_catalog(db, action).await?;
        }
        Commands::Config { action } => {
            let app = noop_app(db);
            match action {
                ConfigAction::Get { key } => match app.config_get(&key).await? {
                    Some(value) => println!("{value}"),
                    None => eprintln!("(not set)"),
                },
                ConfigAction::Set { key, value } => {
                    app.config_set(&key, &value).await?;
                }
                ConfigAction::List => {
                    for (key, value) in app.config_list().await? {
                        println!("{key} = {value}");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Fire a non-blocking sync run at each local midnight, forever.
async fn run_daily_schedule(app: &StockSync) -> anyhow::Result<()> {
    loop {
        let delay = controller::until_next_local_midnight(chrono::Local::now());
        log::info!("next scheduled sync in {}s", delay.as_secs());
        tokio::time::sleep(delay).await;

        match app.start_scheduled_run().await {
            Ok(Some(state)) => log::info!(
                "scheduled sync started: {} items in {} chunks",
                state.total_items,
                state.total_chunks
            ),
            Ok(None) => log::info!("scheduled sync: nothing to do"),
            Err(e) => log::error!("scheduled sync failed to start: {e}"),
        }
    }
}

async fn handle_catalog(db: stocksync::Database, action: CatalogAction) -> anyhow::Result<()> {
    match action {
        CatalogAction::List { json } => {
            let app = noop_app(db);
            let items = app.catalog_list().await?;
            if json {
                let rows: Vec<serde_json::Value> = items
                    .iter()
                    .map(|i| {
                        serde_json::json!({
                            "sku": i.sku,
                            "name": i.name,
                            "quantity": i.quantity,
                            "unit": i.unit,
                            "synced_at": i.synced_at,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for item in &items {
                    println!(
                        "{:<20} {:<30} qty {}{}",
                        item.sku.as_deref().unwrap_or("(no sku)"),
                        item.name,
                        item.quantity,
                        item.unit.as_deref().map(|u| format!(" {u}")).unwrap_or_default()
                    );
                }
                eprintln!("{} items", items.len());
            }
        }
        CatalogAction::Add {
            name,
            sku,
            quantity,
            unit,
        } => {
            let app = noop_app(db);
            app.catalog_add(sku.as_deref(), &name, quantity, unit.as_deref())
                .await?;
            if sku.is_none() {
                eprintln!("Added without SKU: item will be excluded from sync.");
            }
        }
        CatalogAction::Remove { sku } => {
            let app = noop_app(db);
            if app.catalog_remove(&sku).await? {
                eprintln!("Removed {sku}.");
            } else {
                eprintln!("No item with SKU {sku}.");
            }
        }
        CatalogAction::Pull => {
            let client = stocksync::client_from_config(&db).await?;
            let app = StockSync::new(db, Arc::new(client));
            let imported = app.import_remote_catalog().await?;
            eprintln!("Imported {imported} items from the ERP catalog.");
        }
    }
    Ok(())
}

/// An app handle for commands that never touch the ERP.
fn noop_app(db: stocksync::Database) -> StockSync {
    struct NoClient;

    #[async_trait::async_trait]
    impl stocksync::StockClient for NoClient {
        async fn fetch_stock(
            &self,
            _ids: &[String],
        ) -> stocksync::Result<Vec<stocksync::StockGroup>> {
            Err(stocksync::Error::Config("no ERP client configured".into()))
        }

        async fn fetch_catalog_page(
            &self,
            _page: u32,
            _limit: u32,
        ) -> stocksync::Result<Vec<stocksync::StockGroup>> {
            Err(stocksync::Error::Config("no ERP client configured".into()))
        }
    }

    StockSync::new(db, Arc::new(NoClient))
}

fn print_status(state: Option<&RunState>, json: bool) -> anyhow::Result<()> {
    match state {
        None => {
            if json {
                println!("{}", serde_json::json!({ "status": "idle" }));
            } else {
                println!("Sync idle.");
            }
        }
        Some(state) => {
            if json {
                println!("{}", serde_json::to_string_pretty(state)?);
                return Ok(());
            }
            match state.status {
                RunStatus::InProgress => {
                    println!("Sync in progress (started {})", state.started_at);
                    println!(
                        "  chunks: {}/{}  items: {}/{}",
                        state.current_chunk,
                        state.total_chunks,
                        state.processed_items,
                        state.total_items
                    );
                    println!(
                        "  updated: {}  failed: {}",
                        state.successful_updates, state.failed_updates
                    );
                }
                RunStatus::Completed => {
                    println!(
                        "Last sync completed {} (started {})",
                        state.finished_at.as_deref().unwrap_or("-"),
                        state.started_at
                    );
                    println!(
                        "  {} items: {} updated, {} failed",
                        state.total_items, state.successful_updates, state.failed_updates
                    );
                }
            }
        }
    }
    Ok(())
}
