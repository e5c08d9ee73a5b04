use rusqlite::{params, Connection, OptionalExtension};

use crate::sync::{RunState, RunStatus};

// ── Catalog items ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub id: i64,
    pub sku: Option<String>,
    pub name: String,
    pub quantity: i64,
    pub unit: Option<String>,
    pub synced_at: Option<String>,
}

/// Insert a catalog item, or update name/quantity/unit if the SKU already
/// exists. Items without a SKU are always inserted as new rows.
pub fn upsert_catalog_item(
    conn: &Connection,
    sku: Option<&str>,
    name: &str,
    quantity: i64,
    unit: Option<&str>,
) -> Result<(), rusqlite::Error> {
    match sku {
        Some(sku) => {
            conn.execute(
                "INSERT INTO catalog_items (sku, name, quantity, unit, updated_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))
                 ON CONFLICT(sku) DO UPDATE SET
                   name = excluded.name,
                   quantity = excluded.quantity,
                   unit = excluded.unit,
                   updated_at = excluded.updated_at",
                params![sku, name, quantity, unit],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO catalog_items (sku, name, quantity, unit, updated_at)
                 VALUES (NULL, ?1, ?2, ?3, datetime('now'))",
                params![name, quantity, unit],
            )?;
        }
    }
    Ok(())
}

pub fn remove_catalog_item(conn: &Connection, sku: &str) -> Result<bool, rusqlite::Error> {
    let n = conn.execute("DELETE FROM catalog_items WHERE sku = ?1", params![sku])?;
    Ok(n > 0)
}

pub fn list_catalog_items(conn: &Connection) -> Result<Vec<CatalogItem>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, sku, name, quantity, unit, synced_at
         FROM catalog_items ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(CatalogItem {
            id: row.get(0)?,
            sku: row.get(1)?,
            name: row.get(2)?,
            quantity: row.get(3)?,
            unit: row.get(4)?,
            synced_at: row.get(5)?,
        })
    })?;
    rows.collect()
}

/// SKUs of items eligible for sync, in stable insertion order. Items without
/// an external identifier are excluded.
pub fn list_syncable_item_ids(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT sku FROM catalog_items
         WHERE sku IS NOT NULL AND sku != ''
         ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

pub fn get_item_quantity(conn: &Connection, sku: &str) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row(
        "SELECT quantity FROM catalog_items WHERE sku = ?1",
        params![sku],
        |row| row.get(0),
    )
    .optional()
}

/// Overwrite an item's quantity with the remote value and stamp `synced_at`.
/// Returns false if no row carries the SKU (the item vanished mid-run).
pub fn set_item_quantity(
    conn: &Connection,
    sku: &str,
    quantity: i64,
) -> Result<bool, rusqlite::Error> {
    let n = conn.execute(
        "UPDATE catalog_items
         SET quantity = ?2, synced_at = datetime('now'), updated_at = datetime('now')
         WHERE sku = ?1",
        params![sku, quantity],
    )?;
    Ok(n > 0)
}

// ── App config ─────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Run state ──────────────────────────────────────────────────────

fn row_to_run_state(row: &rusqlite::Row<'_>) -> Result<RunState, rusqlite::Error> {
    let status: String = row.get(2)?;
    Ok(RunState {
        run_id: row.get(0)?,
        status: RunStatus::parse(&status),
        started_at: row.get(1)?,
        finished_at: row.get(3)?,
        total_items: row.get::<_, i64>(4)? as u64,
        total_chunks: row.get::<_, i64>(5)? as u32,
        current_chunk: row.get::<_, i64>(6)? as u32,
        processed_items: row.get::<_, i64>(7)? as u64,
        successful_updates: row.get::<_, i64>(8)? as u64,
        failed_updates: row.get::<_, i64>(9)? as u64,
    })
}

const RUN_STATE_COLUMNS: &str = "run_id, started_at, status, finished_at, total_items, \
     total_chunks, current_chunk, processed_items, successful_updates, failed_updates";

pub fn get_run_state(conn: &Connection) -> Result<Option<RunState>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {RUN_STATE_COLUMNS} FROM sync_run_state WHERE id = 1"),
        [],
        |row| row_to_run_state(row),
    )
    .optional()
}

/// Create the run-state row. Overwrites any prior row unconditionally; the
/// in-progress check belongs to the run controller.
pub fn init_run_state(
    conn: &Connection,
    run_id: i64,
    total_items: u64,
    total_chunks: u32,
) -> Result<RunState, rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_run_state
           (id, run_id, status, started_at, finished_at,
            total_items, total_chunks, current_chunk,
            processed_items, successful_updates, failed_updates)
         VALUES (1, ?1, 'in_progress', datetime('now'), NULL, ?2, ?3, 0, 0, 0, 0)",
        params![run_id, total_items as i64, total_chunks as i64],
    )?;
    conn.query_row(
        &format!("SELECT {RUN_STATE_COLUMNS} FROM sync_run_state WHERE id = 1"),
        [],
        |row| row_to_run_state(row),
    )
}

/// Fold one chunk's result into the run state. A single statement so the
/// read-modify-write cannot interleave with a concurrently applied chunk;
/// the completion transition and `finished_at` stamp happen in the same
/// statement, exactly once. Returns the updated state, or None when no run
/// is in progress (stale job after a reset).
pub fn apply_chunk_result(
    conn: &Connection,
    item_count: u64,
    success_count: u64,
    failure_count: u64,
) -> Result<Option<RunState>, rusqlite::Error> {
    let n = conn.execute(
        "UPDATE sync_run_state SET
            current_chunk = current_chunk + 1,
            processed_items = processed_items + ?1,
            successful_updates = successful_updates + ?2,
            failed_updates = failed_updates + ?3,
            status = CASE WHEN current_chunk + 1 >= total_chunks
                          THEN 'completed' ELSE status END,
            finished_at = CASE WHEN current_chunk + 1 >= total_chunks AND finished_at IS NULL
                               THEN datetime('now') ELSE finished_at END
         WHERE id = 1 AND status = 'in_progress'",
        params![
            item_count as i64,
            success_count as i64,
            failure_count as i64
        ],
    )?;
    if n == 0 {
        return Ok(None);
    }
    get_run_state(conn)
}

/// Remove the run-state row entirely (back to idle).
pub fn delete_run_state(conn: &Connection) -> Result<bool, rusqlite::Error> {
    let n = conn.execute("DELETE FROM sync_run_state WHERE id = 1", [])?;
    Ok(n > 0)
}
