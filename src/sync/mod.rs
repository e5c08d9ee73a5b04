pub mod controller;
pub mod executor;
pub mod planner;
pub mod run_state;
pub mod scheduler;

use std::time::Duration;

use serde::Serialize;

use crate::storage::{repository, Database};

pub const DEFAULT_CHUNK_SIZE: u32 = 10;
pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;

/// Upper bounds of the recommended configuration ranges. Values above them
/// are honored but logged, since they usually indicate a typo.
const RECOMMENDED_MAX_CHUNK_SIZE: u32 = 50;
const RECOMMENDED_MAX_INTERVAL_MINUTES: u32 = 60;

/// Chunking knobs for a sync run, loaded from `app_config`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub chunk_size: u32,
    pub interval_minutes: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
        }
    }
}

impl SyncConfig {
    /// Load `chunk_size` / `chunk_interval_minutes` from the config table.
    /// Unset or unparsable values fall back to the defaults; both knobs are
    /// clamped to a minimum of 1 here so the planner never sees zero.
    pub async fn load(db: &Database) -> crate::error::Result<Self> {
        let (chunk_size, interval) = db
            .reader()
            .call(|conn| {
                Ok::<_, rusqlite::Error>((
                    repository::get_config(conn, "chunk_size")?,
                    repository::get_config(conn, "chunk_interval_minutes")?,
                ))
            })
            .await?;

        let chunk_size = parse_knob("chunk_size", chunk_size, DEFAULT_CHUNK_SIZE);
        let interval_minutes = parse_knob(
            "chunk_interval_minutes",
            interval,
            DEFAULT_INTERVAL_MINUTES,
        );

        if chunk_size > RECOMMENDED_MAX_CHUNK_SIZE {
            log::warn!("chunk_size {chunk_size} exceeds recommended maximum {RECOMMENDED_MAX_CHUNK_SIZE}");
        }
        if interval_minutes > RECOMMENDED_MAX_INTERVAL_MINUTES {
            log::warn!(
                "chunk_interval_minutes {interval_minutes} exceeds recommended maximum {RECOMMENDED_MAX_INTERVAL_MINUTES}"
            );
        }

        Ok(Self {
            chunk_size,
            interval_minutes,
        })
    }
}

fn parse_knob(key: &str, value: Option<String>, default: u32) -> u32 {
    match value {
        None => default,
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) if v >= 1 => v,
            _ => {
                log::warn!("invalid {key} '{raw}', using default {default}");
                default
            }
        },
    }
}

/// Status of the single run-state record. No row at all means idle; a run
/// that fails on every chunk still terminates as `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            _ => RunStatus::InProgress,
        }
    }
}

/// Durable state of the current (or last finished) sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub run_id: i64,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub total_items: u64,
    pub total_chunks: u32,
    pub current_chunk: u32,
    pub processed_items: u64,
    pub successful_updates: u64,
    pub failed_updates: u64,
}

/// One schedulable unit of work: a bounded slice of item ids, tagged with
/// the run that created it. Consumed exactly once; never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkJob {
    pub run_id: i64,
    pub chunk_index: u32,
    pub item_ids: Vec<String>,
    pub delay: Duration,
}

/// Per-chunk reconciliation counts as seen by the executor. `skipped` items
/// had no current remote record and were left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Progress callbacks for interactive (blocking) runs.
pub trait SyncProgress {
    fn on_run_start(&self, _total_items: usize, _total_chunks: usize) {}
    fn on_chunk_start(&self, _chunk_index: u32, _total_chunks: u32) {}
    fn on_chunk_complete(&self, _chunk_index: u32, _outcome: &ChunkOutcome) {}
    fn on_run_complete(&self, _state: &RunState) {}
}

/// Progress reporter that does nothing.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_defaults_when_unset() {
        let db = Database::open_memory().await.unwrap();
        let config = SyncConfig::load(&db).await.unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.interval_minutes, DEFAULT_INTERVAL_MINUTES);
    }

    #[tokio::test]
    async fn test_config_reads_stored_values() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                repository::set_config(conn, "chunk_size", "25")?;
                repository::set_config(conn, "chunk_interval_minutes", "2")?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let config = SyncConfig::load(&db).await.unwrap();
        assert_eq!(config.chunk_size, 25);
        assert_eq!(config.interval_minutes, 2);
    }

    #[tokio::test]
    async fn test_config_rejects_zero_and_garbage() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| {
                repository::set_config(conn, "chunk_size", "0")?;
                repository::set_config(conn, "chunk_interval_minutes", "soon")?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let config = SyncConfig::load(&db).await.unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.interval_minutes, DEFAULT_INTERVAL_MINUTES);
    }
}
