//! Per-camera cooldown tracking.
//!
//! [`DebounceStore`] answers "did this camera trigger less than
//! `trigger_interval` ago?" on top of a [`TriggerStore`] that persists the
//! last trigger time per camera. Each `record` is a single-key upsert, so
//! concurrent triggers for different cameras never overwrite each other.
//! Two concurrent events for the same camera may both pass `should_skip`
//! before either records; that bounded duplication is accepted.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Persistence for camera id -> last trigger epoch seconds.
pub trait TriggerStore: Send + Sync {
    fn last_trigger(&self, camera_id: &str) -> Result<Option<u64>>;

    /// Overwrite the stored time for `camera_id`.
    fn record_trigger(&self, camera_id: &str, epoch_s: u64) -> Result<()>;
}

pub struct SqliteTriggerStore {
    conn: Mutex<Connection>,
}

impl SqliteTriggerStore {
    /// Open (or create) the store. `file:` URIs are opened in URI mode.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS last_trigger (
              camera_id TEXT PRIMARY KEY,
              triggered_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("debounce store lock poisoned"))
    }
}

impl TriggerStore for SqliteTriggerStore {
    fn last_trigger(&self, camera_id: &str) -> Result<Option<u64>> {
        let conn = self.lock()?;
        let triggered_at: Option<i64> = conn
            .query_row(
                "SELECT triggered_at FROM last_trigger WHERE camera_id = ?1",
                params![camera_id],
                |row| row.get(0),
            )
            .optional()?;
        triggered_at
            .map(|t| {
                u64::try_from(t).map_err(|_| anyhow!("corrupt debounce entry for {}", camera_id))
            })
            .transpose()
    }

    fn record_trigger(&self, camera_id: &str, epoch_s: u64) -> Result<()> {
        let triggered_at =
            i64::try_from(epoch_s).map_err(|_| anyhow!("trigger time exceeds i64 range"))?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO last_trigger(camera_id, triggered_at) VALUES (?1, ?2)
            ON CONFLICT(camera_id) DO UPDATE SET triggered_at = excluded.triggered_at
            "#,
            params![camera_id, triggered_at],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTriggerStore {
    entries: Mutex<HashMap<String, u64>>,
}

impl TriggerStore for InMemoryTriggerStore {
    fn last_trigger(&self, camera_id: &str) -> Result<Option<u64>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("debounce store lock poisoned"))?;
        Ok(entries.get(camera_id).copied())
    }

    fn record_trigger(&self, camera_id: &str, epoch_s: u64) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("debounce store lock poisoned"))?;
        entries.insert(camera_id.to_string(), epoch_s);
        Ok(())
    }
}

pub struct DebounceStore {
    store: Box<dyn TriggerStore>,
    interval: Duration,
}

impl DebounceStore {
    pub fn new(store: Box<dyn TriggerStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub fn in_memory(interval: Duration) -> Self {
        Self::new(Box::new(InMemoryTriggerStore::default()), interval)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Seconds since the last recorded trigger, if any.
    ///
    /// A trigger recorded in the future (clock stepped back) counts as 0s ago.
    pub fn seconds_since_trigger(&self, camera_id: &str, now: u64) -> Result<Option<u64>> {
        Ok(self
            .store
            .last_trigger(camera_id)?
            .map(|last| now.saturating_sub(last)))
    }

    pub fn should_skip(&self, camera_id: &str, now: u64) -> Result<bool> {
        match self.seconds_since_trigger(camera_id, now)? {
            Some(elapsed) => {
                log::debug!("camera {}: last trigger {}s ago", camera_id, elapsed);
                Ok(elapsed < self.interval.as_secs())
            }
            None => {
                log::debug!("camera {}: no previous trigger", camera_id);
                Ok(false)
            }
        }
    }

    pub fn record(&self, camera_id: &str, now: u64) -> Result<()> {
        self.store.record_trigger(camera_id, now)
    }
}

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
