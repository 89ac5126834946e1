//! SQLite persistence for operator settings and target path history.
//!
//! Uses `rusqlite` with bundled SQLite. Handles:
//! - The `config` key-value table (durations, firewall tool choice)
//! - The `executable_paths` history table (most recently used target wins)
//!
//! The core never reads this store mid-run; the CLI assembles a complete
//! run request from it up front.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::core::CycleConfig;
use crate::error::CoreError;
use crate::firewall::BackendChoice;

const KEY_BAN_DELAY: &str = "ban_duration";
const KEY_INTERMITTENT: &str = "intermittent";
const KEY_CONNECT_WINDOW: &str = "connect_duration";
const KEY_FIREWALL_TOOL: &str = "firewall_tool";

/// Manages the SQLite database holding operator settings.
pub struct ConfigStore {
    conn: Mutex<Connection>,
}

impl ConfigStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executable_paths (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT UNIQUE NOT NULL,
                timestamp INTEGER NOT NULL,
                seq INTEGER NOT NULL
            );
            ",
        )?;

        // Enable WAL mode for better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Set a raw config value.
    pub fn set_value(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a raw config value.
    pub fn get_value(&self, key: &str) -> Result<Option<String>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn get_secs(&self, key: &str) -> Result<Option<u64>, CoreError> {
        match self.get_value(key)? {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                CoreError::Store(format!("config value '{key}' = '{raw}' is not a duration"))
            }),
        }
    }

    /// Remember a target executable path; the most recently saved wins.
    pub fn save_path(&self, path: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO executable_paths (path, timestamp, seq)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM executable_paths))
             ON CONFLICT(path) DO UPDATE SET
                 timestamp = excluded.timestamp,
                 seq = excluded.seq",
            params![path, unix_timestamp()],
        )?;
        Ok(())
    }

    /// The most recently saved target path, if any.
    pub fn latest_path(&self) -> Result<Option<String>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached("SELECT path FROM executable_paths ORDER BY seq DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Persist the three cycle durations.
    pub fn save_cycle(&self, cycle: &CycleConfig) -> Result<(), CoreError> {
        self.set_value(KEY_BAN_DELAY, &cycle.ban_delay_secs.to_string())?;
        self.set_value(KEY_INTERMITTENT, &cycle.intermittent_block_secs.to_string())?;
        self.set_value(KEY_CONNECT_WINDOW, &cycle.connect_window_secs.to_string())
    }

    pub fn ban_delay_secs(&self) -> Result<Option<u64>, CoreError> {
        self.get_secs(KEY_BAN_DELAY)
    }

    pub fn intermittent_block_secs(&self) -> Result<Option<u64>, CoreError> {
        self.get_secs(KEY_INTERMITTENT)
    }

    pub fn connect_window_secs(&self) -> Result<Option<u64>, CoreError> {
        self.get_secs(KEY_CONNECT_WINDOW)
    }

    /// The stored backend choice, defaulting to PowerShell.
    pub fn firewall_tool(&self) -> Result<BackendChoice, CoreError> {
        match self.get_value(KEY_FIREWALL_TOOL)? {
            Some(raw) => raw.parse(),
            None => Ok(BackendChoice::PowerShell),
        }
    }

    pub fn set_firewall_tool(&self, choice: BackendChoice) -> Result<(), CoreError> {
        self.set_value(KEY_FIREWALL_TOOL, choice.as_store_value())
    }
}

/// Current Unix timestamp in seconds.
fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
