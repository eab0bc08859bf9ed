//! Durable, transactionally consistent storage for every entity in §3
//! (C1 Store).
//!
//! A `Connection` wrapped in a small struct, schema created idempotently
//! on open (`CREATE TABLE IF NOT EXISTS`, no migration framework), narrow
//! plain methods instead of a generic query builder (see DESIGN.md for
//! the grounding source).
//!
//! The connection is guarded by a `Mutex` rather than exposed behind a
//! connection pool: every method here is a short-lived synchronous SQLite
//! call, and compound operations use `Connection::transaction` so they
//! are atomic without any additional application-level locking (§4.1
//! Concurrency).

mod accounts;
mod analytics;
mod conversations;
mod messages;
mod schema;
mod sessions;
mod tasks;
mod webhooks;

use crate::error::{AppError, AppResult};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

pub use analytics::{AnalyticsSummary, DailyCost, SubagentCost};
pub use tasks::{TaskFilter, TaskPage, SortDirection, TaskSortColumn};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `path`.
    pub fn open(path: &Path) -> AppResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a private in-memory database, used by tests.
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }
}

/// Parse an RFC3339 timestamp column, defaulting to the Unix epoch on a
/// malformed value rather than panicking — a corrupt timestamp should
/// never take down the whole query.
pub(crate) fn parse_ts(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::DateTime::<chrono::Utc>::UNIX_EPOCH)
}

pub(crate) fn parse_ts_opt(raw: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.map(|r| parse_ts(&r))
}

pub(crate) fn invalid(msg: impl Into<String>) -> AppError {
    AppError::Invalid(msg.into())
}
