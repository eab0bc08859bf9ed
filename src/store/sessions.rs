use super::{parse_ts, parse_ts_opt, Store};
use crate::error::{AppError, AppResult};
use crate::models::Session;
use rusqlite::{params, OptionalExtension, Row};

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let connected_at: String = row.get("connected_at")?;
    let disconnected_at: Option<String> = row.get("disconnected_at")?;
    Ok(Session {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        machine_id: row.get("machine_id")?,
        total_cost_usd: row.get("total_cost_usd")?,
        task_count: row.get("task_count")?,
        connected_at: parse_ts(&connected_at),
        disconnected_at: parse_ts_opt(disconnected_at),
    })
}

impl Store {
    /// Created on demand — by a WebSocket attach or a webhook synthesizing
    /// a task in the absence of an existing session (§3 Session).
    pub fn get_or_create_session(
        &self,
        id: &str,
        user_id: Option<&str>,
        machine_id: Option<&str>,
    ) -> AppResult<Session> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let existing = conn
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()?;
        if let Some(session) = existing {
            return Ok(session);
        }
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (id, user_id, machine_id, total_cost_usd, task_count, connected_at, disconnected_at)
             VALUES (?1, ?2, ?3, 0, 0, ?4, NULL)",
            params![id, user_id, machine_id, now],
        )?;
        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?1",
            params![id],
            row_to_session,
        )
        .map_err(AppError::from)
    }

    pub fn get_session(&self, id: &str) -> AppResult<Session> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?1",
            params![id],
            row_to_session,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("session not found: {id}")))
    }

    /// Accumulate a completed task's cost/count onto its Session (§4.5
    /// step 7 finalize).
    pub fn record_session_task_completion(&self, session_id: &str, cost_usd: f64) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE sessions SET total_cost_usd = total_cost_usd + ?2, task_count = task_count + 1
             WHERE id = ?1",
            params![session_id, cost_usd],
        )?;
        Ok(())
    }

    pub fn disconnect_session(&self, id: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE sessions SET disconnected_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// Background sweep: sessions disconnected and idle past
    /// `AppConfig::session_prune_after` are pruned (§3 Lifecycles).
    pub fn prune_idle_sessions(&self, older_than: chrono::DateTime<chrono::Utc>) -> AppResult<u64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n = conn.execute(
            "DELETE FROM sessions WHERE disconnected_at IS NOT NULL AND disconnected_at <= ?1",
            params![older_than.to_rfc3339()],
        )?;
        Ok(n as u64)
    }
}
