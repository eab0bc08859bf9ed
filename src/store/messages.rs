use super::{parse_ts, Store};
use crate::error::AppResult;
use crate::models::{Message, MessageRole};
use rusqlite::{params, Row};
use std::str::FromStr;

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let role: String = row.get("role")?;
    let created_at: String = row.get("created_at")?;
    Ok(Message {
        id: row.get("id")?,
        conversation_id: row.get("conversation_id")?,
        role: MessageRole::from_str(&role).unwrap_or(MessageRole::User),
        content: row.get("content")?,
        task_id: row.get("task_id")?,
        created_at: parse_ts(&created_at),
        seq: row.get("seq")?,
    })
}

impl Store {
    /// Append-only (§3 Message). `seq` breaks ties for messages sharing a
    /// `created_at` timestamp.
    pub fn append_message(
        &self,
        id: &str,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        task_id: Option<&str>,
    ) -> AppResult<Message> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |r| r.get(0),
        )?;
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, task_id, created_at, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, conversation_id, role.as_str(), content, task_id, now, seq],
        )?;
        Ok(Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            task_id: task_id.map(str::to_string),
            created_at: super::parse_ts(&now),
            seq,
        })
    }

    pub fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<Message>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC, seq ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation_id], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `GetContext(conversation id, max messages)`: the most recent N
    /// messages, in forward chronological order (§4.1).
    pub fn get_context(&self, conversation_id: &str, max_messages: usize) -> AppResult<Vec<Message>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM (
                SELECT * FROM messages WHERE conversation_id = ?1
                ORDER BY created_at DESC, seq DESC LIMIT ?2
             ) ORDER BY created_at ASC, seq ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation_id, max_messages as i64], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
