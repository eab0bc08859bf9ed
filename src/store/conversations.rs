use super::{invalid, parse_ts, Store};
use crate::error::{AppError, AppResult};
use crate::models::Conversation;
use rusqlite::{params, OptionalExtension, Row};

fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Conversation {
        id: row.get("id")?,
        title: row.get("title")?,
        user_id: row.get("user_id")?,
        flow_id: row.get("flow_id")?,
        total_cost_usd: row.get("total_cost_usd")?,
        total_input_tokens: row.get("total_input_tokens")?,
        total_output_tokens: row.get("total_output_tokens")?,
        task_count: row.get("task_count")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        archived: row.get::<_, i64>("archived")? != 0,
    })
}

impl Store {
    pub fn create_conversation(
        &self,
        id: &str,
        title: Option<&str>,
        user_id: Option<&str>,
        flow_id: &str,
    ) -> AppResult<Conversation> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversations (
                id, title, user_id, flow_id, total_cost_usd,
                total_input_tokens, total_output_tokens, task_count,
                created_at, updated_at, archived
            ) VALUES (?1, ?2, ?3, ?4, 0, 0, 0, 0, ?5, ?5, 0)",
            params![id, title, user_id, flow_id, now],
        )?;
        self.get_conversation(id)
    }

    pub fn get_conversation(&self, id: &str) -> AppResult<Conversation> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT * FROM conversations WHERE id = ?1",
            params![id],
            row_to_conversation,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("conversation not found: {id}")))
    }

    /// Look up the Conversation owning the given flow, if one exists
    /// (§4.7 conversation assignment rule 1).
    pub fn find_conversation_by_flow_id(&self, flow_id: &str) -> AppResult<Option<Conversation>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT * FROM conversations WHERE flow_id = ?1 ORDER BY created_at ASC LIMIT 1",
            params![flow_id],
            row_to_conversation,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_conversations(&self, user_id: Option<&str>) -> AppResult<Vec<Conversation>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = if user_id.is_some() {
            conn.prepare(
                "SELECT * FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC",
            )?
        } else {
            conn.prepare("SELECT * FROM conversations ORDER BY updated_at DESC")?
        };
        let rows = if let Some(user_id) = user_id {
            stmt.query_map(params![user_id], row_to_conversation)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map([], row_to_conversation)?
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    pub fn update_conversation_title(&self, id: &str, title: Option<&str>) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        let n = conn.execute(
            "UPDATE conversations SET title = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, title, now],
        )?;
        if n == 0 {
            return Err(AppError::NotFound(format!("conversation not found: {id}")));
        }
        Ok(())
    }

    pub fn archive_conversation(&self, id: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n = conn.execute(
            "UPDATE conversations SET archived = 1 WHERE id = ?1",
            params![id],
        )?;
        if n == 0 {
            return Err(AppError::NotFound(format!("conversation not found: {id}")));
        }
        Ok(())
    }

    pub fn delete_conversation(&self, id: &str) -> AppResult<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
        let n = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(invalid(format!("conversation not found: {id}")));
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop messages but keep aggregates (§6.1 `/conversations/{id}/clear`).
    pub fn clear_conversation_messages(&self, id: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id],
        )?;
        Ok(())
    }
}
