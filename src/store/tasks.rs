use super::{invalid, parse_ts, parse_ts_opt, Store};
use crate::error::{AppError, AppResult};
use crate::models::{AgentKind, MessageRole, NewTask, Task, TaskOutcome, TaskSource, TaskStatus};
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let status_raw: String = row.get("status")?;
    let kind_raw: String = row.get("agent_kind")?;
    let source_raw: String = row.get("source")?;
    let metadata_raw: String = row.get("source_metadata")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(Task {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        conversation_id: row.get("conversation_id")?,
        flow_id: row.get("flow_id")?,
        external_id: row.get("external_id")?,
        agent_name: row.get("agent_name")?,
        agent_kind: AgentKind::from_str(&kind_raw).unwrap_or(AgentKind::Default),
        status: TaskStatus::from_str(&status_raw).unwrap_or(TaskStatus::Failed),
        input: row.get("input")?,
        output_stream: row.get("output_stream")?,
        cost_usd: row.get("cost_usd")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        duration_seconds: row.get("duration_seconds")?,
        source: TaskSource::from_str(&source_raw).unwrap_or(TaskSource::Chat),
        source_metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
        parent_task_id: row.get("parent_task_id")?,
        error: row.get("error")?,
        created_at: parse_ts(&created_at),
        started_at: parse_ts_opt(started_at),
        completed_at: parse_ts_opt(completed_at),
        deleted: row.get::<_, i64>("deleted")? != 0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSortColumn {
    CreatedAt,
    CostUsd,
    DurationSeconds,
    Status,
}

impl TaskSortColumn {
    fn column(&self) -> &'static str {
        match self {
            TaskSortColumn::CreatedAt => "created_at",
            TaskSortColumn::CostUsd => "cost_usd",
            TaskSortColumn::DurationSeconds => "duration_seconds",
            TaskSortColumn::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Filters accepted by `/tasks/table` (§6.1) and `ListTasksByFilter`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub session_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub agent_name: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    pub sort_by: TaskSortColumn,
    pub sort_dir: SortDirection,
    pub page: u32,
    pub page_size: u32,
}

impl Default for TaskSortColumn {
    fn default() -> Self {
        TaskSortColumn::CreatedAt
    }
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Desc
    }
}

pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl Store {
    /// `CreateTask(initial fields) -> task id` (§4.1).
    ///
    /// `Invalid` if the agent kind is unknown at the type level this
    /// can't happen (`AgentKind` is already validated by the caller's
    /// parse), but an empty `agent_name` or `input` is still rejected.
    /// `Conflict` if the identifier is reused.
    pub fn create_task(&self, new_task: NewTask) -> AppResult<String> {
        if new_task.agent_name.trim().is_empty() {
            return Err(invalid("agent_name must not be empty"));
        }
        if new_task.input.trim().is_empty() {
            return Err(invalid("input must not be empty"));
        }

        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        let metadata = serde_json::to_string(&new_task.source_metadata)
            .unwrap_or_else(|_| "{}".to_string());

        let result = conn.execute(
            "INSERT INTO tasks (
                id, session_id, conversation_id, flow_id, external_id,
                agent_name, agent_kind, status, input, output_stream,
                cost_usd, input_tokens, output_tokens, duration_seconds,
                source, source_metadata, parent_task_id, error,
                created_at, started_at, completed_at, deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'queued', ?8, '', 0, 0, 0, 0, ?9, ?10, ?11, NULL, ?12, NULL, NULL, 0)",
            params![
                new_task.id,
                new_task.session_id,
                new_task.conversation_id,
                new_task.flow_id,
                new_task.external_id,
                new_task.agent_name,
                new_task.agent_kind.as_str(),
                new_task.input,
                new_task.source.as_str(),
                metadata,
                new_task.parent_task_id,
                now,
            ],
        );

        match result {
            Ok(_) => Ok(new_task.id),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(AppError::Conflict(format!(
                    "task id already exists: {}",
                    new_task.id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_task(&self, task_id: &str) -> AppResult<Task> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT * FROM tasks WHERE id = ?1 AND deleted = 0",
            params![task_id],
            row_to_task,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))
    }

    /// Enforces `queued -> running` and `running -> {completed, failed,
    /// cancelled}`; nothing else is legal (§4.1). Terminal fields are
    /// required for `completed`/`failed`.
    pub fn update_task_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        outcome: Option<TaskOutcome>,
    ) -> AppResult<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;

        let current: String = tx
            .query_row(
                "SELECT status FROM tasks WHERE id = ?1 AND deleted = 0",
                params![task_id],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))?;
        let current = TaskStatus::from_str(&current).unwrap_or(TaskStatus::Failed);

        let legal = matches!(
            (current, new_status),
            (TaskStatus::Queued, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        );
        if !legal {
            return Err(invalid(format!(
                "illegal transition {current:?} -> {new_status:?}"
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        match new_status {
            TaskStatus::Running => {
                tx.execute(
                    "UPDATE tasks SET status = 'running', started_at = ?2 WHERE id = ?1",
                    params![task_id, now],
                )?;
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                let outcome = outcome.unwrap_or_default();
                if new_status != TaskStatus::Cancelled
                    && (outcome.cost_usd < 0.0
                        || outcome.input_tokens < 0
                        || outcome.output_tokens < 0
                        || outcome.duration_seconds < 0.0)
                {
                    return Err(invalid("terminal accounting fields must be non-negative"));
                }
                tx.execute(
                    "UPDATE tasks SET status = ?2, output_stream = ?3, cost_usd = ?4,
                        input_tokens = ?5, output_tokens = ?6, duration_seconds = ?7,
                        error = ?8, completed_at = ?9
                     WHERE id = ?1",
                    params![
                        task_id,
                        new_status.as_str(),
                        outcome.output_stream,
                        outcome.cost_usd,
                        outcome.input_tokens,
                        outcome.output_tokens,
                        outcome.duration_seconds,
                        outcome.error,
                        now,
                    ],
                )?;
            }
            TaskStatus::Queued => unreachable!("no transition targets Queued"),
        }

        tx.commit()?;
        Ok(())
    }

    /// No-op if the task is not `running` (§4.1 AppendOutputChunk).
    pub fn append_output_chunk(&self, task_id: &str, chunk: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE tasks SET output_stream = output_stream || ?2
             WHERE id = ?1 AND status = 'running'",
            params![task_id, chunk],
        )?;
        Ok(())
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> AppResult<TaskPage> {
        let conn = self.conn.lock().expect("store mutex poisoned");

        let mut clauses = vec!["deleted = 0".to_string()];
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            clauses.push(format!("session_id = ?{}", bind.len() + 1));
            bind.push(Box::new(session_id.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", bind.len() + 1));
            bind.push(Box::new(status.as_str().to_string()));
        }
        if let Some(agent_name) = &filter.agent_name {
            clauses.push(format!("agent_name = ?{}", bind.len() + 1));
            bind.push(Box::new(agent_name.clone()));
        }
        if let Some(since) = filter.since {
            clauses.push(format!("created_at >= ?{}", bind.len() + 1));
            bind.push(Box::new(since.to_rfc3339()));
        }
        if let Some(until) = filter.until {
            clauses.push(format!("created_at <= ?{}", bind.len() + 1));
            bind.push(Box::new(until.to_rfc3339()));
        }

        let where_clause = clauses.join(" AND ");
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM tasks WHERE {where_clause}"),
            rusqlite::params_from_iter(bind.iter().map(|b| b.as_ref())),
            |r| r.get::<_, i64>(0).map(|v| v as u64),
        )?;

        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 500);
        let offset = (page - 1) as i64 * page_size as i64;

        let sql = format!(
            "SELECT * FROM tasks WHERE {where_clause} ORDER BY {} {} LIMIT {} OFFSET {}",
            filter.sort_by.column(),
            filter.sort_dir.sql(),
            page_size,
            offset
        );

        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(
                rusqlite::params_from_iter(bind.iter().map(|b| b.as_ref())),
                row_to_task,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskPage {
            tasks,
            total,
            page,
            page_size,
        })
    }

    /// Look up a Task by the external identifier used for `flow_id`
    /// derivation, most recent first (used by the conversation-lookup
    /// step of flow assignment, §4.7).
    pub fn find_task_by_external_id(&self, external_id: &str) -> AppResult<Option<Task>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT * FROM tasks WHERE external_id = ?1 AND deleted = 0
             ORDER BY created_at DESC LIMIT 1",
            params![external_id],
            row_to_task,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Tasks stuck `running` with no completion past the worker-loss
    /// threshold (§4.5 Failure semantics sweep).
    pub fn find_lost_tasks(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<Vec<Task>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status = 'running' AND started_at <= ?1 AND deleted = 0",
        )?;
        let tasks = stmt
            .query_map(params![older_than.to_rfc3339()], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Terminal transition plus every aggregate it feeds, in one
    /// transaction (§4.5 step 7 finalize): the task row, the assistant
    /// [`Message`](crate::models::Message) appended to its conversation
    /// on success, the conversation's running cost/token/task totals, and
    /// the session's running cost/task totals. `update_task_status` alone
    /// only touches `tasks` — this is what the worker pool calls instead
    /// so a crash between the transition and the aggregate updates can't
    /// happen.
    pub fn finalize_task(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        outcome: TaskOutcome,
        message_id: &str,
    ) -> AppResult<()> {
        if !new_status.is_terminal() {
            return Err(invalid("finalize_task requires a terminal status"));
        }
        if new_status != TaskStatus::Cancelled
            && (outcome.cost_usd < 0.0
                || outcome.input_tokens < 0
                || outcome.output_tokens < 0
                || outcome.duration_seconds < 0.0)
        {
            return Err(invalid("terminal accounting fields must be non-negative"));
        }

        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;

        let (current, session_id, conversation_id): (String, String, Option<String>) = tx
            .query_row(
                "SELECT status, session_id, conversation_id FROM tasks WHERE id = ?1 AND deleted = 0",
                params![task_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("task not found: {task_id}")))?;
        let current = TaskStatus::from_str(&current).unwrap_or(TaskStatus::Failed);

        let legal = matches!(
            (current, new_status),
            (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        );
        if !legal {
            return Err(invalid(format!(
                "illegal transition {current:?} -> {new_status:?}"
            )));
        }

        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE tasks SET status = ?2, output_stream = ?3, cost_usd = ?4,
                input_tokens = ?5, output_tokens = ?6, duration_seconds = ?7,
                error = ?8, completed_at = ?9
             WHERE id = ?1",
            params![
                task_id,
                new_status.as_str(),
                outcome.output_stream,
                outcome.cost_usd,
                outcome.input_tokens,
                outcome.output_tokens,
                outcome.duration_seconds,
                outcome.error,
                now,
            ],
        )?;

        if new_status == TaskStatus::Completed {
            if let Some(conversation_id) = &conversation_id {
                let seq: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
                    params![conversation_id],
                    |r| r.get(0),
                )?;
                tx.execute(
                    "INSERT INTO messages (id, conversation_id, role, content, task_id, created_at, seq)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        message_id,
                        conversation_id,
                        MessageRole::Assistant.as_str(),
                        outcome.output_stream,
                        task_id,
                        now,
                        seq,
                    ],
                )?;
                tx.execute(
                    "UPDATE conversations SET
                        total_cost_usd = total_cost_usd + ?2,
                        total_input_tokens = total_input_tokens + ?3,
                        total_output_tokens = total_output_tokens + ?4,
                        task_count = task_count + 1,
                        updated_at = ?5
                     WHERE id = ?1",
                    params![
                        conversation_id,
                        outcome.cost_usd,
                        outcome.input_tokens,
                        outcome.output_tokens,
                        now,
                    ],
                )?;
            }

            tx.execute(
                "UPDATE sessions SET total_cost_usd = total_cost_usd + ?2, task_count = task_count + 1
                 WHERE id = ?1",
                params![session_id, outcome.cost_usd],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn soft_delete_task(&self, task_id: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n = conn.execute(
            "UPDATE tasks SET deleted = 1 WHERE id = ?1",
            params![task_id],
        )?;
        if n == 0 {
            return Err(AppError::NotFound(format!("task not found: {task_id}")));
        }
        Ok(())
    }
}
