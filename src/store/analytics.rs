//! Cost/usage aggregates backing `/analytics/*` (§6.1).
//!
//! All three queries read the `tasks` table directly rather than maintaining
//! a separate rollup table — the daemon's task volume doesn't warrant one,
//! and `finalize_task` already keeps per-conversation/per-session totals for
//! the paths that do need O(1) reads.

use super::Store;
use crate::error::AppResult;
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsSummary {
    pub tasks_today: u64,
    pub cost_today_usd: f64,
    pub tasks_total: u64,
    pub cost_total_usd: f64,
    pub tasks_running: u64,
    pub tasks_failed_today: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyCost {
    pub day: String,
    pub cost_usd: f64,
    pub task_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubagentCost {
    pub agent_name: String,
    pub cost_usd: f64,
    pub task_count: u64,
}

impl Store {
    /// `/analytics/summary`: today's and all-time totals plus the current
    /// `running`/`failed` counts an operator dashboard cares about.
    pub fn analytics_summary(&self) -> AppResult<AnalyticsSummary> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();

        let (tasks_today, cost_today_usd): (u64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(cost_usd), 0.0) FROM tasks
             WHERE deleted = 0 AND substr(created_at, 1, 10) = ?1",
            params![today],
            |r| Ok((r.get::<_, i64>(0)? as u64, r.get(1)?)),
        )?;

        let (tasks_total, cost_total_usd): (u64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(cost_usd), 0.0) FROM tasks WHERE deleted = 0",
            [],
            |r| Ok((r.get::<_, i64>(0)? as u64, r.get(1)?)),
        )?;

        let tasks_running: u64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE deleted = 0 AND status = 'running'",
            [],
            |r| r.get::<_, i64>(0).map(|v| v as u64),
        )?;

        let tasks_failed_today: u64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE deleted = 0 AND status = 'failed' AND substr(created_at, 1, 10) = ?1",
            params![today],
            |r| r.get::<_, i64>(0).map(|v| v as u64),
        )?;

        Ok(AnalyticsSummary {
            tasks_today,
            cost_today_usd,
            tasks_total,
            cost_total_usd,
            tasks_running,
            tasks_failed_today,
        })
    }

    /// `/analytics/costs/daily?days=N`: one row per calendar day with at
    /// least one task, most recent first, over the trailing `days` window.
    pub fn costs_daily(&self, days: u32) -> AppResult<Vec<DailyCost>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let since = (chrono::Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 1, 10) AS day, COALESCE(SUM(cost_usd), 0.0), COUNT(*)
             FROM tasks
             WHERE deleted = 0 AND created_at >= ?1
             GROUP BY day
             ORDER BY day DESC",
        )?;
        let rows = stmt
            .query_map(params![since], |r| {
                Ok(DailyCost {
                    day: r.get(0)?,
                    cost_usd: r.get(1)?,
                    task_count: r.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `/analytics/costs/by-subagent?days=N`: cost and task count grouped
    /// by `agent_name` over the trailing `days` window, highest cost first.
    pub fn costs_by_subagent(&self, days: u32) -> AppResult<Vec<SubagentCost>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let since = (chrono::Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT agent_name, COALESCE(SUM(cost_usd), 0.0), COUNT(*)
             FROM tasks
             WHERE deleted = 0 AND created_at >= ?1
             GROUP BY agent_name
             ORDER BY 2 DESC",
        )?;
        let rows = stmt
            .query_map(params![since], |r| {
                Ok(SubagentCost {
                    agent_name: r.get(0)?,
                    cost_usd: r.get(1)?,
                    task_count: r.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentKind, NewTask, TaskOutcome, TaskSource, TaskStatus};

    fn seed_task(store: &Store, agent_name: &str, cost_usd: f64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        store
            .create_task(NewTask {
                id: id.clone(),
                session_id: "sess-1".to_string(),
                conversation_id: None,
                flow_id: "flow-1".to_string(),
                external_id: None,
                agent_name: agent_name.to_string(),
                agent_kind: AgentKind::Default,
                input: "do work".to_string(),
                source: TaskSource::Chat,
                source_metadata: serde_json::Value::Null,
                parent_task_id: None,
            })
            .unwrap();
        store
            .update_task_status(&id, TaskStatus::Running, None)
            .unwrap();
        store
            .update_task_status(
                &id,
                TaskStatus::Completed,
                Some(TaskOutcome {
                    cost_usd,
                    ..Default::default()
                }),
            )
            .unwrap();
        id
    }

    #[test]
    fn summary_counts_completed_tasks_today() {
        let store = Store::open_in_memory().unwrap();
        seed_task(&store, "planner", 0.50);
        seed_task(&store, "executor", 1.25);
        let summary = store.analytics_summary().unwrap();
        assert_eq!(summary.tasks_today, 2);
        assert!((summary.cost_today_usd - 1.75).abs() < 1e-9);
        assert_eq!(summary.tasks_total, 2);
        assert_eq!(summary.tasks_running, 0);
    }

    #[test]
    fn costs_by_subagent_groups_and_sums() {
        let store = Store::open_in_memory().unwrap();
        seed_task(&store, "planner", 1.0);
        seed_task(&store, "planner", 2.0);
        seed_task(&store, "executor", 0.5);
        let rows = store.costs_by_subagent(30).unwrap();
        let planner = rows.iter().find(|r| r.agent_name == "planner").unwrap();
        assert_eq!(planner.task_count, 2);
        assert!((planner.cost_usd - 3.0).abs() < 1e-9);
    }

    #[test]
    fn costs_daily_includes_today() {
        let store = Store::open_in_memory().unwrap();
        seed_task(&store, "planner", 2.5);
        let rows = store.costs_daily(7).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].cost_usd - 2.5).abs() < 1e-9);
    }
}
