use super::{parse_ts, Store};
use crate::error::{AppError, AppResult};
use crate::models::{
    WebhookAction, WebhookCommand, WebhookConfig, WebhookConfigSource, WebhookEvent,
};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_config_base(row: &Row) -> rusqlite::Result<WebhookConfig> {
    let source_raw: String = row.get("source")?;
    let created_at: String = row.get("created_at")?;
    Ok(WebhookConfig {
        id: row.get("id")?,
        provider: row.get("provider")?,
        endpoint_path: row.get("endpoint_path")?,
        default_agent: row.get("default_agent")?,
        secret_env_var: row.get("secret_env_var")?,
        command_prefix: row.get("command_prefix")?,
        default_command: row.get("default_command")?,
        delegation_preamble: row.get("delegation_preamble")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        commands: Vec::new(),
        source: if source_raw == "builtin" {
            WebhookConfigSource::Builtin
        } else {
            WebhookConfigSource::Dynamic
        },
        created_at: parse_ts(&created_at),
    })
}

fn row_to_command(row: &Row) -> rusqlite::Result<WebhookCommand> {
    let aliases_raw: String = row.get("aliases")?;
    let conditions_raw: String = row.get("conditions")?;
    let action_raw: String = row.get("action")?;
    Ok(WebhookCommand {
        name: row.get("name")?,
        aliases: serde_json::from_str(&aliases_raw).unwrap_or_default(),
        target_agent: row.get("target_agent")?,
        prompt_template: row.get("prompt_template")?,
        trigger: row.get("trigger_event")?,
        conditions: serde_json::from_str(&conditions_raw).unwrap_or_default(),
        priority: row.get("priority")?,
        action: serde_json::from_str(&action_raw).unwrap_or(WebhookAction::Respond),
    })
}

impl Store {
    pub fn create_webhook_config(&self, config: &WebhookConfig) -> AppResult<()> {
        if config.enabled
            && crate::webhook::builtin_configs()
                .iter()
                .any(|b| b.endpoint_path == config.endpoint_path)
        {
            return Err(AppError::Conflict(format!(
                "endpoint path already in use: {}",
                config.endpoint_path
            )));
        }

        let conn = self.conn.lock().expect("store mutex poisoned");
        let existing_enabled: i64 = conn.query_row(
            "SELECT COUNT(*) FROM webhook_configs WHERE endpoint_path = ?1 AND enabled = 1",
            params![config.endpoint_path],
            |r| r.get(0),
        )?;
        if config.enabled && existing_enabled > 0 {
            return Err(AppError::Conflict(format!(
                "endpoint path already in use: {}",
                config.endpoint_path
            )));
        }
        conn.execute(
            "INSERT INTO webhook_configs (
                id, provider, endpoint_path, default_agent, secret_env_var,
                command_prefix, default_command, delegation_preamble, enabled, source, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                config.id,
                config.provider,
                config.endpoint_path,
                config.default_agent,
                config.secret_env_var,
                config.command_prefix,
                config.default_command,
                config.delegation_preamble,
                config.enabled as i64,
                match config.source {
                    WebhookConfigSource::Builtin => "builtin",
                    WebhookConfigSource::Dynamic => "dynamic",
                },
                config.created_at.to_rfc3339(),
            ],
        )?;
        for command in &config.commands {
            self.add_webhook_command(&config.id, command)?;
        }
        Ok(())
    }

    pub fn add_webhook_command(&self, webhook_id: &str, command: &WebhookCommand) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO webhook_commands (
                webhook_id, name, aliases, target_agent, prompt_template,
                trigger_event, conditions, priority, action
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                webhook_id,
                command.name,
                serde_json::to_string(&command.aliases).unwrap_or_default(),
                command.target_agent,
                command.prompt_template,
                command.trigger,
                serde_json::to_string(&command.conditions).unwrap_or_default(),
                command.priority,
                serde_json::to_string(&command.action).unwrap_or_default(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_webhook_command(&self, webhook_id: &str, name: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n = conn.execute(
            "DELETE FROM webhook_commands WHERE webhook_id = ?1 AND name = ?2",
            params![webhook_id, name],
        )?;
        if n == 0 {
            return Err(AppError::NotFound(format!(
                "command not found: {webhook_id}/{name}"
            )));
        }
        Ok(())
    }

    fn load_commands(&self, webhook_id: &str) -> AppResult<Vec<WebhookCommand>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT * FROM webhook_commands WHERE webhook_id = ?1 ORDER BY priority ASC, name ASC",
        )?;
        let rows = stmt
            .query_map(params![webhook_id], row_to_command)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_webhook_config(&self, id: &str) -> AppResult<WebhookConfig> {
        let mut config = {
            let conn = self.conn.lock().expect("store mutex poisoned");
            conn.query_row(
                "SELECT * FROM webhook_configs WHERE id = ?1",
                params![id],
                row_to_config_base,
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("webhook config not found: {id}")))?
        };
        config.commands = self.load_commands(id)?;
        Ok(config)
    }

    /// Dynamic configs matching a provider, for merging with built-ins at
    /// match time (§4.6.4, §6.1 `/webhooks`).
    pub fn list_dynamic_webhook_configs(&self, provider: Option<&str>) -> AppResult<Vec<WebhookConfig>> {
        let bases: Vec<WebhookConfig> = {
            let conn = self.conn.lock().expect("store mutex poisoned");
            if let Some(provider) = provider {
                let mut stmt = conn.prepare(
                    "SELECT * FROM webhook_configs WHERE source = 'dynamic' AND provider = ?1",
                )?;
                stmt.query_map(params![provider], row_to_config_base)?
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                let mut stmt =
                    conn.prepare("SELECT * FROM webhook_configs WHERE source = 'dynamic'")?;
                stmt.query_map([], row_to_config_base)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        bases
            .into_iter()
            .map(|mut c| {
                c.commands = self.load_commands(&c.id)?;
                Ok(c)
            })
            .collect()
    }

    /// `LookupByPath(provider, webhook id?)` — returns the dynamic row
    /// bound to `provider/<webhook_id>`, if any (§4.1).
    pub fn lookup_webhook_by_path(
        &self,
        provider: &str,
        webhook_id: &str,
    ) -> AppResult<Option<WebhookConfig>> {
        let base = {
            let conn = self.conn.lock().expect("store mutex poisoned");
            conn.query_row(
                "SELECT * FROM webhook_configs WHERE provider = ?1 AND id = ?2 AND enabled = 1",
                params![provider, webhook_id],
                row_to_config_base,
            )
            .optional()?
        };
        match base {
            Some(mut config) => {
                config.commands = self.load_commands(&config.id)?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    pub fn delete_webhook_config(&self, id: &str) -> AppResult<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM webhook_commands WHERE webhook_id = ?1", params![id])?;
        let n = tx.execute("DELETE FROM webhook_configs WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(AppError::NotFound(format!("webhook config not found: {id}")));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn set_webhook_enabled(&self, id: &str, enabled: bool) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n = conn.execute(
            "UPDATE webhook_configs SET enabled = ?2 WHERE id = ?1",
            params![id, enabled as i64],
        )?;
        if n == 0 {
            return Err(AppError::NotFound(format!("webhook config not found: {id}")));
        }
        Ok(())
    }

    /// Always succeeds barring storage failure (§4.1 RecordWebhookEvent).
    pub fn record_webhook_event(&self, event: &WebhookEvent) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO webhook_events (
                id, received_at, webhook_id, provider, event_type, raw_payload,
                matched_command, created_task_id, response_sent
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.received_at.to_rfc3339(),
                event.webhook_id,
                event.provider,
                event.event_type,
                serde_json::to_string(&event.raw_payload).unwrap_or_else(|_| "null".to_string()),
                event.matched_command,
                event.created_task_id,
                event.response_sent as i64,
            ],
        )?;
        Ok(())
    }
}
