use super::{parse_ts, Store};
use crate::error::{AppError, AppResult};
use crate::models::{Account, Machine};
use rusqlite::{params, OptionalExtension, Row};

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get("id")?,
        display_name: row.get("display_name")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

fn row_to_machine(row: &Row) -> rusqlite::Result<Machine> {
    Ok(Machine {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        hostname: row.get("hostname")?,
        last_heartbeat: parse_ts(&row.get::<_, String>("last_heartbeat")?),
    })
}

impl Store {
    pub fn create_account(&self, id: &str, display_name: &str) -> AppResult<Account> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        let result = conn.execute(
            "INSERT INTO accounts (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![id, display_name, now],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(AppError::Conflict(format!("account id already exists: {id}")))
            }
            Err(e) => return Err(e.into()),
        }
        conn.query_row(
            "SELECT * FROM accounts WHERE id = ?1",
            params![id],
            row_to_account,
        )
        .map_err(AppError::from)
    }

    pub fn get_account(&self, id: &str) -> AppResult<Account> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT * FROM accounts WHERE id = ?1",
            params![id],
            row_to_account,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("account not found: {id}")))
    }

    pub fn list_accounts(&self) -> AppResult<Vec<Account>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM accounts ORDER BY created_at ASC")?;
        let rows = stmt
            .query_map([], row_to_account)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_account(&self, id: &str) -> AppResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n = conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(AppError::NotFound(format!("account not found: {id}")));
        }
        Ok(())
    }

    /// Machine heartbeat: inserts on first contact, otherwise bumps
    /// `last_heartbeat` (§3 Machine).
    pub fn touch_machine(&self, id: &str, account_id: &str, hostname: &str) -> AppResult<Machine> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO machines (id, account_id, hostname, last_heartbeat)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET hostname = excluded.hostname, last_heartbeat = excluded.last_heartbeat",
            params![id, account_id, hostname, now],
        )?;
        conn.query_row(
            "SELECT * FROM machines WHERE id = ?1",
            params![id],
            row_to_machine,
        )
        .map_err(AppError::from)
    }

    pub fn list_machines(&self, account_id: &str) -> AppResult<Vec<Machine>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT * FROM machines WHERE account_id = ?1 ORDER BY last_heartbeat DESC")?;
        let rows = stmt
            .query_map(params![account_id], row_to_machine)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
