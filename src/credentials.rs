//! Credentials artifact (§6.5): read/validate/write the JSON file the CLI
//! Runner's headless LM CLI authenticates with.
//!
//! Kept as a flat JSON file rather than a `Store` table — it is operator-
//! supplied, rotated out of band, and has nothing to do with task/
//! conversation persistence.

use crate::error::{AppError, AppResult};
use crate::models::Credentials;
use std::path::Path;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CredentialsStatus {
    pub present: bool,
    pub expired: bool,
    pub expires_at: Option<i64>,
}

/// Current wall-clock time in milliseconds since epoch, as the same unit
/// `Credentials::expires_at` uses.
fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `/credentials/status`: whether a credentials file exists at
/// `path` and, if so, whether it has already expired.
pub fn status(path: &Path) -> CredentialsStatus {
    match read(path) {
        Ok(creds) => CredentialsStatus {
            present: true,
            expired: creds.expires_at <= now_millis(),
            expires_at: Some(creds.expires_at),
        },
        Err(_) => CredentialsStatus {
            present: false,
            expired: false,
            expires_at: None,
        },
    }
}

pub fn read(path: &Path) -> AppResult<Credentials> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::NotFound(format!("credentials file unreadable: {e}")))?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::Invalid(format!("credentials file malformed: {e}")))
}

/// `/credentials/upload`: reject an already-expired credential outright
/// rather than writing a file that can never be used (spec scenario 6).
pub fn upload(path: &Path, credentials: &Credentials) -> AppResult<()> {
    if credentials.access_token.trim().is_empty() {
        return Err(AppError::Invalid("access_token must not be empty".to_string()));
    }
    if credentials.access_token.len() < 10 || credentials.refresh_token.len() < 10 {
        return Err(AppError::Invalid(
            "access_token and refresh_token must each be at least 10 characters".to_string(),
        ));
    }
    if credentials.expires_at <= now_millis() {
        return Err(AppError::Invalid("credentials are already expired".to_string()));
    }
    let json = serde_json::to_string_pretty(credentials)
        .map_err(|e| AppError::Invalid(format!("failed to serialize credentials: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| AppError::Backend(format!("failed to write credentials file: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn creds(expires_at: i64) -> Credentials {
        Credentials {
            access_token: "access-token-value".to_string(),
            refresh_token: "refresh-token-value".to_string(),
            expires_at,
        }
    }

    #[test]
    fn status_reports_absent_when_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let status = status(&path);
        assert!(!status.present);
        assert!(!status.expired);
    }

    #[test]
    fn upload_then_status_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let future = now_millis() + 3_600_000;
        upload(&path, &creds(future)).unwrap();
        let status = status(&path);
        assert!(status.present);
        assert!(!status.expired);
        assert_eq!(status.expires_at, Some(future));
    }

    #[test]
    fn upload_rejects_already_expired_credentials() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let past = now_millis() - 1_000;
        let err = upload(&path, &creds(past)).unwrap_err();
        assert!(matches!(err, AppError::Invalid(_)));
        assert!(!path.exists());
    }

    #[test]
    fn upload_rejects_tokens_shorter_than_ten_characters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let mut short = creds(now_millis() + 3_600_000);
        short.access_token = "short".to_string();
        let err = upload(&path, &short).unwrap_err();
        assert!(matches!(err, AppError::Invalid(_)));
        assert!(!path.exists());
    }

    #[test]
    fn status_detects_expiry_of_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let future = now_millis() + 3_600_000;
        upload(&path, &creds(future)).unwrap();
        // simulate the clock passing the expiry by writing an already-past value directly
        std::fs::write(&path, serde_json::to_string(&creds(now_millis() - 1)).unwrap()).unwrap();
        let status = status(&path);
        assert!(status.present);
        assert!(status.expired);
    }
}
