//! Invocation of the external headless LM CLI (C4).
//!
//! Spawn via `tokio::process::Command` with `Stdio::piped()`, a
//! `tokio::time::timeout` wrapping the whole invocation, and an explicit
//! `child.kill()` on timeout or cancellation. Stdout is a stream of
//! newline-delimited JSON records that must reach the caller as they
//! arrive, so it is read line-by-line with `AsyncBufReadExt::lines`
//! instead of slurped whole; stderr is drained into a bounded
//! last-N-lines buffer, used only for diagnostics on a non-zero exit.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STDERR_TAIL_LINES: usize = 20;

/// One decoded line of the CLI's wire protocol (§6.3).
#[derive(Debug, Clone)]
pub enum CliEvent {
    Assistant(serde_json::Value),
    ToolUse(serde_json::Value),
    ToolResult(serde_json::Value),
    /// Forwarded verbatim for any `type` this runner doesn't special-case.
    Unknown(serde_json::Value),
}

/// Final accounting extracted from the terminal `result` record.
#[derive(Debug, Clone, Default)]
pub struct CliResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub cost_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub duration_seconds: f64,
}

#[derive(Debug)]
pub enum CliError {
    SpawnFailed(String),
    Timeout,
    Cancelled,
    NonZeroExit { code: i32, last_stderr_line: String },
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::SpawnFailed(msg) => write!(f, "failed to spawn CLI: {msg}"),
            CliError::Timeout => write!(f, "CLI invocation timed out"),
            CliError::Cancelled => write!(f, "CLI invocation cancelled"),
            CliError::NonZeroExit { code, last_stderr_line } => {
                write!(f, "CLI exited with code {code}: {last_stderr_line}")
            }
        }
    }
}

impl std::error::Error for CliError {}

/// Everything needed for one CLI invocation.
pub struct CliInvocation {
    pub binary: String,
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
    pub model: String,
    pub allowed_tools: Vec<String>,
    pub timeout: Duration,
}

/// Spawn `invocation.binary`, stream its stdout line-by-line into `sink`,
/// and return the final accounting once the terminal `result` line
/// arrives (or the process exits, whichever happens first).
pub async fn invoke(
    invocation: CliInvocation,
    sink: mpsc::Sender<CliEvent>,
    cancel: CancellationToken,
) -> Result<CliResult, CliError> {
    let mut command = Command::new(&invocation.binary);
    command
        .arg("--print")
        .arg(&invocation.prompt)
        .arg("--model")
        .arg(&invocation.model)
        .arg("--output-format")
        .arg("stream-json")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if !invocation.allowed_tools.is_empty() {
        command.arg("--allowed-tools").arg(invocation.allowed_tools.join(","));
    }
    if let Some(dir) = &invocation.working_dir {
        command.current_dir(dir);
    }

    let start = Instant::now();
    let run = async move {
        let mut child = command.spawn().map_err(|e| CliError::SpawnFailed(e.to_string()))?;
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut result: Option<CliResult> = None;
        let mut transcript = String::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Err(CliError::Cancelled);
                }
                line = stdout_lines.next_line() => {
                    match line {
                        Ok(Some(raw)) => {
                            if let Some(outcome) = handle_line(&raw, &sink, &mut transcript).await {
                                result = Some(outcome);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = child.kill().await;
                            return Err(CliError::SpawnFailed(e.to_string()));
                        }
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Ok(Some(raw)) = line {
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(raw);
                    }
                }
            }
        }

        // Drain any stderr lines that arrived after stdout closed.
        while let Ok(Some(raw)) = stderr_lines.next_line().await {
            if stderr_tail.len() == STDERR_TAIL_LINES {
                stderr_tail.pop_front();
            }
            stderr_tail.push_back(raw);
        }

        let status = child.wait().await.map_err(|e| CliError::SpawnFailed(e.to_string()))?;
        if !status.success() {
            return Err(CliError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                last_stderr_line: stderr_tail.back().cloned().unwrap_or_default(),
            });
        }

        let mut result = result.unwrap_or_default();
        if result.output.is_empty() {
            result.output = transcript;
        }
        result.duration_seconds = start.elapsed().as_secs_f64();
        Ok(result)
    };

    match tokio::time::timeout(invocation.timeout, run).await {
        Ok(inner) => inner,
        Err(_) => Err(CliError::Timeout),
    }
}

/// Decode one stdout line, forward it to `sink`, and return `Some` with
/// final accounting if this was the terminal `result` record. Malformed
/// JSON is logged and skipped per §4.4.
async fn handle_line(
    raw: &str,
    sink: &mpsc::Sender<CliEvent>,
    transcript: &mut String,
) -> Option<CliResult> {
    if raw.trim().is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("skipping malformed CLI output line: {e}");
            return None;
        }
    };
    let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match kind {
        "assistant" => {
            if let Some(text) = extract_text(&value) {
                transcript.push_str(&text);
            }
            let _ = sink.send(CliEvent::Assistant(value)).await;
            None
        }
        "tool_use" => {
            let _ = sink.send(CliEvent::ToolUse(value)).await;
            None
        }
        "tool_result" => {
            let _ = sink.send(CliEvent::ToolResult(value)).await;
            None
        }
        "result" => {
            let cost_usd = value.get("total_cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let usage = value.get("usage");
            let input_tokens = usage
                .and_then(|u| u.get("input_tokens"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let output_tokens = usage
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let output = value
                .get("result")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_default();
            let error = value
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Some(CliResult {
                success: error.is_none(),
                output,
                error,
                cost_usd,
                input_tokens,
                output_tokens,
                duration_seconds: 0.0,
            })
        }
        _ => {
            let _ = sink.send(CliEvent::Unknown(value)).await;
            None
        }
    }
}

fn extract_text(value: &serde_json::Value) -> Option<String> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .or_else(|| value.get("text").and_then(|v| v.as_str()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_existent_binary_surfaces_spawn_failure() {
        let (tx, _rx) = mpsc::channel(8);
        let invocation = CliInvocation {
            binary: "/nonexistent/definitely-not-a-real-cli".to_string(),
            prompt: "hello".to_string(),
            working_dir: None,
            model: "claude-sonnet-4".to_string(),
            allowed_tools: vec![],
            timeout: Duration::from_secs(5),
        };
        let result = invoke(invocation, tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(CliError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn decodes_result_line_with_usage_and_cost() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut transcript = String::new();
        let line = r#"{"type":"result","total_cost_usd":0.042,"usage":{"input_tokens":10,"output_tokens":20},"result":"done"}"#;
        let outcome = handle_line(line, &tx, &mut transcript).await.unwrap();
        assert_eq!(outcome.cost_usd, 0.042);
        assert_eq!(outcome.input_tokens, 10);
        assert_eq!(outcome.output_tokens, 20);
        assert_eq!(outcome.output, "done");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_not_fatal() {
        let (tx, _rx) = mpsc::channel(8);
        let mut transcript = String::new();
        assert!(handle_line("not json at all", &tx, &mut transcript)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn unknown_type_is_forwarded_verbatim() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut transcript = String::new();
        handle_line(r#"{"type":"progress","pct":50}"#, &tx, &mut transcript).await;
        match rx.try_recv().unwrap() {
            CliEvent::Unknown(v) => assert_eq!(v["pct"], 50),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }
}
