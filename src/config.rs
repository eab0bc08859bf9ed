//! Daemon configuration.
//!
//! A plain struct with a `Default` impl, no TOML/YAML parsing dependency,
//! plus environment-variable overrides for every knob (§6.4).

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the daemon.
///
/// Constructed via [`AppConfig::from_env`]; every field has a sensible
/// default so the daemon boots with zero environment variables set
/// (pointing at a local SQLite file and no webhook secrets configured —
/// signature-requiring webhooks simply fail closed until secrets are
/// supplied).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP/WebSocket server binds to.
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// Number of concurrent task workers (§4.5).
    pub worker_count: usize,
    /// Messages fetched for conversation context (§4.5 step 4).
    pub context_window: usize,
    /// Output chunks are flushed to Store after this many chunks...
    pub flush_every_chunks: usize,
    /// ...or after this many milliseconds, whichever comes first.
    pub flush_interval: Duration,
    /// Path to the external headless LM CLI binary.
    pub cli_binary: String,
    /// Default timeout for a single CLI invocation.
    pub cli_timeout: Duration,
    /// How often the worker-loss sweep runs.
    pub sweep_interval: Duration,
    /// A `running` task with no output activity for longer than this is
    /// reclaimed to `failed` by the sweep (§4.5 Failure semantics).
    pub worker_loss_timeout: Duration,
    /// Ring buffer size per task in the Output Hub (§4.3).
    pub hub_ring_buffer: usize,
    /// Idle threshold after which a disconnected Session is pruned.
    pub session_prune_after: Duration,
    /// Public domain used to build webhook URLs surfaced by
    /// `/webhooks/status`.
    pub public_domain: Option<String>,
    /// Path to the credentials JSON artifact (§6.5).
    pub credentials_path: PathBuf,
    /// Bearer token the admin API requires, if set. `None` leaves the
    /// admin surface open, matching local/dev deployments.
    pub admin_bearer_token: Option<String>,
    /// Source IPs allowed to reach the admin API. Empty means unrestricted.
    pub admin_allowed_ips: Vec<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or_string("AGENTRELAY_BIND_ADDR", "0.0.0.0:8080"),
            database_path: PathBuf::from(env_or_string(
                "AGENTRELAY_DB_PATH",
                "agentrelay.sqlite3",
            )),
            worker_count: env_or("AGENTRELAY_WORKER_COUNT", 5usize),
            context_window: env_or("AGENTRELAY_CONTEXT_WINDOW", 20usize),
            flush_every_chunks: env_or("AGENTRELAY_FLUSH_EVERY_CHUNKS", 16usize),
            flush_interval: Duration::from_millis(env_or("AGENTRELAY_FLUSH_INTERVAL_MS", 500u64)),
            cli_binary: env_or_string("AGENTRELAY_CLI_BINARY", "claude"),
            cli_timeout: Duration::from_secs(env_or("AGENTRELAY_CLI_TIMEOUT_SECS", 600u64)),
            sweep_interval: Duration::from_secs(env_or("AGENTRELAY_SWEEP_INTERVAL_SECS", 300u64)),
            worker_loss_timeout: Duration::from_secs(env_or(
                "AGENTRELAY_WORKER_LOSS_TIMEOUT_SECS",
                1800u64,
            )),
            hub_ring_buffer: env_or("AGENTRELAY_HUB_RING_BUFFER", 256usize),
            session_prune_after: Duration::from_secs(env_or(
                "AGENTRELAY_SESSION_PRUNE_AFTER_SECS",
                3600u64,
            )),
            public_domain: std::env::var("AGENTRELAY_PUBLIC_DOMAIN").ok(),
            credentials_path: PathBuf::from(env_or_string(
                "AGENTRELAY_CREDENTIALS_PATH",
                "credentials.json",
            )),
            admin_bearer_token: std::env::var("AGENTRELAY_ADMIN_TOKEN").ok(),
            admin_allowed_ips: std::env::var("AGENTRELAY_ADMIN_ALLOWED_IPS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_path: PathBuf::from("agentrelay.sqlite3"),
            worker_count: 5,
            context_window: 20,
            flush_every_chunks: 16,
            flush_interval: Duration::from_millis(500),
            cli_binary: "claude".to_string(),
            cli_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
            worker_loss_timeout: Duration::from_secs(1800),
            hub_ring_buffer: 256,
            session_prune_after: Duration::from_secs(3600),
            public_domain: None,
            credentials_path: PathBuf::from("credentials.json"),
            admin_bearer_token: None,
            admin_allowed_ips: Vec::new(),
        }
    }
}

/// Per-agent-kind model routing (§4.5 step 5, §9 design notes).
///
/// A small enumerated config: `{planning, brain, executor, default}` each
/// map to a model name, individually overridable by an environment
/// variable so operators can swap models without a redeploy.
#[derive(Debug, Clone)]
pub struct ModelRouting {
    pub planning: String,
    pub brain: String,
    pub executor: String,
    pub default: String,
}

impl ModelRouting {
    pub fn from_env() -> Self {
        Self {
            planning: env_or_string("AGENTRELAY_MODEL_PLANNING", "claude-opus-4"),
            brain: env_or_string("AGENTRELAY_MODEL_BRAIN", "claude-opus-4"),
            executor: env_or_string("AGENTRELAY_MODEL_EXECUTOR", "claude-sonnet-4"),
            default: env_or_string("AGENTRELAY_MODEL_DEFAULT", "claude-sonnet-4"),
        }
    }

    pub fn resolve(&self, kind: crate::models::AgentKind) -> &str {
        match kind {
            crate::models::AgentKind::Planning => &self.planning,
            crate::models::AgentKind::Brain => &self.brain,
            crate::models::AgentKind::Executor => &self.executor,
            crate::models::AgentKind::Default => &self.default,
        }
    }
}

impl Default for ModelRouting {
    fn default() -> Self {
        Self {
            planning: "claude-opus-4".to_string(),
            brain: "claude-opus-4".to_string(),
            executor: "claude-sonnet-4".to_string(),
            default: "claude-sonnet-4".to_string(),
        }
    }
}
