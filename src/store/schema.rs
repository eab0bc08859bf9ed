//! SQLite schema. Created idempotently on every open (`CREATE TABLE IF
//! NOT EXISTS`, no migration framework — the schema is small and stable).

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id              TEXT PRIMARY KEY,
    user_id         TEXT,
    machine_id      TEXT,
    total_cost_usd  REAL NOT NULL DEFAULT 0,
    task_count      INTEGER NOT NULL DEFAULT 0,
    connected_at    TEXT NOT NULL,
    disconnected_at TEXT
);

CREATE TABLE IF NOT EXISTS conversations (
    id                  TEXT PRIMARY KEY,
    title               TEXT,
    user_id             TEXT,
    flow_id             TEXT NOT NULL,
    total_cost_usd      REAL NOT NULL DEFAULT 0,
    total_input_tokens  INTEGER NOT NULL DEFAULT 0,
    total_output_tokens INTEGER NOT NULL DEFAULT 0,
    task_count          INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    archived            INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_conversations_flow_id ON conversations(flow_id);

CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    task_id         TEXT,
    created_at      TEXT NOT NULL,
    seq             INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at, seq);

CREATE TABLE IF NOT EXISTS tasks (
    id               TEXT PRIMARY KEY,
    session_id       TEXT NOT NULL,
    conversation_id  TEXT,
    flow_id          TEXT NOT NULL,
    external_id      TEXT,
    agent_name       TEXT NOT NULL,
    agent_kind       TEXT NOT NULL,
    status           TEXT NOT NULL,
    input            TEXT NOT NULL,
    output_stream    TEXT NOT NULL DEFAULT '',
    cost_usd         REAL NOT NULL DEFAULT 0,
    input_tokens     INTEGER NOT NULL DEFAULT 0,
    output_tokens    INTEGER NOT NULL DEFAULT 0,
    duration_seconds REAL NOT NULL DEFAULT 0,
    source           TEXT NOT NULL,
    source_metadata  TEXT NOT NULL DEFAULT '{}',
    parent_task_id   TEXT,
    error            TEXT,
    created_at       TEXT NOT NULL,
    started_at       TEXT,
    completed_at     TEXT,
    deleted          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_flow ON tasks(flow_id);
CREATE INDEX IF NOT EXISTS idx_tasks_external_id ON tasks(external_id);

CREATE TABLE IF NOT EXISTS webhook_configs (
    id              TEXT PRIMARY KEY,
    provider        TEXT NOT NULL,
    endpoint_path   TEXT NOT NULL,
    default_agent   TEXT NOT NULL,
    secret_env_var  TEXT,
    command_prefix  TEXT,
    default_command TEXT,
    delegation_preamble TEXT,
    enabled         INTEGER NOT NULL DEFAULT 1,
    source          TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_webhook_configs_enabled_path
    ON webhook_configs(endpoint_path)
    WHERE enabled = 1;

CREATE TABLE IF NOT EXISTS webhook_commands (
    webhook_id      TEXT NOT NULL,
    name            TEXT NOT NULL,
    aliases         TEXT NOT NULL DEFAULT '[]',
    target_agent    TEXT NOT NULL,
    prompt_template TEXT NOT NULL,
    trigger_event   TEXT,
    conditions      TEXT NOT NULL DEFAULT '{}',
    priority        INTEGER NOT NULL DEFAULT 0,
    action          TEXT NOT NULL,
    PRIMARY KEY (webhook_id, name)
);

CREATE TABLE IF NOT EXISTS webhook_events (
    id                TEXT PRIMARY KEY,
    received_at       TEXT NOT NULL,
    webhook_id        TEXT NOT NULL,
    provider          TEXT NOT NULL,
    event_type        TEXT NOT NULL,
    raw_payload       TEXT NOT NULL,
    matched_command   TEXT,
    created_task_id   TEXT,
    response_sent     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS accounts (
    id           TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS machines (
    id             TEXT PRIMARY KEY,
    account_id     TEXT NOT NULL,
    hostname       TEXT NOT NULL,
    last_heartbeat TEXT NOT NULL
);
"#;
