//! Daemon entry point: load configuration, open the store, wire the
//! queue/hub/worker pool/webhook engine together, and serve the HTTP API.

use agentrelay::config::{AppConfig, ModelRouting};
use agentrelay::hub::Hub;
use agentrelay::http::{self, state::AppState};
use agentrelay::queue::Queue;
use agentrelay::store::Store;
use agentrelay::webhook::WebhookEngine;
use agentrelay::worker_pool;
use clap::Parser;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "agentrelayd", about = "Event-driven automation daemon")]
struct Args {
    /// Override `AGENTRELAY_BIND_ADDR`.
    #[arg(long)]
    bind_addr: Option<String>,
    /// Override `AGENTRELAY_DB_PATH`.
    #[arg(long)]
    database_path: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(database_path) = args.database_path {
        config.database_path = database_path;
    }
    let config = Arc::new(config);
    let model_routing = Arc::new(ModelRouting::from_env());

    let store = Arc::new(
        Store::open(&config.database_path)
            .unwrap_or_else(|e| panic!("failed to open store at {:?}: {e}", config.database_path)),
    );
    let hub = Arc::new(Hub::new(config.hub_ring_buffer));
    let queue_handle = Queue::new();
    let queue = queue_handle.sender();
    let webhooks = Arc::new(WebhookEngine::new(store.clone(), queue.clone()));

    let _workers = worker_pool::spawn(
        store.clone(),
        queue_handle,
        hub.clone(),
        config.clone(),
        model_routing.clone(),
    );

    spawn_session_pruner(store.clone(), config.clone());

    let state = AppState {
        store,
        queue,
        hub,
        config: config.clone(),
        model_routing,
        webhooks,
    };

    http::serve(state, &config.bind_addr).await
}

/// Periodically drop Sessions idle past `session_prune_after` (§4.2).
fn spawn_session_pruner(store: Arc<Store>, config: Arc<AppConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval);
        loop {
            interval.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::from_std(config.session_prune_after).unwrap();
            if let Err(e) = store.prune_idle_sessions(cutoff) {
                log::warn!("session prune failed: {e}");
            }
        }
    });
}
