//! Root application state (§9 design notes: an explicitly-constructed
//! `AppState` handed to every handler via `axum::extract::State`, rather
//! than a process-wide singleton).

use crate::config::{AppConfig, ModelRouting};
use crate::hub::SharedHub;
use crate::queue::Queue;
use crate::store::Store;
use crate::webhook::WebhookEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub queue: Queue,
    pub hub: SharedHub,
    pub config: Arc<AppConfig>,
    pub model_routing: Arc<ModelRouting>,
    pub webhooks: Arc<WebhookEngine>,
}
