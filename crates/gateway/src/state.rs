use std::collections::HashMap;
use std::sync::Arc;

use keel_agent::scheduler::Scheduler;
use keel_agent::Agent;
use keel_store::MessageStore;

/// Shared handle for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub agent: Agent,
    pub store: Arc<dyn MessageStore>,
    pub scheduler: Arc<Scheduler>,
    /// Webhook id → optional HMAC secret.
    pub webhooks: Arc<HashMap<String, Option<String>>>,
}
