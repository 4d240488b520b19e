//! Sub-agent spawning.
//!
//! `sessions_spawn` runs a prompt in a child session: fresh agent
//! instance over the same store, read-only tool subset, minimal prompt
//! mode, and a hard deadline. Nesting is impossible by construction --
//! the spawn tool is not read-only, so a child's tool set never
//! contains it. A global registry tracks live children so `subagents`
//! can list them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use keel_domain::event::AgentEvent;
use keel_domain::input::Input;
use keel_domain::schema::JsonSchema;
use keel_domain::tool::{ToolCall, ToolResult};
use keel_domain::{Error, Result};
use keel_providers::Provider;
use keel_store::MessageStore;

use crate::agent::{Agent, AgentSettings};
use crate::prompt::PromptMode;
use crate::tools::{Tool, ToolContext, ToolSet};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubagentEntry {
    pub id: String,
    pub parent_session_id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
}

/// Live sub-agents keyed by child session id.
#[derive(Default)]
pub struct SubagentRegistry {
    entries: Mutex<HashMap<String, SubagentEntry>>,
}

impl SubagentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: SubagentEntry) {
        self.entries.lock().insert(entry.id.clone(), entry);
    }

    pub fn remove(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    /// Children of `parent`, ordered by start time then id.
    pub fn list_for_parent(&self, parent: &str) -> Vec<SubagentEntry> {
        let mut entries: Vec<SubagentEntry> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.parent_session_id == parent)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sessions_spawn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SpawnTool {
    store: Arc<dyn MessageStore>,
    provider: Arc<dyn Provider>,
    settings: AgentSettings,
    registry: Arc<SubagentRegistry>,
    /// The parent's tool set before spawn tools were added; children
    /// get its read-only subset.
    base_tools: ToolSet,
}

impl SpawnTool {
    pub fn new(
        store: Arc<dyn MessageStore>,
        provider: Arc<dyn Provider>,
        settings: AgentSettings,
        registry: Arc<SubagentRegistry>,
        base_tools: ToolSet,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
            registry,
            base_tools,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "sessions_spawn"
    }

    fn description(&self) -> &str {
        "Run a prompt in an isolated read-only sub-agent session and return its answer."
    }

    fn parameters(&self) -> JsonSchema {
        JsonSchema::object(
            vec![
                ("prompt", JsonSchema::string("Task for the sub-agent")),
                ("title", JsonSchema::string("Optional session title")),
            ],
            &["prompt"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult> {
        let prompt = match call.parameters.get("prompt").and_then(|v| v.as_str()) {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => return Ok(ToolResult::error("missing required argument: prompt")),
        };
        let title = call
            .parameters
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("sub-agent")
            .to_string();

        let child_session = self
            .store
            .create_session(Some(&ctx.session_id), &title)?;
        self.registry.register(SubagentEntry {
            id: child_session.id.clone(),
            parent_session_id: ctx.session_id.clone(),
            title: title.clone(),
            started_at: Utc::now(),
        });

        let mut settings = self.settings.clone();
        settings.prompt_mode = PromptMode::Minimal;
        let child = Agent::new(
            self.store.clone(),
            self.provider.clone(),
            self.base_tools.read_only_subset(),
            settings,
        );
        let (mut events, _subscription) = child.events();

        tracing::info!(
            child_session = %child_session.id,
            parent_session = %ctx.session_id,
            "sub-agent spawned"
        );

        let deadline = Duration::from_secs(self.settings.spawn.timeout_secs);
        let input = Input::new(child_session.id.clone(), prompt, "spawn");
        let outcome = tokio::select! {
            outcome = tokio::time::timeout(deadline, child.run_once(input)) => outcome,
            _ = ctx.cancel.cancelled() => {
                child.cancel();
                self.registry.remove(&child_session.id);
                return Err(Error::Cancelled);
            }
        };
        self.registry.remove(&child_session.id);

        match outcome {
            Err(_elapsed) => {
                child.cancel();
                Err(Error::SpawnTimeout(format!(
                    "sub-agent {} exceeded {}s",
                    child_session.id, self.settings.spawn.timeout_secs
                )))
            }
            Ok(Err(e)) => Ok(ToolResult::error(format!("sub-agent failed: {e}"))),
            Ok(Ok(())) => {
                // The concatenated text of the child's first response.
                let mut reply = String::new();
                while let Ok(event) = events.try_recv() {
                    if let AgentEvent::Response { message, .. } = event {
                        reply = message.text();
                        break;
                    }
                }
                Ok(ToolResult::ok(reply))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// subagents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SubagentsTool {
    registry: Arc<SubagentRegistry>,
}

impl SubagentsTool {
    pub fn new(registry: Arc<SubagentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl Tool for SubagentsTool {
    fn name(&self) -> &str {
        "subagents"
    }

    fn description(&self) -> &str {
        "List sub-agents currently running for this session."
    }

    fn parameters(&self) -> JsonSchema {
        JsonSchema::object(vec![], &[])
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &ToolContext, _call: &ToolCall) -> Result<ToolResult> {
        let entries = self.registry.list_for_parent(&ctx.session_id);
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "subagents": entries,
            "count": entries.len(),
        }))?;
        Ok(ToolResult::ok(json))
    }
}
