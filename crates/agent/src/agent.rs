//! Turn orchestration -- drain inputs, stream the assistant, run tools,
//! loop, sleep.
//!
//! At most one turn is ever active per agent: an atomic flag guards the
//! worker, and `run_once` competes for the same flag. Cancellation is a
//! one-shot token stored under a mutex while a turn runs; every
//! suspension point (stream reads, store calls, tool runs, retry
//! sleeps) observes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use keel_domain::cancel::CancelToken;
use keel_domain::config::{AgentLoopConfig, CompactionConfig, ModelPricing, SpawnConfig};
use keel_domain::event::AgentEvent;
use keel_domain::input::Input;
use keel_domain::message::{Message, MessagePart};
use keel_domain::stream::ProviderEvent;
use keel_domain::tool::ToolCall;
use keel_domain::{Error, Result};
use keel_providers::{Provider, ProviderRequest};
use keel_store::MessageStore;

use crate::broker::{EventBroker, Subscription};
use crate::compact;
use crate::history::clean_history;
use crate::prompt::{PromptBuilder, PromptMode};
use crate::queue::InputQueue;
use crate::tools::{run_tool_calls, Tool, ToolContext, ToolSet};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runtime knobs for one agent instance. Sub-agents inherit their
/// parent's settings with `prompt_mode` forced to minimal.
#[derive(Clone, Default)]
pub struct AgentSettings {
    pub loop_cfg: AgentLoopConfig,
    pub compaction: CompactionConfig,
    pub spawn: SpawnConfig,
    /// Pricing per model id for session cost accounting.
    pub pricing: HashMap<String, ModelPricing>,
    pub prompt_mode: PromptMode,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AgentInner {
    store: Arc<dyn MessageStore>,
    provider: Arc<dyn Provider>,
    tools: RwLock<ToolSet>,
    queue: InputQueue,
    broker: EventBroker<AgentEvent>,
    active: AtomicBool,
    cancel: Mutex<Option<CancelToken>>,
    prompt: RwLock<PromptBuilder>,
    settings: RwLock<AgentSettings>,
}

/// Cheap-to-clone handle; all clones share one worker, queue, and
/// broker.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    pub fn new(
        store: Arc<dyn MessageStore>,
        provider: Arc<dyn Provider>,
        tools: ToolSet,
        settings: AgentSettings,
    ) -> Self {
        let prompt = PromptBuilder {
            mode: settings.prompt_mode,
            ..Default::default()
        };
        Self {
            inner: Arc::new(AgentInner {
                store,
                provider,
                tools: RwLock::new(tools),
                queue: InputQueue::new(),
                broker: EventBroker::new(),
                active: AtomicBool::new(false),
                cancel: Mutex::new(None),
                prompt: RwLock::new(prompt),
                settings: RwLock::new(settings),
            }),
        }
    }

    // ── Configuration ─────────────────────────────────────────────

    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.inner.tools.write().register(tool);
    }

    pub fn set_workspace(&self, workspace: Option<String>) {
        self.inner.prompt.write().workspace = workspace;
    }

    pub fn set_skills(&self, skills: Vec<String>) {
        self.inner.prompt.write().skills = skills;
    }

    pub fn set_prompt_mode(&self, mode: PromptMode) {
        self.inner.prompt.write().mode = mode;
    }

    pub fn set_no_tool_sleep_rounds(&self, rounds: u32) {
        self.inner.settings.write().loop_cfg.no_tool_sleep_rounds = rounds;
    }

    pub fn store(&self) -> Arc<dyn MessageStore> {
        self.inner.store.clone()
    }

    // ── Surface ───────────────────────────────────────────────────

    /// Whether a turn is currently executing.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Subscribe to agent events (response / compact / error).
    pub fn events(&self) -> (mpsc::Receiver<AgentEvent>, Subscription<AgentEvent>) {
        self.inner.broker.subscribe()
    }

    /// Request the current turn abort. A no-op when idle.
    pub fn cancel(&self) {
        let token = self.inner.cancel.lock().take();
        if let Some(token) = token {
            tracing::info!("turn cancellation requested");
            token.cancel();
        }
    }

    /// Queue an input and wake the worker if it is idle. Never blocks.
    pub fn enqueue(&self, input: Input) {
        self.inner.queue.push(input);
        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let agent = self.clone();
            tokio::spawn(async move { agent.worker().await });
        }
    }

    /// Run one turn synchronously for `input`. Fails with `agent_busy`
    /// when a turn is already active.
    pub async fn run_once(&self, input: Input) -> Result<()> {
        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AgentBusy);
        }

        self.inner.queue.push(input);
        let result = self.execute_turn().await;
        self.inner.active.store(false, Ordering::Release);
        result
    }

    // ── Worker ────────────────────────────────────────────────────

    /// The async worker cycle: run turns while inputs keep arriving,
    /// then store `active = false` -- re-checking the queue afterwards
    /// so a push that raced the store is not stranded.
    async fn worker(&self) {
        loop {
            if let Err(e) = self.execute_turn().await {
                tracing::debug!(error = %e, "turn ended with error");
            }
            if !self.inner.queue.is_empty() {
                continue;
            }
            self.inner.active.store(false, Ordering::Release);
            if self.inner.queue.is_empty() {
                break;
            }
            if self
                .inner
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }
    }

    /// Register a fresh cancel token, run the turn, publish any error.
    async fn execute_turn(&self) -> Result<()> {
        let cancel = CancelToken::new();
        *self.inner.cancel.lock() = Some(cancel.clone());
        let (session_id, result) = self.turn(&cancel).await;
        *self.inner.cancel.lock() = None;

        if let Err(ref e) = result {
            tracing::warn!(session_id = %session_id, error = %e, "turn aborted");
            self.inner.broker.publish(&AgentEvent::Error {
                session_id,
                message: e.to_string(),
            });
        }
        result
    }

    // ── The turn ──────────────────────────────────────────────────

    async fn turn(&self, cancel: &CancelToken) -> (String, Result<()>) {
        let inputs = self.inner.queue.drain();
        if inputs.is_empty() {
            return (String::new(), Ok(()));
        }

        // The turn binds to the first input's session; inputs for other
        // sessions go back to the queue for the next cycle.
        let session = match self.resolve_session(&inputs[0]) {
            Ok(s) => s,
            Err(e) => return (inputs[0].session_id.clone(), Err(e)),
        };
        let sid = session.id.clone();

        let mut turn_inputs = Vec::new();
        for input in inputs {
            if input.session_id.is_empty() || input.session_id == sid {
                turn_inputs.push(input);
            } else {
                self.inner.queue.push(input);
            }
        }

        let result = self.turn_for_session(cancel, &sid, turn_inputs).await;
        (sid, result)
    }

    fn resolve_session(&self, input: &Input) -> Result<keel_domain::message::Session> {
        if !input.session_id.is_empty() {
            if let Some(s) = self.inner.store.get_session(&input.session_id)? {
                return Ok(s);
            }
        }
        self.inner
            .store
            .create_session(None, &truncate_str(&input.content, 80))
    }

    async fn turn_for_session(
        &self,
        cancel: &CancelToken,
        sid: &str,
        inputs: Vec<Input>,
    ) -> Result<()> {
        let inner = &self.inner;
        self.persist_inputs(sid, &inputs)?;

        let (no_tool_limit, max_rounds, compaction) = {
            let s = inner.settings.read();
            (
                s.loop_cfg.no_tool_sleep_rounds,
                s.loop_cfg.max_tool_rounds,
                s.compaction.clone(),
            )
        };
        let model = inner.provider.model();
        let pricing = inner.settings.read().pricing.get(&model.model).copied();

        let mut no_tool_rounds: u32 = 0;
        let mut finished = false;

        for round in 0..max_rounds {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Compact under token pressure before building the request.
            let session = self.session(sid)?;
            if compaction.auto
                && session.prompt_tokens + session.completion_tokens
                    > compaction.max_context_tokens
            {
                match compact::compact_session(
                    &inner.store,
                    &inner.provider,
                    &inner.broker,
                    cancel,
                    sid,
                    pricing.as_ref(),
                )
                .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "auto-compaction failed; continuing with full history");
                    }
                }
            }

            // Build and stream the model call.
            let history = inner.store.list_messages(sid)?;
            let req = ProviderRequest {
                system: inner.prompt.read().render(),
                history: clean_history(&history),
                tools: inner.tools.read().definitions(),
            };
            tracing::debug!(session_id = sid, round = round, "model call");
            let mut stream = inner.provider.stream(cancel, &req).await?;

            let mut text = String::new();
            let mut thinking = String::new();
            let mut calls: Vec<PendingCall> = Vec::new();
            let mut usage = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    event = stream.next() => match event {
                        None => break,
                        Some(Err(e)) => return Err(e),
                        Some(Ok(ProviderEvent::ContentDelta { delta })) => text.push_str(&delta),
                        Some(Ok(ProviderEvent::ThinkingDelta { delta })) => thinking.push_str(&delta),
                        Some(Ok(ProviderEvent::ToolUseStart { tool_call_id, tool_name })) => {
                            upsert_call(&mut calls, &tool_call_id, &tool_name);
                        }
                        Some(Ok(ProviderEvent::ToolUseDelta { tool_call_id, tool_name, delta })) => {
                            upsert_call(&mut calls, &tool_call_id, &tool_name).buf.push_str(&delta);
                        }
                        Some(Ok(ProviderEvent::ToolUseStop { .. })) => {}
                        Some(Ok(ProviderEvent::Complete { usage: u })) => {
                            usage = u;
                            break;
                        }
                        Some(Ok(ProviderEvent::Error { message })) => {
                            return Err(Error::Provider {
                                provider: model.provider.clone(),
                                message,
                            });
                        }
                    }
                }
            }

            // Usage and cost accumulate across normal rounds.
            if let Some(u) = usage {
                let mut session = self.session(sid)?;
                session.prompt_tokens += u.prompt_tokens;
                session.completion_tokens += u.completion_tokens;
                if let Some(p) = pricing {
                    session.cost += p.estimate_cost(u.prompt_tokens, u.completion_tokens);
                }
                inner.store.update_session(&session)?;
            }

            // Materialize the assistant message: [text?, reasoning?, *tool_calls].
            let tool_calls = finalize_calls(calls);
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(MessagePart::Text { text: text.clone() });
            }
            if !thinking.is_empty() {
                parts.push(MessagePart::Reasoning { text: thinking });
            }
            for tc in &tool_calls {
                parts.push(MessagePart::ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    parameters: tc.parameters.clone(),
                });
            }
            let assistant = Message::assistant(sid, parts);
            inner.store.append_messages(sid, &[assistant.clone()])?;

            if tool_calls.is_empty() {
                inner.broker.publish(&AgentEvent::Response {
                    session_id: sid.to_string(),
                    message: assistant,
                });

                // New inputs that arrived during the round keep the
                // turn alive; otherwise it ends here.
                let injected = self.drain_for_session(sid);
                if injected.is_empty() {
                    finished = true;
                    break;
                }
                self.persist_inputs(sid, &injected)?;
                no_tool_rounds += 1;
                if no_tool_rounds >= no_tool_limit {
                    tracing::info!(
                        session_id = sid,
                        rounds = no_tool_rounds,
                        "no-tool round bound reached; ending turn"
                    );
                    finished = true;
                    break;
                }
                continue;
            }

            // Run the tools sequentially and persist one tool message.
            let ctx = ToolContext {
                cancel: cancel.clone(),
                session_id: sid.to_string(),
            };
            let toolset = inner.tools.read().clone();
            let (result_parts, cancel_err) = run_tool_calls(&ctx, &toolset, &tool_calls).await;
            inner.store.append_messages(sid, &[Message::tool(sid, result_parts)])?;
            if let Some(e) = cancel_err {
                return Err(e);
            }

            // Mid-turn injections become user messages so the next
            // model call sees them.
            let injected = self.drain_for_session(sid);
            self.persist_inputs(sid, &injected)?;
            no_tool_rounds = 0;
        }

        if !finished {
            tracing::warn!(session_id = sid, max_rounds, "round limit reached; ending turn");
        }
        Ok(())
    }

    fn session(&self, sid: &str) -> Result<keel_domain::message::Session> {
        self.inner
            .store
            .get_session(sid)?
            .ok_or_else(|| Error::Store(format!("unknown session: {sid}")))
    }

    fn persist_inputs(&self, sid: &str, inputs: &[Input]) -> Result<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let messages: Vec<Message> = inputs
            .iter()
            .map(|i| Message::user(sid, i.formatted_content()))
            .collect();
        self.inner.store.append_messages(sid, &messages)
    }

    /// Drain the queue, keeping inputs for `sid` (or unscoped ones) and
    /// requeueing the rest.
    fn drain_for_session(&self, sid: &str) -> Vec<Input> {
        let mut matching = Vec::new();
        for input in self.inner.queue.drain() {
            if input.session_id.is_empty() || input.session_id == sid {
                matching.push(input);
            } else {
                self.inner.queue.push(input);
            }
        }
        matching
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PendingCall {
    id: String,
    name: String,
    buf: String,
}

/// Find or insert the accumulation slot for a call id, preserving the
/// order of first appearance.
fn upsert_call<'a>(calls: &'a mut Vec<PendingCall>, id: &str, name: &str) -> &'a mut PendingCall {
    if let Some(pos) = calls.iter().position(|c| c.id == id) {
        if calls[pos].name.is_empty() {
            calls[pos].name = name.to_string();
        }
        return &mut calls[pos];
    }
    calls.push(PendingCall {
        id: id.to_string(),
        name: name.to_string(),
        buf: String::new(),
    });
    let last = calls.len() - 1;
    &mut calls[last]
}

/// Trim buffers, defaulting empty arguments to `{}`; arguments that are
/// not valid JSON fall back to an empty object rather than killing the
/// turn.
fn finalize_calls(calls: Vec<PendingCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .map(|c| {
            let raw = c.buf.trim();
            let raw = if raw.is_empty() { "{}" } else { raw };
            let parameters = match serde_json::from_str(raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        call_id = %c.id,
                        tool = %c.name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    serde_json::json!({})
                }
            };
            ToolCall {
                id: c.id,
                name: c.name,
                parameters,
            }
        })
        .collect()
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
