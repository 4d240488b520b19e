//! Shared fixtures for the agent crate's tests: a scripted provider
//! that replays canned event sequences, and a couple of trivial tools.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use keel_domain::cancel::CancelToken;
use keel_domain::schema::JsonSchema;
use keel_domain::stream::{BoxStream, ModelInfo, ProviderEvent, UsageInfo};
use keel_domain::tool::{ToolCall, ToolResult};
use keel_domain::{Error, Result};
use keel_providers::{Provider, ProviderRequest};

use crate::tools::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScriptedProvider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays one canned event sequence per `stream` call and records
/// every request it received.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<ProviderEvent>>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_script(&self, events: Vec<ProviderEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    async fn stream(
        &self,
        _cancel: &CancelToken,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        self.requests.lock().push(req.clone());
        let events = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![ProviderEvent::Complete { usage: None }]);
        Ok(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        )))
    }

    fn model(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".into(),
            model: "scripted-1".into(),
            context_window: 100_000,
            max_output_tokens: 4_096,
        }
    }
}

/// Convenience: a script producing one text response.
pub fn text_script(text: &str) -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::ContentDelta { delta: text.into() },
        ProviderEvent::Complete {
            usage: Some(UsageInfo {
                prompt_tokens: 10,
                completion_tokens: 5,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            }),
        },
    ]
}

/// Convenience: a script producing one tool call.
pub fn tool_call_script(id: &str, name: &str, args: &str) -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::ToolUseStart {
            tool_call_id: id.into(),
            tool_name: name.into(),
        },
        ProviderEvent::ToolUseDelta {
            tool_call_id: id.into(),
            tool_name: name.into(),
            delta: args.into(),
        },
        ProviderEvent::ToolUseStop {
            tool_call_id: id.into(),
        },
        ProviderEvent::Complete {
            usage: Some(UsageInfo {
                prompt_tokens: 8,
                completion_tokens: 4,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            }),
        },
    ]
}

/// A provider whose stream opens but never yields -- for deadline tests.
pub struct HangingProvider;

#[async_trait::async_trait]
impl Provider for HangingProvider {
    async fn stream(
        &self,
        _cancel: &CancelToken,
        _req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        Ok(Box::pin(futures_util::stream::pending()))
    }

    fn model(&self) -> ModelInfo {
        ModelInfo {
            provider: "hanging".into(),
            model: "hanging-1".into(),
            context_window: 1,
            max_output_tokens: 1,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returns a fixed string. Read-only.
pub struct EchoTool {
    reply: String,
}

impl EchoTool {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo a fixed reply"
    }

    fn parameters(&self) -> JsonSchema {
        JsonSchema::object(vec![("x", JsonSchema::string("Value"))], &[])
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn run(&self, _ctx: &ToolContext, _call: &ToolCall) -> Result<ToolResult> {
        Ok(ToolResult::ok(self.reply.clone()))
    }
}

/// Blocks until the turn is cancelled, then reports cancellation.
pub struct BlockUntilCancelTool;

#[async_trait::async_trait]
impl Tool for BlockUntilCancelTool {
    fn name(&self) -> &str {
        "block"
    }

    fn description(&self) -> &str {
        "Block until cancelled"
    }

    fn parameters(&self) -> JsonSchema {
        JsonSchema::object(vec![], &[])
    }

    async fn run(&self, ctx: &ToolContext, _call: &ToolCall) -> Result<ToolResult> {
        ctx.cancel.cancelled().await;
        Err(Error::Cancelled)
    }
}
