//! Uniform tool interface and cancellation-safe sequential dispatch.
//!
//! Tools translate their failures into `is_error` results; nothing a
//! tool does can abort the turn except cancellation itself. The
//! concrete filesystem/shell tools live outside the core and plug in
//! through [`Tool`].

pub mod spawn;

use std::sync::Arc;
use std::time::Duration;

use keel_domain::cancel::CancelToken;
use keel_domain::message::MessagePart;
use keel_domain::schema::JsonSchema;
use keel_domain::tool::{ToolCall, ToolDefinition, ToolResult};
use keel_domain::{Error, Result};

/// Hard cap for foreground exec-style tools.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(1800);

/// Tool output beyond this is truncated with a marker.
pub const MAX_TOOL_OUTPUT_BYTES: usize = 100 * 1024;

/// Result content for calls abandoned by cancellation.
pub const CANCELLED_CONTENT: &str = "Cancelled";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Context threaded into every tool run.
#[derive(Clone)]
pub struct ToolContext {
    pub cancel: CancelToken,
    pub session_id: String,
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> JsonSchema;

    /// Whether the tool mutates anything outside the conversation.
    /// Sub-agents only receive read-only tools.
    fn read_only(&self) -> bool {
        false
    }

    /// Run the tool. `ctx.cancel` must be honored promptly; long-running
    /// work should race it. Errors become `is_error` results upstream.
    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolSet
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered tool registry. Order determines schema order in requests.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The read-only subset handed to sub-agents (never includes the
    /// spawn tool, which is not read-only by definition).
    pub fn read_only_subset(&self) -> ToolSet {
        ToolSet {
            tools: self
                .tools
                .iter()
                .filter(|t| t.read_only())
                .cloned()
                .collect(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run `calls` sequentially in stream order, producing one result part
/// per call.
///
/// Cancellation semantics: a call observed cancelled before it starts
/// (and every call after it) yields `Cancelled`/`is_error`; a result
/// already produced is kept. When cancellation was observed, the
/// second return value carries `Error::Cancelled` for the turn.
pub async fn run_tool_calls(
    ctx: &ToolContext,
    tools: &ToolSet,
    calls: &[ToolCall],
) -> (Vec<MessagePart>, Option<Error>) {
    let mut parts = Vec::with_capacity(calls.len());
    let mut cancelled = false;

    for call in calls {
        if ctx.cancel.is_cancelled() {
            cancelled = true;
        }
        if cancelled {
            parts.push(MessagePart::ToolResult {
                tool_call_id: call.id.clone(),
                content: CANCELLED_CONTENT.into(),
                is_error: true,
            });
            continue;
        }

        let result = match tools.get(&call.name) {
            None => ToolResult::error(format!("tool not found: {}", call.name)),
            Some(tool) => {
                tracing::debug!(tool = %call.name, call_id = %call.id, "running tool");
                match tool.run(ctx, call).await {
                    Ok(r) => r,
                    Err(e) if e.is_cancelled() => {
                        cancelled = true;
                        ToolResult::error(CANCELLED_CONTENT)
                    }
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
        };

        parts.push(MessagePart::ToolResult {
            tool_call_id: call.id.clone(),
            content: result.content,
            is_error: result.is_error,
        });

        // A real result produced just before cancellation is kept; only
        // the remaining calls are marked.
        if ctx.cancel.is_cancelled() {
            cancelled = true;
        }
    }

    (parts, cancelled.then_some(Error::Cancelled))
}

/// Truncate oversize tool output, marking the cut.
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_BYTES {
        return output.to_string();
    }
    let mut end = MAX_TOOL_OUTPUT_BYTES;
    while !output.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!(
        "{}\n[output truncated at {} KiB]",
        &output[..end],
        MAX_TOOL_OUTPUT_BYTES / 1024
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{BlockUntilCancelTool, EchoTool};

    fn ctx() -> ToolContext {
        ToolContext {
            cancel: CancelToken::new(),
            session_id: "s1".into(),
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            parameters: serde_json::json!({"x": "1"}),
        }
    }

    #[tokio::test]
    async fn runs_calls_in_order() {
        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool::new("tool-ok")));

        let (parts, err) = run_tool_calls(
            &ctx(),
            &tools,
            &[call("c1", "echo"), call("c2", "echo")],
        )
        .await;

        assert!(err.is_none());
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            MessagePart::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_call_id, "c1");
                assert_eq!(content, "tool-ok");
                assert!(!is_error);
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let tools = ToolSet::new();
        let (parts, err) = run_tool_calls(&ctx(), &tools, &[call("c1", "missing")]).await;
        assert!(err.is_none());
        match &parts[0] {
            MessagePart::ToolResult {
                content, is_error, ..
            } => {
                assert_eq!(content, "tool not found: missing");
                assert!(is_error);
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pre_cancelled_marks_everything() {
        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool::new("never")));
        let ctx = ctx();
        ctx.cancel.cancel();

        let (parts, err) =
            run_tool_calls(&ctx, &tools, &[call("c1", "echo"), call("c2", "echo")]).await;

        assert!(matches!(err, Some(Error::Cancelled)));
        for part in &parts {
            match part {
                MessagePart::ToolResult {
                    content, is_error, ..
                } => {
                    assert_eq!(content, CANCELLED_CONTENT);
                    assert!(is_error);
                }
                other => panic!("expected result, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn cancel_mid_batch_keeps_earlier_results() {
        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool::new("real")));
        tools.register(Arc::new(BlockUntilCancelTool));
        let ctx = ctx();

        let canceller = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let calls = [call("c1", "echo"), call("c2", "block"), call("c3", "echo")];
        let (parts, err) = run_tool_calls(&ctx, &tools, &calls).await;

        assert!(matches!(err, Some(Error::Cancelled)));
        let summary: Vec<(String, String, bool)> = parts
            .iter()
            .map(|p| match p {
                MessagePart::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => (tool_call_id.clone(), content.clone(), *is_error),
                other => panic!("expected result, got {other:?}"),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("c1".into(), "real".into(), false),
                ("c2".into(), CANCELLED_CONTENT.into(), true),
                ("c3".into(), CANCELLED_CONTENT.into(), true),
            ]
        );
    }

    #[test]
    fn read_only_subset_filters() {
        let mut tools = ToolSet::new();
        tools.register(Arc::new(EchoTool::new("x"))); // read-only in testutil
        tools.register(Arc::new(BlockUntilCancelTool)); // not read-only
        let subset = tools.read_only_subset();
        assert_eq!(subset.names(), vec!["echo"]);
    }

    #[test]
    fn truncate_output_within_limit_untouched() {
        assert_eq!(truncate_output("short"), "short");
    }

    #[test]
    fn truncate_output_marks_cut() {
        let big = "x".repeat(MAX_TOOL_OUTPUT_BYTES + 10);
        let out = truncate_output(&big);
        assert!(out.len() < big.len());
        assert!(out.ends_with("[output truncated at 100 KiB]"));
    }
}
