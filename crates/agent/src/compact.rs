//! History compaction -- collapses a session's entire history into one
//! synthetic user message when token pressure demands it.
//!
//! Two tools-disabled provider calls run back to back: the first
//! produces a structured summary, the second tightens it. Their
//! combined usage *replaces* the session's token counters (a reset,
//! not an addition), and the message log is swapped atomically.

use std::sync::Arc;

use futures_util::StreamExt;

use keel_domain::cancel::CancelToken;
use keel_domain::config::ModelPricing;
use keel_domain::event::AgentEvent;
use keel_domain::message::{Message, Role};
use keel_domain::stream::{ProviderEvent, UsageInfo};
use keel_domain::{Error, Result};
use keel_providers::{Provider, ProviderRequest};
use keel_store::MessageStore;

use crate::broker::EventBroker;
use crate::history::clean_history;

/// Marker separating the summary from the preserved user request. The
/// text after the final occurrence survives re-compaction verbatim.
pub const LAST_REQUEST_MARKER: &str = "Last request from user was: ";

const SUMMARY_PROMPT: &str = "You summarize agent conversations so they can continue in a fresh \
context. Produce a structured summary with exactly these sections:\n\
1. Primary goals\n\
2. Timeline\n\
3. Technical context\n\
4. Files and code\n\
5. Active work\n\
6. Pending tasks\n\
7. Next step\n\
Preserve every actionable detail; omit pleasantries.";

const HYGIENE_PROMPT: &str = "You tighten conversation summaries. Remove repetition and filler \
from the summary you are given, keep all section headers and every \
concrete fact, and return only the tightened summary.";

/// Compact one session: summarize, tighten, atomically replace the
/// history with a single synthetic user message, reset counters, and
/// publish a `compact` event. Returns the synthetic message.
pub async fn compact_session(
    store: &Arc<dyn MessageStore>,
    provider: &Arc<dyn Provider>,
    broker: &EventBroker<AgentEvent>,
    cancel: &CancelToken,
    session_id: &str,
    pricing: Option<&ModelPricing>,
) -> Result<Message> {
    let history = store.list_messages(session_id)?;
    if history.is_empty() {
        return Err(Error::Other("cannot compact an empty session".into()));
    }

    // The exact text of the last user request must survive compaction.
    // A non-empty history without one means the log is corrupt.
    let last_user_text = last_user_request(&history).ok_or_else(|| {
        Error::Other("last user message missing during compaction of non-empty history".into())
    })?;

    // Call 1: structured summary over the rendered conversation.
    let conversation = render_conversation(&clean_history(&history));
    let (summary, usage_summary) = collect_completion(
        provider,
        cancel,
        SUMMARY_PROMPT,
        vec![Message::user(session_id, conversation)],
    )
    .await?;

    // Call 2: hygiene pass over the summary itself.
    let (tightened, usage_hygiene) = collect_completion(
        provider,
        cancel,
        HYGIENE_PROMPT,
        vec![Message::user(session_id, summary.clone())],
    )
    .await?;
    let final_summary = if tightened.trim().is_empty() {
        summary
    } else {
        tightened
    };

    let mut total_usage = usage_summary;
    total_usage.add(&usage_hygiene);

    // Build and swap in the synthetic history.
    let synthetic = Message::user(
        session_id,
        format!("{final_summary}\n\n{LAST_REQUEST_MARKER}{last_user_text}"),
    );
    store.replace_messages(session_id, &[synthetic.clone()])?;

    let mut session = store
        .get_session(session_id)?
        .ok_or_else(|| Error::Store(format!("unknown session: {session_id}")))?;
    session.summary_message_id = synthetic.id.clone();
    // Reset, not accumulate: the compaction calls are now the whole
    // cost of this session's context.
    session.prompt_tokens = total_usage.prompt_tokens;
    session.completion_tokens = total_usage.completion_tokens;
    session.cost = pricing
        .map(|p| p.estimate_cost(total_usage.prompt_tokens, total_usage.completion_tokens))
        .unwrap_or(0.0);
    store.update_session(&session)?;

    tracing::info!(
        session_id = session_id,
        prompt_tokens = total_usage.prompt_tokens,
        completion_tokens = total_usage.completion_tokens,
        "session compacted"
    );

    broker.publish(&AgentEvent::Compact {
        session_id: session_id.to_string(),
        message: synthetic.clone(),
    });

    Ok(synthetic)
}

/// Drive a tools-disabled provider call to completion, returning the
/// accumulated text and usage.
async fn collect_completion(
    provider: &Arc<dyn Provider>,
    cancel: &CancelToken,
    system: &str,
    history: Vec<Message>,
) -> Result<(String, UsageInfo)> {
    let req = ProviderRequest {
        system: system.to_string(),
        history,
        tools: Vec::new(),
    };
    let mut stream = provider.stream(cancel, &req).await?;

    let mut text = String::new();
    let mut usage = UsageInfo::default();
    while let Some(event) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match event? {
            ProviderEvent::ContentDelta { delta } => text.push_str(&delta),
            ProviderEvent::Complete { usage: u } => {
                if let Some(u) = u {
                    usage = u;
                }
                break;
            }
            ProviderEvent::Error { message } => {
                return Err(Error::Provider {
                    provider: "compaction".into(),
                    message,
                });
            }
            _ => {}
        }
    }
    Ok((text, usage))
}

/// The text of the last user message. For an already-compacted history
/// the preserved request after the final marker is returned, so
/// repeated compaction keeps referring to the same original request.
fn last_user_request(history: &[Message]) -> Option<String> {
    let text = history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text())?;
    match text.rfind(LAST_REQUEST_MARKER) {
        Some(idx) => Some(text[idx + LAST_REQUEST_MARKER.len()..].to_string()),
        None => Some(text),
    }
}

/// Flatten the history into a readable transcript for the summarizer.
/// Very long entries (usually tool output) are elided in the middle.
fn render_conversation(history: &[Message]) -> String {
    let mut buf = String::new();
    for msg in history {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        };
        let mut line = msg.text();
        for (_, name, _) in msg.tool_calls() {
            line.push_str(&format!(" [called tool: {name}]"));
        }
        for part in &msg.parts {
            if let keel_domain::message::MessagePart::ToolResult { content, .. } = part {
                line.push_str(content);
            }
        }
        buf.push_str(label);
        buf.push_str(": ");
        if line.len() > 2000 {
            let head = floor_char_boundary(&line, 1000);
            let tail = floor_char_boundary(&line, line.len() - 500);
            buf.push_str(&line[..head]);
            buf.push_str(" [...] ");
            buf.push_str(&line[tail..]);
        } else {
            buf.push_str(&line);
        }
        buf.push('\n');
    }
    buf
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
