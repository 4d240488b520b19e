//! Structural repair of conversation history before each model call.
//!
//! Vendors reject histories where a tool call has no result, a result
//! has no call, or an assistant message dangles with unanswered calls.
//! `clean_history` walks the flattened history once and repairs all
//! three in place, without touching the persisted log. The repair is
//! idempotent.

use keel_domain::message::{Message, MessagePart, Role};

/// Content used for synthesized results of unanswered tool calls.
pub const NO_RESPONSE_CONTENT: &str = "Tool no response";

/// Repair a history so that any vendor will accept it:
/// - every `tool_call` is answered by exactly one `tool_result` before
///   the next non-tool message (missing ones are synthesized as errors,
///   followed by an assistant acknowledgement);
/// - orphaned `tool_result`s are dropped;
/// - assistant messages consisting solely of unpairable tool calls are
///   dropped.
pub fn clean_history(history: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(history.len());
    let mut i = 0;

    while i < history.len() {
        let msg = &history[i];
        match msg.role {
            Role::Assistant if msg.has_tool_calls() => {
                let mut expected: Vec<String> = msg
                    .tool_calls()
                    .map(|(id, _, _)| id.to_string())
                    .filter(|id| !id.is_empty())
                    .collect();

                // Unpairable: nothing but blank-id tool calls.
                let only_calls = msg
                    .parts
                    .iter()
                    .all(|p| matches!(p, MessagePart::ToolCall { .. }));
                if only_calls && expected.is_empty() {
                    tracing::warn!(
                        message_id = %msg.id,
                        "dropping assistant message with unpairable tool calls"
                    );
                    i += 1;
                    continue;
                }

                out.push(msg.clone());
                i += 1;

                // Consume the run of tool messages answering this call.
                while i < history.len() && history[i].role == Role::Tool {
                    if let Some(repaired) = filter_tool_message(&history[i], &mut expected) {
                        out.push(repaired);
                    }
                    i += 1;
                }

                // Synthesize results for anything still unanswered.
                if !expected.is_empty() {
                    let parts: Vec<MessagePart> = expected
                        .drain(..)
                        .map(|id| MessagePart::ToolResult {
                            tool_call_id: id,
                            content: NO_RESPONSE_CONTENT.into(),
                            is_error: true,
                        })
                        .collect();
                    out.push(Message::tool(&msg.session_id, parts));
                    out.push(Message::assistant(
                        &msg.session_id,
                        vec![MessagePart::Text {
                            text: "Understood.".into(),
                        }],
                    ));
                }
            }

            // A tool message outside any pending call run is orphaned.
            Role::Tool => {
                tracing::debug!(message_id = %msg.id, "dropping orphaned tool message");
                i += 1;
            }

            _ => {
                out.push(msg.clone());
                i += 1;
            }
        }
    }

    out
}

/// Keep only the results that answer a still-pending call; each id
/// matches at most once. Returns `None` when nothing survives.
fn filter_tool_message(msg: &Message, expected: &mut Vec<String>) -> Option<Message> {
    let kept: Vec<MessagePart> = msg
        .parts
        .iter()
        .filter(|p| match p {
            MessagePart::ToolResult { tool_call_id, .. } => {
                match expected.iter().position(|id| id == tool_call_id) {
                    Some(pos) => {
                        expected.remove(pos);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        })
        .cloned()
        .collect();

    if kept.is_empty() {
        None
    } else {
        let mut repaired = msg.clone();
        repaired.parts = kept;
        Some(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> Message {
        Message::user("s1", text)
    }

    fn assistant_call(id: &str) -> Message {
        Message::assistant(
            "s1",
            vec![
                MessagePart::Text {
                    text: "calling".into(),
                },
                MessagePart::ToolCall {
                    id: id.into(),
                    name: "echo".into(),
                    parameters: serde_json::json!({}),
                },
            ],
        )
    }

    fn tool_result(id: &str) -> Message {
        Message::tool(
            "s1",
            vec![MessagePart::ToolResult {
                tool_call_id: id.into(),
                content: "ok".into(),
                is_error: false,
            }],
        )
    }

    /// Structure of a history, ignoring ids and timestamps.
    fn shape(history: &[Message]) -> Vec<(Role, Vec<String>)> {
        history
            .iter()
            .map(|m| {
                let parts = m
                    .parts
                    .iter()
                    .map(|p| match p {
                        MessagePart::Text { text } => format!("text:{text}"),
                        MessagePart::Reasoning { .. } => "reasoning".into(),
                        MessagePart::ToolCall { id, .. } => format!("call:{id}"),
                        MessagePart::ToolResult {
                            tool_call_id,
                            content,
                            is_error,
                        } => format!("result:{tool_call_id}:{content}:{is_error}"),
                        MessagePart::Finish { .. } => "finish".into(),
                        MessagePart::Binary { .. } => "binary".into(),
                    })
                    .collect();
                (m.role, parts)
            })
            .collect()
    }

    #[test]
    fn well_formed_history_is_untouched() {
        let history = vec![user("hi"), assistant_call("c1"), tool_result("c1"), user("more")];
        let cleaned = clean_history(&history);
        assert_eq!(shape(&cleaned), shape(&history));
    }

    #[test]
    fn missing_result_is_synthesized_with_ack() {
        let history = vec![user("hi"), assistant_call("c1"), user("next")];
        let cleaned = clean_history(&history);

        assert_eq!(cleaned.len(), 5);
        assert_eq!(cleaned[2].role, Role::Tool);
        match &cleaned[2].parts[0] {
            MessagePart::ToolResult {
                tool_call_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_call_id, "c1");
                assert_eq!(content, NO_RESPONSE_CONTENT);
                assert!(is_error);
            }
            other => panic!("expected synthesized result, got {other:?}"),
        }
        assert_eq!(cleaned[3].role, Role::Assistant);
        assert_eq!(cleaned[3].text(), "Understood.");
        assert_eq!(cleaned[4].text(), "next");
    }

    #[test]
    fn partial_results_synthesize_only_missing() {
        let assistant = Message::assistant(
            "s1",
            vec![
                MessagePart::ToolCall {
                    id: "c1".into(),
                    name: "a".into(),
                    parameters: serde_json::json!({}),
                },
                MessagePart::ToolCall {
                    id: "c2".into(),
                    name: "b".into(),
                    parameters: serde_json::json!({}),
                },
            ],
        );
        let history = vec![user("hi"), assistant, tool_result("c1")];
        let cleaned = clean_history(&history);

        // user, assistant, real c1, synthesized c2, ack.
        assert_eq!(cleaned.len(), 5);
        let ids: Vec<_> = cleaned[3].tool_result_ids().collect();
        assert_eq!(ids, vec!["c2"]);
    }

    #[test]
    fn orphan_tool_message_is_dropped() {
        let history = vec![user("hi"), tool_result("ghost"), user("more")];
        let cleaned = clean_history(&history);
        assert_eq!(cleaned.len(), 2);
        assert!(cleaned.iter().all(|m| m.role != Role::Tool));
    }

    #[test]
    fn orphan_result_id_within_tool_message_is_dropped() {
        let tool_msg = Message::tool(
            "s1",
            vec![
                MessagePart::ToolResult {
                    tool_call_id: "c1".into(),
                    content: "ok".into(),
                    is_error: false,
                },
                MessagePart::ToolResult {
                    tool_call_id: "ghost".into(),
                    content: "??".into(),
                    is_error: false,
                },
            ],
        );
        let history = vec![assistant_call("c1"), tool_msg];
        let cleaned = clean_history(&history);

        let ids: Vec<_> = cleaned[1].tool_result_ids().collect();
        assert_eq!(ids, vec!["c1"]);
    }

    #[test]
    fn duplicate_result_matches_only_once() {
        let history = vec![assistant_call("c1"), tool_result("c1"), tool_result("c1")];
        let cleaned = clean_history(&history);
        // Second result for c1 is orphaned and dropped.
        assert_eq!(cleaned.len(), 2);
    }

    #[test]
    fn assistant_with_only_blank_calls_is_dropped() {
        let bad = Message::assistant(
            "s1",
            vec![MessagePart::ToolCall {
                id: String::new(),
                name: "echo".into(),
                parameters: serde_json::json!({}),
            }],
        );
        let history = vec![user("hi"), bad];
        let cleaned = clean_history(&history);
        assert_eq!(cleaned.len(), 1);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let history = vec![
            user("hi"),
            assistant_call("c1"),
            user("interrupt"),
            tool_result("c1"),
            assistant_call("c2"),
        ];
        let once = clean_history(&history);
        let twice = clean_history(&once);
        assert_eq!(shape(&once), shape(&twice));
    }

    #[test]
    fn empty_history_stays_empty() {
        assert!(clean_history(&[]).is_empty());
    }

    #[test]
    fn plain_conversation_untouched() {
        let history = vec![user("a"), Message::assistant("s1", vec![MessagePart::Text { text: "b".into() }])];
        let cleaned = clean_history(&history);
        assert_eq!(shape(&cleaned), shape(&history));
    }
}
