//! SSE payload parser -- one state machine, two dialects.
//!
//! Chat-completions chunks carry `choices[].delta` objects; responses
//! chunks carry a `type` discriminator beginning `response.`. Both are
//! normalized into the same [`ProviderEvent`] sequence. Tool-call
//! fragments arrive keyed by an integer index, an id, or both; the
//! parser tracks them under whichever key appears first and promotes
//! to the real id as soon as one shows up.

use std::collections::BTreeMap;

use serde_json::Value;

use keel_domain::config::ProviderDialect;
use keel_domain::stream::{ProviderEvent, UsageInfo};
use keel_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call assembly state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Key for an in-flight tool call. Integer-indexed keys sort before
/// id keys, matching the "ascending key order" flush contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ToolKey {
    Index(u64),
    Id(String),
}

#[derive(Debug)]
struct ActiveCall {
    id: String,
    name: String,
}

/// Stateful parser fed one `data:` payload at a time.
pub struct SseParser {
    dialect: ProviderDialect,
    active: BTreeMap<ToolKey, ActiveCall>,
    usage: Option<UsageInfo>,
    stops_flushed: bool,
    completed: bool,
}

impl SseParser {
    pub fn new(dialect: ProviderDialect) -> Self {
        Self {
            dialect,
            active: BTreeMap::new(),
            usage: None,
            stops_flushed: false,
            completed: false,
        }
    }

    /// Parse one payload into zero or more normalized events.
    ///
    /// Malformed JSON is skipped (the line is logged, the stream
    /// continues) -- a single bad chunk must not kill the turn.
    pub fn parse(&mut self, data: &str) -> Vec<Result<ProviderEvent>> {
        if data.trim() == "[DONE]" {
            return self.finish(None);
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed SSE payload");
                return Vec::new();
            }
        };

        // Vendor error payload at the top level ends the stream.
        if let Some(err) = v.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("provider error")
                .to_string();
            self.completed = true;
            return vec![Ok(ProviderEvent::Error { message })];
        }

        match self.dialect {
            ProviderDialect::ChatCompletions => self.parse_chat(&v),
            ProviderDialect::Responses => self.parse_responses(&v),
        }
    }

    /// Flush `tool_use_stop` for every active key in ascending key
    /// order, then `complete`. Emitted at most once per stream.
    fn finish(&mut self, usage: Option<UsageInfo>) -> Vec<Result<ProviderEvent>> {
        let mut events = self.flush_stops();
        if let Some(u) = usage {
            self.usage = Some(u);
        }
        if !self.completed {
            self.completed = true;
            events.push(Ok(ProviderEvent::Complete { usage: self.usage }));
        }
        events
    }

    fn flush_stops(&mut self) -> Vec<Result<ProviderEvent>> {
        if self.stops_flushed {
            return Vec::new();
        }
        self.stops_flushed = true;
        let active = std::mem::take(&mut self.active);
        active
            .into_values()
            .map(|call| {
                Ok(ProviderEvent::ToolUseStop {
                    tool_call_id: call.id,
                })
            })
            .collect()
    }

    // ── chat-completions dialect ──────────────────────────────────

    fn parse_chat(&mut self, v: &Value) -> Vec<Result<ProviderEvent>> {
        let mut events = Vec::new();

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        // Usage-only chunk (stream_options.include_usage).
        let Some(choice) = choice else {
            if let Some(usage) = v.get("usage").and_then(parse_chat_usage) {
                self.usage = Some(usage);
            }
            return events;
        };

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        // Reasoning: `thinking` > `reasoning` > `reasoning_content`,
        // at most one delta per chunk.
        for field in ["thinking", "reasoning", "reasoning_content"] {
            if let Some(text) = delta.get(field).and_then(|t| t.as_str()) {
                if !text.is_empty() {
                    events.push(Ok(ProviderEvent::ThinkingDelta {
                        delta: text.to_string(),
                    }));
                }
                break;
            }
        }

        if let Some(text) = delta.get("content").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                events.push(Ok(ProviderEvent::ContentDelta {
                    delta: text.to_string(),
                }));
            }
        }

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for tc in tc_arr {
                events.extend(self.chat_tool_fragment(tc));
            }
        }

        // Finish reason: the call list is complete, flush the stops.
        // `complete` itself waits for the usage chunk / [DONE].
        if choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .is_some()
        {
            if let Some(usage) = v.get("usage").and_then(parse_chat_usage) {
                self.usage = Some(usage);
            }
            events.extend(self.flush_stops());
        }

        events
    }

    /// One entry of `delta.tool_calls[]`: may carry an index, an id, a
    /// function name, argument fragments, or any mix of those.
    fn chat_tool_fragment(&mut self, tc: &Value) -> Vec<Result<ProviderEvent>> {
        let mut events = Vec::new();

        let index = tc.get("index").and_then(|i| i.as_u64());
        let id = tc
            .get("id")
            .and_then(|i| i.as_str())
            .map(normalize_call_id);
        let name = tc
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str());
        let args = tc
            .get("function")
            .and_then(|f| f.get("arguments"))
            .and_then(|a| a.as_str());

        let mut key = match (index, &id) {
            (Some(idx), _) => ToolKey::Index(idx),
            (None, Some(id)) => ToolKey::Id(id.clone()),
            (None, None) => ToolKey::Index(0),
        };

        // A fragment keyed only by id may belong to a call registered
        // under its index (or vice versa) -- match on the call id too.
        if !self.active.contains_key(&key) {
            if let Some(id) = &id {
                if let Some(existing) = self
                    .active
                    .iter()
                    .find(|(_, c)| &c.id == id)
                    .map(|(k, _)| k.clone())
                {
                    key = existing;
                }
            }
        }

        let is_new = !self.active.contains_key(&key);
        if is_new {
            // A fresh key with no id yet falls back to the key itself.
            let call_id = id.clone().unwrap_or_else(|| match &key {
                ToolKey::Index(idx) => format!("call_{idx}"),
                ToolKey::Id(id) => id.clone(),
            });
            let call = ActiveCall {
                id: call_id.clone(),
                name: name.unwrap_or("").to_string(),
            };
            events.push(Ok(ProviderEvent::ToolUseStart {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
            }));
            self.active.insert(key.clone(), call);
        } else if let Some(call) = self.active.get_mut(&key) {
            // Promote to the real id / name on first appearance.
            if let Some(id) = &id {
                call.id = id.clone();
            }
            if let Some(name) = name {
                if call.name.is_empty() {
                    call.name = name.to_string();
                }
            }
        }

        if let Some(args) = args {
            if !args.is_empty() {
                if let Some(call) = self.active.get(&key) {
                    events.push(Ok(ProviderEvent::ToolUseDelta {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        delta: args.to_string(),
                    }));
                }
            }
        }

        events
    }

    // ── responses dialect ─────────────────────────────────────────

    fn parse_responses(&mut self, v: &Value) -> Vec<Result<ProviderEvent>> {
        let chunk_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if !chunk_type.starts_with("response.") {
            return Vec::new();
        }

        match chunk_type {
            "response.output_text.delta" => {
                let delta = v.get("delta").and_then(|d| d.as_str()).unwrap_or("");
                if delta.is_empty() {
                    Vec::new()
                } else {
                    vec![Ok(ProviderEvent::ContentDelta {
                        delta: delta.to_string(),
                    })]
                }
            }

            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                let delta = v.get("delta").and_then(|d| d.as_str()).unwrap_or("");
                if delta.is_empty() {
                    Vec::new()
                } else {
                    vec![Ok(ProviderEvent::ThinkingDelta {
                        delta: delta.to_string(),
                    })]
                }
            }

            "response.output_item.added" => {
                let Some(item) = v.get("item") else {
                    return Vec::new();
                };
                if item.get("type").and_then(|t| t.as_str()) != Some("function_call") {
                    return Vec::new();
                }
                // `call_id` is what tool results must reference; the
                // item `id` is the stream-local key argument deltas use.
                let item_id = item.get("id").and_then(|i| i.as_str()).unwrap_or("");
                let call_id = item
                    .get("call_id")
                    .and_then(|i| i.as_str())
                    .unwrap_or(item_id);
                let call_id = normalize_call_id(call_id);
                let name = item
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string();
                let key = ToolKey::Id(if item_id.is_empty() {
                    call_id.clone()
                } else {
                    item_id.to_string()
                });
                let start = ProviderEvent::ToolUseStart {
                    tool_call_id: call_id.clone(),
                    tool_name: name.clone(),
                };
                self.active.insert(key, ActiveCall { id: call_id, name });
                vec![Ok(start)]
            }

            "response.function_call_arguments.delta" => {
                let delta = v.get("delta").and_then(|d| d.as_str()).unwrap_or("");
                if delta.is_empty() {
                    return Vec::new();
                }
                let item_id = v.get("item_id").and_then(|i| i.as_str()).unwrap_or("");
                let key = ToolKey::Id(item_id.to_string());
                match self.active.get(&key) {
                    Some(call) => vec![Ok(ProviderEvent::ToolUseDelta {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        delta: delta.to_string(),
                    })],
                    // Fragment for an unknown item -- tolerate and drop.
                    None => Vec::new(),
                }
            }

            "response.completed" | "response.done" => {
                let usage = v
                    .get("response")
                    .and_then(|r| r.get("usage"))
                    .and_then(parse_responses_usage);
                self.finish(usage)
            }

            "response.failed" | "response.incomplete" => {
                let message = v
                    .get("response")
                    .and_then(|r| r.get("error"))
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("response failed")
                    .to_string();
                self.completed = true;
                vec![Ok(ProviderEvent::Error { message })]
            }

            // Lifecycle chatter (created, in_progress, content_part.*,
            // output_item.done, ...) carries nothing we need.
            _ => Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Some routers suffix call ids with `|<routing-tag>`; only the prefix
/// is the real id.
pub(crate) fn normalize_call_id(id: &str) -> String {
    match id.split_once('|') {
        Some((prefix, _)) => prefix.to_string(),
        None => id.to_string(),
    }
}

fn parse_chat_usage(v: &Value) -> Option<UsageInfo> {
    Some(UsageInfo {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()?,
        completion_tokens: v.get("completion_tokens")?.as_u64()?,
        cache_read_tokens: v
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|c| c.as_u64())
            .unwrap_or(0),
        cache_write_tokens: 0,
    })
}

fn parse_responses_usage(v: &Value) -> Option<UsageInfo> {
    Some(UsageInfo {
        prompt_tokens: v.get("input_tokens")?.as_u64()?,
        completion_tokens: v.get("output_tokens")?.as_u64()?,
        cache_read_tokens: v
            .get("input_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|c| c.as_u64())
            .unwrap_or(0),
        cache_write_tokens: 0,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
