//! Request-body construction -- flattening [`Message`] histories into
//! each dialect's wire shape.
//!
//! Chat-completions: text and reasoning parts concatenate into the
//! per-message `content` string, tool calls become `tool_calls`
//! entries on the assistant message, and every tool result splits into
//! its own `role: "tool"` message. Responses: the same history encodes
//! as `input` items (`function_call` / `function_call_output`).
//! Binary parts are rejected for both dialects.

use serde_json::Value;

use keel_domain::config::ProviderConfig;
use keel_domain::message::{Message, MessagePart, Role};
use keel_domain::tool::ToolDefinition;
use keel_domain::{Error, Result};

use crate::traits::ProviderRequest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat-completions dialect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_chat_body(cfg: &ProviderConfig, req: &ProviderRequest) -> Result<Value> {
    let mut messages: Vec<Value> = Vec::new();

    if !req.system.is_empty() {
        messages.push(serde_json::json!({
            "role": "system",
            "content": req.system,
        }));
    }

    for msg in &req.history {
        match msg.role {
            Role::User => messages.push(serde_json::json!({
                "role": "user",
                "content": flatten_text(msg)?,
            })),
            Role::Assistant => messages.push(assistant_to_chat(msg)?),
            Role::Tool => {
                // Each tool result becomes its own tool-role message.
                for part in &msg.parts {
                    if let MessagePart::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = part
                    {
                        messages.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
            }
        }
    }

    let mut body = serde_json::json!({
        "model": cfg.model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
        "max_tokens": cfg.max_tokens,
    });
    if let Some(temp) = cfg.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(tool_to_chat).collect();
        body["tools"] = Value::Array(tools);
    }
    Ok(body)
}

fn assistant_to_chat(msg: &Message) -> Result<Value> {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut tool_calls: Vec<Value> = Vec::new();

    let text = flatten_text(msg)?;
    for part in &msg.parts {
        if let MessagePart::ToolCall {
            id,
            name,
            parameters,
        } = part
        {
            tool_calls.push(serde_json::json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": parameters.to_string(),
                }
            }));
        }
    }

    obj["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    Ok(obj)
}

fn tool_to_chat(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses dialect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_responses_body(cfg: &ProviderConfig, req: &ProviderRequest) -> Result<Value> {
    let mut input: Vec<Value> = Vec::new();

    for msg in &req.history {
        match msg.role {
            Role::User => input.push(serde_json::json!({
                "role": "user",
                "content": flatten_text(msg)?,
            })),
            Role::Assistant => {
                let text = flatten_text(msg)?;
                if !text.is_empty() {
                    input.push(serde_json::json!({
                        "role": "assistant",
                        "content": text,
                    }));
                }
                for part in &msg.parts {
                    if let MessagePart::ToolCall {
                        id,
                        name,
                        parameters,
                    } = part
                    {
                        input.push(serde_json::json!({
                            "type": "function_call",
                            "call_id": id,
                            "name": name,
                            "arguments": parameters.to_string(),
                        }));
                    }
                }
            }
            Role::Tool => {
                for part in &msg.parts {
                    if let MessagePart::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = part
                    {
                        input.push(serde_json::json!({
                            "type": "function_call_output",
                            "call_id": tool_call_id,
                            "output": content,
                        }));
                    }
                }
            }
        }
    }

    let mut body = serde_json::json!({
        "model": cfg.model,
        "input": input,
        "stream": true,
        "max_output_tokens": cfg.max_tokens,
    });
    if !req.system.is_empty() {
        body["instructions"] = Value::String(req.system.clone());
    }
    if let Some(temp) = cfg.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    Ok(body)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text and reasoning parts, concatenated in part order. Errors on
/// binary parts -- neither configured dialect accepts them.
fn flatten_text(msg: &Message) -> Result<String> {
    let mut buf = String::new();
    for part in &msg.parts {
        match part {
            MessagePart::Text { text } | MessagePart::Reasoning { text } => {
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(text);
            }
            MessagePart::Binary { mime_type, .. } => {
                return Err(Error::Provider {
                    provider: "encode".into(),
                    message: format!("binary part ({mime_type}) not supported by this provider"),
                });
            }
            _ => {}
        }
    }
    Ok(buf)
}
