use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity and counters for one conversation.
///
/// `message_count` always equals the number of persisted messages for
/// this session. Token counters and cost grow across normal turns and
/// are overwritten (reset) by compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Set for sub-agent sessions; parent and child never share an id.
    #[serde(default)]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    /// Non-empty once the session has been compacted; holds the id of
    /// the synthetic summary message.
    #[serde(default)]
    pub summary_message_id: String,
    #[serde(default)]
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(parent_session_id: Option<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_session_id,
            title: title.into(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            summary_message_id: String::new(),
            cost: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_compacted(&self) -> bool {
        !self.summary_message_id.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message & parts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// An ordered entry in a session. Append-only, except that compaction
/// atomically replaces a session's entire history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

/// One piece of a message, discriminated by `type` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePart {
    /// Displayable content.
    #[serde(rename = "text")]
    Text { text: String },

    /// Model chain-of-thought. Preserved in the history but never
    /// handed to untyped consumers as content.
    #[serde(rename = "reasoning")]
    Reasoning { text: String },

    /// A tool invocation requested by the model. `parameters` is a raw
    /// JSON object (may be empty `{}`), never a re-encoded string.
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        parameters: serde_json::Value,
    },

    /// Pairs with a prior `tool_call` of the same id.
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Optional terminal marker.
    #[serde(rename = "finish")]
    Finish { reason: String },

    /// Bytes with a media type. Only some providers accept these.
    #[serde(rename = "binary")]
    Binary {
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            session_id,
            Role::User,
            vec![MessagePart::Text { text: text.into() }],
        )
    }

    pub fn assistant(session_id: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        Self::new(session_id, Role::Assistant, parts)
    }

    pub fn tool(session_id: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        Self::new(session_id, Role::Tool, parts)
    }

    /// All text parts joined (reasoning excluded).
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool-call parts in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.parts.iter().filter_map(|p| match p {
            MessagePart::ToolCall {
                id,
                name,
                parameters,
            } => Some((id.as_str(), name.as_str(), parameters)),
            _ => None,
        })
    }

    /// Tool-result ids present in this message.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            MessagePart::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
    }

    /// True when the message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }
}

// ── base64 (de)serialization for binary part data ──────────────────

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
