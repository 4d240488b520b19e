use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for normalized LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Normalized streaming events -- the stable contract between the
/// provider adapter and the agent loop. Vendor SSE dialects are
/// flattened into exactly this sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderEvent {
    /// A fragment of displayable assistant text.
    #[serde(rename = "content_delta")]
    ContentDelta { delta: String },

    /// A fragment of model reasoning/thinking.
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { delta: String },

    /// First appearance of a tool call in the stream.
    #[serde(rename = "tool_use_start")]
    ToolUseStart {
        tool_call_id: String,
        tool_name: String,
    },

    /// An argument fragment for an in-flight tool call.
    #[serde(rename = "tool_use_delta")]
    ToolUseDelta {
        tool_call_id: String,
        tool_name: String,
        delta: String,
    },

    /// The tool call's arguments are complete.
    #[serde(rename = "tool_use_stop")]
    ToolUseStop { tool_call_id: String },

    /// Graceful end of stream.
    #[serde(rename = "complete")]
    Complete { usage: Option<UsageInfo> },

    /// Transport failure or vendor error payload; the stream closes.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

impl UsageInfo {
    pub fn add(&mut self, other: &UsageInfo) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Static facts about the model behind a provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub context_window: u64,
    pub max_output_tokens: u64,
}
