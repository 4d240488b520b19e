use serde::{Deserialize, Serialize};

/// An external prompt waiting in the agent's queue.
///
/// Sources are freeform strings; the well-known values are `signal`,
/// `webhook`, `api`, `cron`, and `spawn`, but channel-qualified forms
/// like `signal:dm:user-1` pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    /// Empty means "create a fresh session".
    #[serde(default)]
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Input {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: content.into(),
            source: source.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// The text persisted as the user message: `"[<source>] <content>"`,
    /// with a blank source rendered as `unknown`.
    pub fn formatted_content(&self) -> String {
        let source = if self.source.trim().is_empty() {
            "unknown"
        } else {
            self.source.as_str()
        };
        format!("[{source}] {}", self.content)
    }
}
