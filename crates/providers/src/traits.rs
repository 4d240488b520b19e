use keel_domain::cancel::CancelToken;
use keel_domain::message::Message;
use keel_domain::stream::{BoxStream, ModelInfo, ProviderEvent};
use keel_domain::tool::ToolDefinition;
use keel_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request: the system prompt, the
/// cleaned conversation history, and the current tool schemas.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub system: String,
    pub history: Vec<Message>,
    /// Empty disables tool use for this call (compaction does this).
    pub tools: Vec<ToolDefinition>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single interface between the agent loop and any LLM vendor.
///
/// Implementations normalize their wire dialect into one
/// [`ProviderEvent`] sequence and hide transient retries; the loop
/// never sees vendor SSE shapes or 429s.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Open a streaming completion. The cancel token aborts retry
    /// backoff waits; the caller also checks it between stream reads.
    async fn stream(
        &self,
        cancel: &CancelToken,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>>;

    /// Static facts about the configured model.
    fn model(&self) -> ModelInfo;
}
