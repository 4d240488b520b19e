use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub agent: AgentLoopConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Webhook endpoints (key = hook id in the `/hooks/:id` path).
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    /// Per-model pricing used for session cost accounting.
    #[serde(default)]
    pub pricing: HashMap<String, ModelPricing>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding session logs, the session index, and cron jobs.
    #[serde(default = "d_state_dir")]
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { dir: d_state_dir() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which SSE dialect the configured endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderDialect {
    /// OpenAI chat-completions style (`data: {...choices[].delta...}`).
    #[default]
    ChatCompletions,
    /// OpenAI responses style (`data: {"type":"response.*", ...}`).
    Responses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub dialect: ProviderDialect,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "d_120")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            dialect: ProviderDialect::ChatCompletions,
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            model: d_model(),
            max_tokens: d_max_tokens(),
            temperature: None,
            timeout_secs: 120,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Backoff for retriable provider responses (429 / 529).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "d_8")]
    pub max_retries: u32,
    #[serde(default = "d_1000")]
    pub base_delay_ms: u64,
    #[serde(default = "d_32000")]
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each backoff delay.
    #[serde(default = "d_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            jitter: 0.2,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Consecutive no-tool rounds before the turn voluntarily ends.
    #[serde(default = "d_16")]
    pub no_tool_sleep_rounds: u32,
    /// Hard bound on rounds per turn.
    #[serde(default = "d_24")]
    pub max_tool_rounds: u32,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            no_tool_sleep_rounds: 16,
            max_tool_rounds: 24,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction replaces a session's history with one summary message
/// once the accumulated context grows past the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Accumulated prompt+completion tokens that trigger auto-compaction.
    #[serde(default = "d_compact_tokens")]
    pub max_context_tokens: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            max_context_tokens: d_compact_tokens(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sub-agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Hard deadline per spawned sub-agent.
    #[serde(default = "d_300")]
    pub timeout_secs: u64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ticker cadence in seconds.
    #[serde(default = "d_60")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 60 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server / webhooks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: d_bind() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: String,
    /// When set, requests must carry a valid
    /// `X-Webhook-Signature: sha256=<hex>` HMAC over the raw body.
    #[serde(default)]
    pub secret: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pricing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ModelPricing {
    #[serde(default)]
    pub input_per_mtok: f64,
    #[serde(default)]
    pub output_per_mtok: f64,
}

impl ModelPricing {
    pub fn estimate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_mtok
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_mtok
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_state_dir() -> PathBuf {
    PathBuf::from("./state")
}
fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_api_key_env() -> String {
    "KEEL_API_KEY".into()
}
fn d_model() -> String {
    "gpt-4o".into()
}
fn d_max_tokens() -> u32 {
    8_192
}
fn d_bind() -> String {
    "127.0.0.1:3900".into()
}
fn d_true() -> bool {
    true
}
fn d_8() -> u32 {
    8
}
fn d_16() -> u32 {
    16
}
fn d_24() -> u32 {
    24
}
fn d_60() -> u64 {
    60
}
fn d_120() -> u64 {
    120
}
fn d_300() -> u64 {
    300
}
fn d_1000() -> u64 {
    1_000
}
fn d_32000() -> u64 {
    32_000
}
fn d_jitter() -> f64 {
    0.2
}
fn d_compact_tokens() -> u64 {
    120_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.retry.max_retries, 8);
        assert_eq!(cfg.retry.base_delay_ms, 1_000);
        assert_eq!(cfg.retry.max_delay_ms, 32_000);
        assert_eq!(cfg.agent.no_tool_sleep_rounds, 16);
        assert_eq!(cfg.spawn.timeout_secs, 300);
        assert_eq!(cfg.scheduler.tick_secs, 60);
        assert_eq!(cfg.provider.dialect, ProviderDialect::ChatCompletions);
    }

    #[test]
    fn partial_toml_overrides() {
        let cfg: Config = toml::from_str(
            r#"
            [provider]
            dialect = "responses"
            model = "o4-mini"

            [agent]
            no_tool_sleep_rounds = 4

            [[webhooks]]
            id = "github"
            secret = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.provider.dialect, ProviderDialect::Responses);
        assert_eq!(cfg.provider.model, "o4-mini");
        assert_eq!(cfg.agent.no_tool_sleep_rounds, 4);
        assert_eq!(cfg.webhooks[0].id, "github");
        assert_eq!(cfg.webhooks[0].secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn pricing_estimate() {
        let p = ModelPricing {
            input_per_mtok: 2.0,
            output_per_mtok: 8.0,
        };
        let cost = p.estimate_cost(1_000_000, 500_000);
        assert!((cost - 6.0).abs() < 1e-9);
    }
}
