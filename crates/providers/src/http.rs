//! The HTTP provider adapter.
//!
//! One struct serves both dialects: the config picks the endpoint and
//! body shape, the shared [`crate::parser::SseParser`] normalizes the
//! stream. 429/529 responses are retried before a stream is returned;
//! anything else surfaces as `Error::Provider`.

use std::time::Duration;

use keel_domain::cancel::CancelToken;
use keel_domain::config::{ProviderConfig, ProviderDialect, RetryConfig};
use keel_domain::stream::{BoxStream, ModelInfo, ProviderEvent};
use keel_domain::{Error, Result};

use crate::encode::{build_chat_body, build_responses_body};
use crate::parser::SseParser;
use crate::retry::{self, AttemptError};
use crate::sse::sse_response_stream;
use crate::traits::{Provider, ProviderRequest};

pub struct HttpProvider {
    cfg: ProviderConfig,
    retry: RetryConfig,
    api_key: String,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Build the adapter from config. The API key is read from the
    /// configured environment variable; a missing key is tolerated at
    /// construction (some gateways run against keyless local endpoints)
    /// but logged.
    pub fn from_config(cfg: &ProviderConfig, retry: &RetryConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!(
                env = %cfg.api_key_env,
                "no API key in environment; requests will be unauthenticated"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            cfg: cfg.clone(),
            retry: retry.clone(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.cfg.base_url.trim_end_matches('/');
        match self.cfg.dialect {
            ProviderDialect::ChatCompletions => format!("{base}/chat/completions"),
            ProviderDialect::Responses => format!("{base}/responses"),
        }
    }

    fn label(&self) -> &'static str {
        match self.cfg.dialect {
            ProviderDialect::ChatCompletions => "chat_completions",
            ProviderDialect::Responses => "responses",
        }
    }
}

#[async_trait::async_trait]
impl Provider for HttpProvider {
    async fn stream(
        &self,
        cancel: &CancelToken,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let body = match self.cfg.dialect {
            ProviderDialect::ChatCompletions => build_chat_body(&self.cfg, req)?,
            ProviderDialect::Responses => build_responses_body(&self.cfg, req)?,
        };
        let url = self.endpoint();
        let label = self.label();

        tracing::debug!(
            provider = label,
            url = %url,
            model = %self.cfg.model,
            messages = req.history.len(),
            tools = req.tools.len(),
            "provider stream request"
        );

        let response = retry::with_retry(&self.retry, cancel, label, || {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            let api_key = self.api_key.clone();
            async move {
                let mut builder = client.post(&url).header("Content-Type", "application/json");
                if !api_key.is_empty() {
                    builder = builder.bearer_auth(&api_key);
                }
                let resp = builder
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AttemptError::Fatal(from_reqwest(e)))?;

                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    return Ok(resp);
                }

                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(retry::parse_retry_after);
                let text = resp.text().await.unwrap_or_default();

                if retry::is_retriable_status(status) {
                    Err(AttemptError::Retriable {
                        status,
                        retry_after,
                        message: text,
                    })
                } else {
                    Err(AttemptError::Fatal(Error::Provider {
                        provider: label.to_string(),
                        message: format!("HTTP {status} - {text}"),
                    }))
                }
            }
        })
        .await?;

        let mut parser = SseParser::new(self.cfg.dialect);
        Ok(sse_response_stream(response, move |data| parser.parse(data)))
    }

    fn model(&self) -> ModelInfo {
        ModelInfo {
            provider: self.label().to_string(),
            model: self.cfg.model.clone(),
            context_window: 128_000,
            max_output_tokens: self.cfg.max_tokens as u64,
        }
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
