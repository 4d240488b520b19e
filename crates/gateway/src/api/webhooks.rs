//! Webhook ingress -- `POST /hooks/:id`.
//!
//! When the hook has a configured secret, requests must carry
//! `X-Webhook-Signature: sha256=<hex>`, an HMAC-SHA256 over the raw
//! body, compared in constant time. Valid posts enqueue an input and
//! return 202; the route only accepts POST, so other methods get 405
//! from the router.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use keel_domain::input::Input;

use crate::api::api_error;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(hook_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.webhooks.get(&hook_id) else {
        return api_error(StatusCode::NOT_FOUND, "unknown webhook");
    };

    if let Some(secret) = secret {
        let sig_header = headers
            .get("x-webhook-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let sig_hex = sig_header.strip_prefix("sha256=").unwrap_or(sig_header);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(&body);
        let computed = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison.
        if computed.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() != 1 {
            tracing::warn!(hook = %hook_id, "webhook signature mismatch");
            return api_error(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    let content = format!("[webhook:{hook_id}] {}", String::from_utf8_lossy(&body));
    state.agent.enqueue(Input {
        session_id: String::new(),
        content,
        source: "webhook".into(),
        metadata: serde_json::json!({ "id": hook_id }),
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use keel_agent::scheduler::Scheduler;
    use keel_agent::tools::ToolSet;
    use keel_agent::{Agent, AgentSettings};
    use keel_domain::cancel::CancelToken;
    use keel_domain::message::Role;
    use keel_domain::stream::{BoxStream, ModelInfo, ProviderEvent};
    use keel_domain::Result as DomainResult;
    use keel_providers::{Provider, ProviderRequest};
    use keel_store::{FileStore, MessageStore};

    /// Completes immediately with no content.
    struct NullProvider;

    #[async_trait::async_trait]
    impl Provider for NullProvider {
        async fn stream(
            &self,
            _cancel: &CancelToken,
            _req: &ProviderRequest,
        ) -> DomainResult<BoxStream<'static, DomainResult<ProviderEvent>>> {
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(
                ProviderEvent::Complete { usage: None },
            )])))
        }

        fn model(&self) -> ModelInfo {
            ModelInfo {
                provider: "null".into(),
                model: "null".into(),
                context_window: 1,
                max_output_tokens: 1,
            }
        }
    }

    fn test_state(secret: Option<&str>) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MessageStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let agent = Agent::new(
            store.clone(),
            Arc::new(NullProvider),
            ToolSet::new(),
            AgentSettings::default(),
        );
        let scheduler = Arc::new(Scheduler::load(dir.path()).unwrap());
        let mut webhooks = HashMap::new();
        webhooks.insert("github".to_string(), secret.map(String::from));
        (
            dir,
            AppState {
                agent,
                store,
                scheduler,
                webhooks: Arc::new(webhooks),
            },
        )
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    async fn wait_for_user_message(state: &AppState) -> Option<String> {
        for _ in 0..100 {
            if let Some(session) = state.store.list_sessions().unwrap().first() {
                let messages = state.store.list_messages(&session.id).unwrap();
                if let Some(m) = messages.iter().find(|m| m.role == Role::User) {
                    return Some(m.text());
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn valid_signature_is_accepted_and_enqueued() {
        let (_dir, state) = test_state(Some("s3cret"));
        let body = Bytes::from_static(b"deploy finished");
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-webhook-signature",
            sign("s3cret", &body).parse().unwrap(),
        );

        let response = receive_webhook(
            State(state.clone()),
            Path("github".to_string()),
            headers,
            body,
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let text = wait_for_user_message(&state).await.expect("input processed");
        assert!(text.starts_with("[webhook] [webhook:github] "));
        assert!(text.ends_with("deploy finished"));
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_without_enqueue() {
        let (_dir, state) = test_state(Some("s3cret"));
        let body = Bytes::from_static(b"deploy finished");
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-signature", "sha256=deadbeef".parse().unwrap());

        let response = receive_webhook(
            State(state.clone()),
            Path("github".to_string()),
            headers,
            body,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.store.list_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_is_rejected_when_secret_set() {
        let (_dir, state) = test_state(Some("s3cret"));
        let response = receive_webhook(
            State(state),
            Path("github".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"x"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn secretless_hook_accepts_unsigned_posts() {
        let (_dir, state) = test_state(None);
        let response = receive_webhook(
            State(state.clone()),
            Path("github".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"ping"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(wait_for_user_message(&state).await.is_some());
    }

    #[tokio::test]
    async fn unknown_hook_is_not_found() {
        let (_dir, state) = test_state(None);
        let response = receive_webhook(
            State(state),
            Path("nope".to_string()),
            HeaderMap::new(),
            Bytes::from_static(b"x"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
