//! Vendor-neutral streaming LLM adapter.
//!
//! One HTTP adapter ([`HttpProvider`]) speaks both supported SSE
//! dialects (chat-completions and responses) and normalizes them into
//! the [`keel_domain::stream::ProviderEvent`] sequence the agent loop
//! consumes. Transient 429/529 responses are retried with backoff
//! before the stream is handed back.

pub mod encode;
pub mod http;
pub mod parser;
pub mod retry;
pub mod sse;
pub mod traits;

pub use http::HttpProvider;
pub use traits::{Provider, ProviderRequest};
