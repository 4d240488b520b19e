//! HTTP surface for the keel agent daemon: input API, event feed, and
//! HMAC-validated webhook ingress.

pub mod api;
pub mod state;

pub use state::AppState;
