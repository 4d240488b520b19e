//! Shared domain types for the keel agent runtime.
//!
//! Everything here is provider- and transport-neutral: conversation
//! messages and parts, session records, queued inputs, the normalized
//! provider stream events, tool definitions, and the shared error type.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod input;
pub mod message;
pub mod schema;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
