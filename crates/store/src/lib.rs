//! Persistent conversation state for the keel runtime.
//!
//! The agent core only ever talks to the [`MessageStore`] trait; the
//! file-backed [`FileStore`] is the default implementation. Message
//! logs are append-only JSONL, one file per session, with a JSON
//! session index alongside. Compaction swaps a session's log
//! atomically via a temp-file rename.

pub mod file;

pub use file::FileStore;

use keel_domain::message::{Message, Session};
use keel_domain::Result;

/// Interface the agent core uses for all conversation persistence.
///
/// Implementations must be internally synchronized: the worker task,
/// sub-agents, and API handlers all share one store.
pub trait MessageStore: Send + Sync {
    /// Create and persist a fresh session.
    fn create_session(&self, parent_session_id: Option<&str>, title: &str) -> Result<Session>;

    fn get_session(&self, id: &str) -> Result<Option<Session>>;

    fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Persist updated session fields (counters, title, summary id, cost).
    fn update_session(&self, session: &Session) -> Result<()>;

    /// Append messages to a session's log. Bumps `message_count` and
    /// `updated_at` on the session entry.
    fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// Full message history for a session, in persisted order.
    fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Atomically replace the session's entire history (compaction).
    /// Sets `message_count` to the new length.
    fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// Remove a session and cascade-delete its message log.
    fn delete_session(&self, id: &str) -> Result<()>;
}
