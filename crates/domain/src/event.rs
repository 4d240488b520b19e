use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Events published on the agent's broker after each turn milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// A completed assistant response (no tool calls pending).
    #[serde(rename = "response")]
    Response {
        session_id: String,
        message: Message,
    },

    /// The session's history was replaced by a summary message.
    #[serde(rename = "compact")]
    Compact {
        session_id: String,
        message: Message,
    },

    /// The turn ended with an error (store failure, cancellation, ...).
    #[serde(rename = "error")]
    Error {
        session_id: String,
        message: String,
    },
}

impl AgentEvent {
    pub fn session_id(&self) -> &str {
        match self {
            AgentEvent::Response { session_id, .. } => session_id,
            AgentEvent::Compact { session_id, .. } => session_id,
            AgentEvent::Error { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn event_json_tag() {
        let ev = AgentEvent::Response {
            session_id: "s1".into(),
            message: Message::user("s1", "hi"),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(ev.session_id(), "s1");
    }

    #[test]
    fn error_event_roundtrip() {
        let ev = AgentEvent::Error {
            session_id: "s1".into(),
            message: "boom".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        match back {
            AgentEvent::Error { message, .. } => assert_eq!(message, "boom"),
            _ => panic!("expected error event"),
        }
    }
}
