/// Shared error type used across all keel crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Non-retriable HTTP status or vendor error payload.
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// `run_once` was called while the worker already holds the turn.
    #[error("agent busy: a turn is already active")]
    AgentBusy,

    /// The turn's cancel token fired.
    #[error("cancelled")]
    Cancelled,

    /// Any persistence failure. Aborts the turn; prior appends stay.
    #[error("store: {0}")]
    Store(String),

    /// A sub-agent exceeded its deadline.
    #[error("sub-agent timed out: {0}")]
    SpawnTimeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable kind, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "provider_transport",
            Error::Timeout(_) => "provider_transport",
            Error::Provider { .. } => "provider_status",
            Error::AgentBusy => "agent_busy",
            Error::Cancelled => "cancelled",
            Error::Store(_) => "store_failure",
            Error::SpawnTimeout(_) => "spawn_timeout",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }

    /// Whether this error came from the turn's cancel token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
