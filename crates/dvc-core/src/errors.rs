use std::path::PathBuf;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the lifecycle
/// can treat failures consistently (routine vs durable-state risk).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("platform rejected request: {0}")]
    PlatformRejected(String),

    #[error("failed to persist {path}: {reason}")]
    PersistenceFailure { path: PathBuf, reason: String },

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// A user-facing problem with a command invocation (bad argument, etc).
    #[error("{0}")]
    Command(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Only persistence failures put durable state at risk; everything else is
    /// an expected, routine condition.
    pub fn is_operator_visible(&self) -> bool {
        matches!(self, Self::PersistenceFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
