//! Error types for ChatGuard

/// Result type alias using ChatGuard's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ChatGuard operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Moderation rule errors (invalid patterns, malformed documents)
    #[error("rule error: {0}")]
    Rule(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a new rule error
    pub fn rule(msg: impl Into<String>) -> Self {
        Self::Rule(msg.into())
    }
}
