//! Error types for the sage task engine and memory store.

/// Top-level error type for the assistant core.
#[derive(Debug, thiserror::Error)]
pub enum SageError {
    /// Background task engine error (submission, shutdown, bad handle).
    #[error("task error: {0}")]
    Task(String),

    /// Memory store error (load, persist, malformed log).
    #[error("memory error: {0}")]
    Memory(String),

    /// Importance / mood / topic classification error.
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Language model request error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SageError>;
