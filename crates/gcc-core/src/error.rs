use thiserror::Error;

/// Shared error taxonomy surfaced across the orchestrator and its
/// component crates (spec §7).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("session is locked by another process (pid {0})")]
    SessionLocked(u32),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session prefix '{0}' is ambiguous")]
    AmbiguousSessionPrefix(String),

    #[error("command timed out after {0}s and was killed")]
    CommandTimeout(u64),

    #[error("command was cancelled")]
    CommandCancelled,

    #[error("command failed with exit code {0}")]
    CommandFailed(i32),

    #[error("tool '{0}' is not installed")]
    ToolNotInstalled(String),

    #[error("classifier refused command: {0}")]
    ClassifierRefusal(String),

    #[error("log write failed: {0}")]
    LogWriteError(String),

    #[error("timed out acquiring lock: {0}")]
    LockTimeout(String),

    #[error("llm collaborator error: {0}")]
    LlmError(String),

    #[error("checkpoint write failed: {0}")]
    CheckpointWriteError(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}
