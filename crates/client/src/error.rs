//! Upload engine error types.

/// Errors surfaced to the caller of the upload engine.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The server rejected session creation (bad file metadata). Not
    /// retryable without changing the input.
    #[error("session init rejected: {0}")]
    SessionInit(String),

    /// Another upload session is still active in this context.
    #[error("an upload is already in progress")]
    AlreadyActive,

    /// No session exists to operate on.
    #[error("no upload session")]
    NoSession,

    /// The requested operation is not valid for the session's status.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A transfer-level failure (network, server error).
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
