use medialift_protocol::error_code;

/// Failure taxonomy of the session store and finalizer.
///
/// Every variant maps to one stable wire code, so clients can branch on the
/// code without parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Session creation rejected by policy. No session exists afterwards.
    #[error("{0}")]
    InvalidUpload(String),

    /// No session with the given id.
    #[error("unknown upload session")]
    NotFound,

    /// Chunk index at or past `totalChunks`.
    #[error("chunk index {index} out of range for {total} chunks")]
    ChunkOutOfRange { index: u32, total: u32 },

    /// Chunk body does not match what the session expects for that index
    /// (wrong length, or checksum mismatch).
    #[error("{0}")]
    ChunkMismatch(String),

    /// Finalize requested before every chunk landed.
    #[error("upload incomplete: {received} of {total} chunks received")]
    Incomplete { received: u32, total: u32 },

    /// Spool or object backend failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidUpload(_) => error_code::INVALID_UPLOAD,
            StoreError::NotFound => error_code::NOT_FOUND,
            StoreError::ChunkOutOfRange { .. } => error_code::CHUNK_OUT_OF_RANGE,
            StoreError::ChunkMismatch(_) => error_code::CHUNK_MISMATCH,
            StoreError::Incomplete { .. } => error_code::INCOMPLETE,
            StoreError::Storage(_) => error_code::STORAGE,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}
