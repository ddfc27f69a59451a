use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Starts a new upload session.
///
/// `post_data` is the caller's eventual action payload (e.g. the post to
/// create once the media is live). It is opaque to the upload engine and the
/// server ignores it; the client threads it into its completion callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub post_data: serde_json::Value,
}

/// Acknowledges session creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: Uuid,
    pub total_chunks: u32,
    /// Effective chunk size. Fixed for the lifetime of the session.
    pub chunk_size: u64,
}

/// Server-truth progress, returned by both chunk patch and status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    /// Count of distinct chunk indices received so far.
    pub total_received: u32,
    /// `floor(totalReceived / totalChunks * 100)`.
    pub progress: u8,
}

/// Result of finalizing an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    /// Durable reference to the assembled object (URL or storage key).
    pub object_ref: String,
    pub size: u64,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
