use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medialift_protocol::{ChunkAck, InitUploadResponse, progress_percent};

/// Lifecycle status of a client upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Uploading,
    Paused,
    Error,
    Completed,
    Cancelled,
}

/// The client-held record of one upload.
///
/// Persisted to the durable slot on every field change, so a reload at any
/// point observes the last acknowledged state. `progress` is only ever
/// derived from `uploaded_chunks`, and `uploaded_chunks` only ever moves on
/// a server acknowledgment — the server owns the truth of what landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    /// Local file to slice chunks from; needed to re-enter the transfer
    /// loop after a process restart.
    pub source_path: PathBuf,
    pub total_chunks: u32,
    pub chunk_size: u64,
    /// Count of chunks the server has acknowledged.
    pub uploaded_chunks: u32,
    /// `floor(uploaded_chunks / total_chunks * 100)`.
    pub progress: u8,
    /// Action payload to execute once the upload finishes. Opaque here.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub post_data: serde_json::Value,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Builds a fresh session from the server's init response.
    pub fn new(
        init: &InitUploadResponse,
        source_path: PathBuf,
        file_name: String,
        file_size: u64,
        file_type: String,
        post_data: serde_json::Value,
    ) -> Self {
        Self {
            upload_id: init.upload_id,
            file_name,
            file_size,
            file_type,
            source_path,
            total_chunks: init.total_chunks,
            chunk_size: init.chunk_size,
            uploaded_chunks: 0,
            progress: 0,
            post_data,
            status: SessionStatus::Uploading,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Adopts the server's acknowledged chunk count.
    ///
    /// Progress is recomputed from the count so the two can never drift.
    /// The ack may also move the count *down* (a reconcile after a lost
    /// acknowledgment); within an uninterrupted run it only grows.
    pub fn record_ack(&mut self, ack: ChunkAck) {
        self.uploaded_chunks = ack.total_received;
        self.progress = progress_percent(self.uploaded_chunks, self.total_chunks);
        self.touch();
    }

    pub fn pause(&mut self) {
        self.status = SessionStatus::Paused;
        self.touch();
    }

    /// Re-enters the uploading state, clearing any prior failure.
    pub fn resume(&mut self) {
        self.status = SessionStatus::Uploading;
        self.error = None;
        self.touch();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.error = Some(message.into());
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.uploaded_chunks = self.total_chunks;
        self.progress = 100;
        self.error = None;
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = SessionStatus::Cancelled;
        self.touch();
    }

    /// `true` once the session has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Cancelled
        )
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
