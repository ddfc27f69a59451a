//! Server-side upload session store.
//!
//! Sessions live in memory; chunk bytes are spooled to disk under
//! `spool/{uploadId}/chunk_{index:06}` so a resent chunk is a pure file
//! overwrite. Per-index receipt is tracked in a dense slot array and the
//! acknowledged count is always recomputed from it, never kept as a running
//! sum — receiving the same index twice cannot inflate progress.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use medialift_protocol::{
    ChunkAck, InitUploadRequest, InitUploadResponse, expected_chunk_len, progress_percent,
    total_chunks,
};

use crate::error::StoreError;

/// Admission policy applied at session init.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// MIME type prefixes accepted for upload.
    pub allowed_type_prefixes: Vec<String>,
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_type_prefixes: vec!["image/".into(), "video/".into(), "audio/".into()],
            max_file_size: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// One tracked upload session.
struct SessionRecord {
    file_name: String,
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
    /// Slot per chunk index; `Some(len)` once that index has been received.
    received: Vec<Option<u64>>,
    last_activity: Instant,
}

impl SessionRecord {
    fn total_received(&self) -> u32 {
        self.received.iter().filter(|slot| slot.is_some()).count() as u32
    }

    fn ack(&self) -> ChunkAck {
        let received = self.total_received();
        ChunkAck {
            total_received: received,
            progress: progress_percent(received, self.total_chunks),
        }
    }
}

/// A session that passed the completeness check and left the store.
/// Holds everything the finalizer needs to assemble the object.
#[derive(Debug)]
pub struct CompletedSession {
    pub upload_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    /// Spool directory holding `chunk_{index:06}` files.
    pub spool: PathBuf,
}

/// In-memory session map plus on-disk chunk spool.
pub struct UploadStore {
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
    spool_root: PathBuf,
    chunk_size: u64,
    policy: UploadPolicy,
    session_ttl: Duration,
}

impl UploadStore {
    pub fn new(
        spool_root: impl Into<PathBuf>,
        chunk_size: u64,
        policy: UploadPolicy,
        session_ttl: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            spool_root: spool_root.into(),
            chunk_size,
            policy,
            session_ttl,
        }
    }

    /// Effective chunk size applied to every session.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Creates a session for the described file.
    ///
    /// Policy violations are [`StoreError::InvalidUpload`] and leave no
    /// session behind. `totalChunks` is fixed here for the whole session.
    pub async fn init(&self, req: &InitUploadRequest) -> Result<InitUploadResponse, StoreError> {
        if req.file_size == 0 {
            return Err(StoreError::InvalidUpload("file is empty".into()));
        }
        if req.file_size > self.policy.max_file_size {
            return Err(StoreError::InvalidUpload(format!(
                "file size {} exceeds the {} byte limit",
                req.file_size, self.policy.max_file_size
            )));
        }
        if !self
            .policy
            .allowed_type_prefixes
            .iter()
            .any(|prefix| req.file_type.starts_with(prefix.as_str()))
        {
            return Err(StoreError::InvalidUpload(format!(
                "file type {} not allowed",
                req.file_type
            )));
        }

        let upload_id = Uuid::new_v4();
        let total = total_chunks(req.file_size, self.chunk_size);
        tokio::fs::create_dir_all(self.spool_dir(upload_id)).await?;

        let record = SessionRecord {
            file_name: req.file_name.clone(),
            file_size: req.file_size,
            chunk_size: self.chunk_size,
            total_chunks: total,
            received: vec![None; total as usize],
            last_activity: Instant::now(),
        };
        self.sessions.write().await.insert(upload_id, record);

        info!(
            %upload_id,
            file = %req.file_name,
            size = req.file_size,
            total_chunks = total,
            "upload session created"
        );
        Ok(InitUploadResponse {
            upload_id,
            total_chunks: total,
            chunk_size: self.chunk_size,
        })
    }

    /// Receives chunk `index`, idempotently.
    ///
    /// A resent index overwrites the spooled file and flips a slot that is
    /// already set, so the acknowledged count never double-counts. The chunk
    /// body must carry exactly the expected length for its index, and must
    /// match `checksum` when one is supplied.
    ///
    /// The spool write happens outside the session lock: patches for
    /// different sessions (and status reads) never serialize behind each
    /// other's disk I/O. Per-index overwrite keeps the unlocked write safe.
    pub async fn patch(
        &self,
        upload_id: Uuid,
        index: u32,
        data: &[u8],
        checksum: Option<&str>,
    ) -> Result<ChunkAck, StoreError> {
        let (path, expected) = {
            let sessions = self.sessions.read().await;
            let record = sessions.get(&upload_id).ok_or(StoreError::NotFound)?;

            if index >= record.total_chunks {
                return Err(StoreError::ChunkOutOfRange {
                    index,
                    total: record.total_chunks,
                });
            }
            let expected = expected_chunk_len(record.file_size, record.chunk_size, index);
            if data.len() as u64 != expected {
                return Err(StoreError::ChunkMismatch(format!(
                    "chunk {index} carries {} bytes, expected {expected}",
                    data.len()
                )));
            }
            if let Some(declared) = checksum {
                let actual = hex::encode(Sha256::digest(data));
                if !declared.eq_ignore_ascii_case(&actual) {
                    return Err(StoreError::ChunkMismatch(format!(
                        "chunk {index} checksum mismatch"
                    )));
                }
            }
            (self.chunk_path(upload_id, index), expected)
        };

        if let Err(e) = tokio::fs::write(&path, data).await {
            // A missing spool dir means the session was deleted mid-write.
            return Err(if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                e.into()
            });
        }

        let mut sessions = self.sessions.write().await;
        // The session may have been cancelled or swept during the write.
        let record = sessions.get_mut(&upload_id).ok_or(StoreError::NotFound)?;
        record.received[index as usize] = Some(expected);
        record.last_activity = Instant::now();

        let ack = record.ack();
        debug!(
            %upload_id,
            index,
            received = ack.total_received,
            of = record.total_chunks,
            "chunk received"
        );
        Ok(ack)
    }

    /// Server-truth progress for the session.
    pub async fn status(&self, upload_id: Uuid) -> Result<ChunkAck, StoreError> {
        let sessions = self.sessions.read().await;
        let record = sessions.get(&upload_id).ok_or(StoreError::NotFound)?;
        Ok(record.ack())
    }

    /// Verifies every chunk landed and removes the session from the map.
    ///
    /// The caller hands the returned [`CompletedSession`] to the finalizer.
    /// The session is gone either way, so a repeated complete is a
    /// [`StoreError::NotFound`] and the store can never leak a finished one.
    pub async fn complete(&self, upload_id: Uuid) -> Result<CompletedSession, StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get(&upload_id).ok_or(StoreError::NotFound)?;

        let received = record.total_received();
        if received < record.total_chunks {
            return Err(StoreError::Incomplete {
                received,
                total: record.total_chunks,
            });
        }

        let record = sessions.remove(&upload_id).ok_or(StoreError::NotFound)?;
        Ok(CompletedSession {
            upload_id,
            file_name: record.file_name,
            file_size: record.file_size,
            total_chunks: record.total_chunks,
            spool: self.spool_dir(upload_id),
        })
    }

    /// Removes the session and its spooled chunks. Idempotent: deleting an
    /// unknown session is not an error.
    pub async fn delete(&self, upload_id: Uuid) {
        let removed = self.sessions.write().await.remove(&upload_id).is_some();
        match tokio::fs::remove_dir_all(self.spool_dir(upload_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(%upload_id, "failed to remove spool: {e}"),
        }
        if removed {
            info!(%upload_id, "upload session deleted");
        }
    }

    /// Deletes sessions idle longer than the TTL. Returns how many were
    /// removed.
    pub async fn sweep_expired(&self) -> usize {
        let expired: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, record)| record.last_activity.elapsed() >= self.session_ttl)
                .map(|(id, _)| *id)
                .collect()
        };
        for upload_id in &expired {
            warn!(%upload_id, "sweeping idle upload session");
            self.delete(*upload_id).await;
        }
        expired.len()
    }

    fn spool_dir(&self, upload_id: Uuid) -> PathBuf {
        self.spool_root.join(upload_id.to_string())
    }

    fn chunk_path(&self, upload_id: Uuid, index: u32) -> PathBuf {
        self.spool_dir(upload_id).join(chunk_file_name(index))
    }
}

/// Spool file name for chunk `index`; zero-padded so lexical order is index
/// order.
pub(crate) fn chunk_file_name(index: u32) -> String {
    format!("chunk_{index:06}")
}

/// Spawns the background task that periodically evicts idle sessions.
pub fn spawn_sweeper(
    store: Arc<UploadStore>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let swept = store.sweep_expired().await;
                    if swept > 0 {
                        info!(swept, "expired upload sessions removed");
                    }
                }
            }
        }
    })
}
