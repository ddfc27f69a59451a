//! Upload orchestrator.
//!
//! Drives sequential chunk transfer over an [`UploadTransport`], reconciles
//! with server-reported progress on every loop re-entry, and publishes the
//! session record over a watch channel for progress UI (the same channel
//! serves as the cross-context broadcast: every subscriber observes the one
//! session record, never derived state of its own).

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use medialift_protocol::{CompleteUploadResponse, InitUploadRequest};

use crate::chunker::{FileChunker, checksum_bytes};
use crate::error::UploadError;
use crate::session::{SessionStatus, UploadSession};
use crate::slot::SessionSlot;
use crate::transport::{TransportError, TransportFuture, UploadTransport};

/// How long a completed session stays visible before the record is cleared,
/// so the UI can show the finished state briefly before it disappears.
const COMPLETED_CLEAR_GRACE: Duration = Duration::from_millis(1500);

/// Invoked once the upload finishes, with the caller's action payload and
/// the finished object reference.
pub type CompleteCallback = Box<dyn Fn(serde_json::Value, CompleteUploadResponse) + Send + Sync>;

/// Client-side upload engine.
///
/// At most one session is active per `Uploader`; starting a new upload while
/// one is in progress is rejected. Chunks are transmitted strictly in
/// ascending index order, one at a time — the resume point is always a single
/// contiguous boundary, never a sparse set of gaps.
pub struct Uploader {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn UploadTransport>,
    slot: Arc<dyn SessionSlot>,
    /// The only shared mutable state; mutated exclusively by the orchestrator.
    session: Mutex<Option<UploadSession>>,
    watch_tx: watch::Sender<Option<UploadSession>>,
    /// Token for the current transfer run; replaced on every loop (re)entry.
    run_token: Mutex<CancellationToken>,
    on_complete: Mutex<Option<Arc<CompleteCallback>>>,
    clear_grace: Duration,
}

impl Uploader {
    /// Creates an uploader, restoring any persisted session from `slot`.
    ///
    /// A restored session that was mid-transfer comes back `paused`: the
    /// process died with a chunk possibly in flight, and resuming re-verifies
    /// against the server anyway.
    ///
    /// `clear_grace` overrides how long a completed session stays visible
    /// before its record is cleared (default 1.5 s).
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        slot: Arc<dyn SessionSlot>,
        clear_grace: Option<Duration>,
    ) -> Self {
        let mut restored = slot.load();
        if let Some(session) = &mut restored
            && session.status == SessionStatus::Uploading
        {
            session.pause();
            if let Err(e) = slot.save(session) {
                warn!("failed to persist restored session: {e}");
            }
            debug!(upload_id = %session.upload_id, "restored mid-transfer session as paused");
        }

        let (watch_tx, _) = watch::channel(restored.clone());
        Self {
            inner: Arc::new(Inner {
                transport,
                slot,
                session: Mutex::new(restored),
                watch_tx,
                run_token: Mutex::new(CancellationToken::new()),
                on_complete: Mutex::new(None),
                clear_grace: clear_grace.unwrap_or(COMPLETED_CLEAR_GRACE),
            }),
        }
    }

    /// Registers the post-completion effect.
    pub fn set_on_complete(&self, callback: CompleteCallback) {
        *self.inner.on_complete.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Read-only observable of the current session; `None` when no upload
    /// exists. Every state change publishes a fresh snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<UploadSession>> {
        self.inner.watch_tx.subscribe()
    }

    /// Snapshot of the current session.
    pub fn current(&self) -> Option<UploadSession> {
        self.inner.session.lock().unwrap().clone()
    }

    /// Starts a new upload of the file at `path`.
    ///
    /// Requests a server session and begins transfer. Fails with
    /// [`UploadError::SessionInit`] if the server rejects session creation
    /// (e.g. disallowed file type) — no transfer is started and nothing is
    /// persisted. Fails with [`UploadError::AlreadyActive`] while a
    /// non-terminal session exists.
    pub async fn start(
        &self,
        path: impl AsRef<Path>,
        file_type: &str,
        post_data: serde_json::Value,
    ) -> Result<(), UploadError> {
        {
            let guard = self.inner.session.lock().unwrap();
            if guard.as_ref().is_some_and(|s| !s.is_terminal()) {
                return Err(UploadError::AlreadyActive);
            }
        }

        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());

        let req = InitUploadRequest {
            file_name: file_name.clone(),
            file_size: meta.len(),
            file_type: file_type.to_string(),
            post_data: post_data.clone(),
        };
        let init = match self.inner.transport.init(req).await {
            Ok(resp) => resp,
            Err(TransportError::Rejected {
                status, message, ..
            }) if status < 500 => return Err(UploadError::SessionInit(message)),
            Err(e) => return Err(UploadError::Transfer(e.to_string())),
        };

        info!(
            upload_id = %init.upload_id,
            file = %file_name,
            total_chunks = init.total_chunks,
            "upload session created"
        );

        let session = UploadSession::new(
            &init,
            path,
            file_name,
            meta.len(),
            file_type.to_string(),
            post_data,
        );
        *self.inner.session.lock().unwrap() = Some(session);
        persist(&self.inner);
        self.spawn_transfer_loop();
        Ok(())
    }

    /// Pauses the upload: cancels the in-flight chunk transport and keeps
    /// the acknowledged count as-is. The in-flight chunk may or may not have
    /// landed server-side; resume re-verifies instead of trusting local
    /// state.
    pub fn pause(&self) -> Result<(), UploadError> {
        {
            let mut guard = self.inner.session.lock().unwrap();
            let Some(session) = guard.as_mut() else {
                return Err(UploadError::NoSession);
            };
            if session.status != SessionStatus::Uploading {
                return Err(UploadError::InvalidState("pause requires an uploading session"));
            }
            session.pause();
        }
        self.inner.run_token.lock().unwrap().cancel();
        persist(&self.inner);
        debug!("upload paused");
        Ok(())
    }

    /// Resumes a paused upload from the last server-confirmed chunk.
    pub fn resume(&self) -> Result<(), UploadError> {
        {
            let mut guard = self.inner.session.lock().unwrap();
            let Some(session) = guard.as_mut() else {
                return Err(UploadError::NoSession);
            };
            if session.status != SessionStatus::Paused {
                return Err(UploadError::InvalidState("resume requires a paused session"));
            }
            session.resume();
        }
        persist(&self.inner);
        self.spawn_transfer_loop();
        Ok(())
    }

    /// Clears the failure and re-enters the transfer loop from the last
    /// server-confirmed chunk. Valid only after a transfer error.
    pub fn retry(&self) -> Result<(), UploadError> {
        {
            let mut guard = self.inner.session.lock().unwrap();
            let Some(session) = guard.as_mut() else {
                return Err(UploadError::NoSession);
            };
            if session.status != SessionStatus::Error {
                return Err(UploadError::InvalidState("retry requires a failed session"));
            }
            session.resume();
        }
        persist(&self.inner);
        self.spawn_transfer_loop();
        Ok(())
    }

    /// Cancels the upload: aborts the in-flight transfer, best-effort
    /// deletes the server session, and clears the local record. Terminal.
    pub async fn cancel(&self) -> Result<(), UploadError> {
        let upload_id = {
            let mut guard = self.inner.session.lock().unwrap();
            match guard.as_mut() {
                Some(s) if !s.is_terminal() => {
                    s.cancel();
                    s.upload_id
                }
                Some(_) => {
                    return Err(UploadError::InvalidState("cancel requires an active session"));
                }
                None => return Err(UploadError::NoSession),
            }
        };
        self.inner.run_token.lock().unwrap().cancel();

        // Best-effort server cleanup: the user's intent (abandon) is already
        // satisfied locally, so a failed delete is logged, never surfaced.
        if let Err(e) = self.inner.transport.delete(upload_id).await {
            warn!(%upload_id, "server-side session delete failed: {e}");
        }
        if let Err(e) = self.inner.slot.clear() {
            warn!("failed to clear session record: {e}");
        }
        publish(&self.inner);
        info!(%upload_id, "upload cancelled");
        Ok(())
    }

    fn spawn_transfer_loop(&self) {
        let inner = Arc::clone(&self.inner);
        let token = {
            let mut guard = inner.run_token.lock().unwrap();
            *guard = CancellationToken::new();
            guard.clone()
        };
        tokio::spawn(run_transfer(inner, token));
    }
}

/// One transfer run: reconcile, stream remaining chunks, finalize.
async fn run_transfer(inner: Arc<Inner>, token: CancellationToken) {
    let (upload_id, total_chunks, chunk_size, uploaded, path) = {
        let guard = inner.session.lock().unwrap();
        let Some(s) = guard.as_ref() else { return };
        (
            s.upload_id,
            s.total_chunks,
            s.chunk_size,
            s.uploaded_chunks,
            s.source_path.clone(),
        )
    };

    // Reconcile with server truth before resuming: a crash or lost
    // acknowledgment can leave the local count ahead of what actually
    // landed. The server's totalReceived is the authoritative resume point.
    let mut resume_point = uploaded;
    if uploaded > 0 {
        match race(&token, inner.transport.status(upload_id)).await {
            Ok(ack) => {
                resume_point = ack.total_received;
                debug!(%upload_id, local = uploaded, server = ack.total_received, "reconciled resume point");
                apply_ack(&inner, ack);
            }
            Err(TransportError::Cancelled) => return,
            Err(e) => {
                fail(&inner, format!("status reconcile failed: {e}"));
                return;
            }
        }
    }

    let open = tokio::task::spawn_blocking({
        let path = path.clone();
        move || FileChunker::open(&path, chunk_size)
    })
    .await;
    let mut chunker = match open {
        Ok(Ok(c)) => c,
        Ok(Err(e)) => {
            fail(&inner, format!("failed to open {}: {e}", path.display()));
            return;
        }
        Err(e) => {
            fail(&inner, format!("task join error: {e}"));
            return;
        }
    };

    for index in resume_point..total_chunks {
        if token.is_cancelled() {
            return;
        }

        let read = tokio::task::spawn_blocking(move || {
            let bytes = chunker.read_chunk(index);
            (chunker, bytes)
        })
        .await;
        let bytes = match read {
            Ok((c, Ok(bytes))) => {
                chunker = c;
                bytes
            }
            Ok((_, Err(e))) => {
                fail(&inner, format!("failed to read chunk {index}: {e}"));
                return;
            }
            Err(e) => {
                fail(&inner, format!("task join error: {e}"));
                return;
            }
        };

        let checksum = checksum_bytes(&bytes);
        match race(
            &token,
            inner.transport.patch_chunk(upload_id, index, bytes, checksum),
        )
        .await
        {
            Ok(ack) => apply_ack(&inner, ack),
            // Explicit pause/cancel already updated the session; end quietly.
            Err(TransportError::Cancelled) => return,
            Err(e) => {
                if token.is_cancelled() {
                    return;
                }
                fail(&inner, format!("chunk {index} transfer failed: {e}"));
                return;
            }
        }
    }

    match race(&token, inner.transport.complete(upload_id)).await {
        Ok(resp) => finish(&inner, upload_id, resp),
        Err(TransportError::Cancelled) => {}
        Err(e) => {
            if !token.is_cancelled() {
                fail(&inner, format!("finalize failed: {e}"));
            }
        }
    }
}

fn finish(inner: &Arc<Inner>, upload_id: Uuid, resp: CompleteUploadResponse) {
    let post_data = {
        let mut guard = inner.session.lock().unwrap();
        match guard.as_mut() {
            Some(s) => {
                s.complete();
                s.post_data.clone()
            }
            None => serde_json::Value::Null,
        }
    };
    persist(inner);
    info!(%upload_id, object_ref = %resp.object_ref, "upload completed");

    // The handle is cloned out of the guard so the callback runs unlocked
    // and may itself touch the uploader.
    let callback = inner.on_complete.lock().unwrap().clone();
    if let Some(cb) = callback {
        cb(post_data, resp);
    }

    // Keep the completed record around briefly for the UI, then clear it.
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(inner.clear_grace).await;
        let cleared = {
            let mut guard = inner.session.lock().unwrap();
            match guard.as_ref() {
                Some(s) if s.upload_id == upload_id && s.status == SessionStatus::Completed => {
                    *guard = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            if let Err(e) = inner.slot.clear() {
                warn!("failed to clear session record: {e}");
            }
            inner.watch_tx.send_replace(None);
        }
    });
}

/// Races a transport call against the run token. Dropping the future aborts
/// the underlying request; the loop only ever stops at a suspension point.
async fn race<T>(
    token: &CancellationToken,
    fut: TransportFuture<'_, T>,
) -> Result<T, TransportError> {
    tokio::select! {
        _ = token.cancelled() => Err(TransportError::Cancelled),
        res = fut => res,
    }
}

fn apply_ack(inner: &Inner, ack: medialift_protocol::ChunkAck) {
    {
        let mut guard = inner.session.lock().unwrap();
        match guard.as_mut() {
            Some(s) if !s.is_terminal() => s.record_ack(ack),
            _ => return,
        }
    }
    persist(inner);
}

fn fail(inner: &Inner, message: String) {
    warn!("{message}");
    {
        let mut guard = inner.session.lock().unwrap();
        match guard.as_mut() {
            Some(s) if !s.is_terminal() => s.fail(message),
            _ => return,
        }
    }
    persist(inner);
}

/// Writes the current snapshot to the durable slot and the watch channel.
/// Persistence is synchronous with the state change, so a reload at any
/// point observes the last acknowledged state.
fn persist(inner: &Inner) {
    let snapshot = inner.session.lock().unwrap().clone();
    if let Some(session) = &snapshot
        && let Err(e) = inner.slot.save(session)
    {
        warn!("failed to persist session record: {e}");
    }
    inner.watch_tx.send_replace(snapshot);
}

/// Publishes the current snapshot without persisting it.
fn publish(inner: &Inner) {
    let snapshot = inner.session.lock().unwrap().clone();
    inner.watch_tx.send_replace(snapshot);
}
