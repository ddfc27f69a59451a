//! Object finalizer: turns a completed session's spooled chunks into one
//! durable object.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use medialift_protocol::CompleteUploadResponse;

use crate::error::StoreError;
use crate::store::{CompletedSession, chunk_file_name};

/// Boxed future returned by storage backends, keeping the trait
/// dyn-compatible.
pub type StorageFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A durably stored object.
pub struct StoredObject {
    /// Backend reference a client can use to address the object.
    pub object_ref: String,
    pub size: u64,
}

/// Streaming sink for one object's bytes.
pub type ObjectWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Durable object backend. One object per finished upload; bytes are
/// streamed into the returned writer so the object is never buffered whole
/// in memory.
pub trait ObjectStorage: Send + Sync {
    /// Opens a writer for a new object. The returned reference addresses
    /// the object once the writer has been shut down.
    fn create(&self, name: &str) -> StorageFuture<'_, (String, ObjectWriter)>;
}

/// Filesystem backend: one file per object under a flat directory, the
/// absolute-ish path doubling as the object reference.
pub struct FsObjectStorage {
    dir: PathBuf,
}

impl FsObjectStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ObjectStorage for FsObjectStorage {
    fn create(&self, name: &str) -> StorageFuture<'_, (String, ObjectWriter)> {
        let path = self.dir.join(name);
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;
            let file = tokio::fs::File::create(&path).await?;
            let writer: ObjectWriter = Box::pin(file);
            Ok((path.display().to_string(), writer))
        })
    }
}

/// Assembles completed sessions into objects.
pub struct Finalizer {
    storage: Arc<dyn ObjectStorage>,
}

impl Finalizer {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    /// Concatenates the spooled chunks in index order and stores the result.
    ///
    /// The spool directory is removed whether assembly and storage succeed
    /// or not; the session itself already left the store, so a failed
    /// finalize tears the whole upload down rather than leaving a
    /// half-alive session to retry against.
    pub async fn finalize(
        &self,
        completed: CompletedSession,
    ) -> Result<CompleteUploadResponse, StoreError> {
        let result = self.assemble_and_store(&completed).await;

        if let Err(e) = tokio::fs::remove_dir_all(&completed.spool).await {
            warn!(upload_id = %completed.upload_id, "failed to remove spool: {e}");
        }

        match result {
            Ok(stored) => {
                info!(
                    upload_id = %completed.upload_id,
                    object_ref = %stored.object_ref,
                    size = stored.size,
                    "upload finalized"
                );
                Ok(CompleteUploadResponse {
                    object_ref: stored.object_ref,
                    size: stored.size,
                })
            }
            Err(e) => {
                warn!(upload_id = %completed.upload_id, "finalize failed: {e}");
                Err(e)
            }
        }
    }

    async fn assemble_and_store(
        &self,
        completed: &CompletedSession,
    ) -> Result<StoredObject, StoreError> {
        let name = format!("{}_{}", completed.upload_id, completed.file_name);
        let (object_ref, mut writer) = self.storage.create(&name).await?;

        // One chunk file open at a time; bytes flow straight into the
        // backend writer.
        let mut written = 0u64;
        for index in 0..completed.total_chunks {
            let path = completed.spool.join(chunk_file_name(index));
            let mut chunk = tokio::fs::File::open(&path).await?;
            written += tokio::io::copy(&mut chunk, &mut writer).await?;
        }
        writer.shutdown().await?;

        if written != completed.file_size {
            return Err(StoreError::Storage(format!(
                "assembled {written} bytes, session declared {}",
                completed.file_size
            )));
        }

        Ok(StoredObject {
            object_ref,
            size: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{UploadPolicy, UploadStore};
    use medialift_protocol::InitUploadRequest;
    use std::time::Duration;
    use tempfile::TempDir;

    fn req(file_size: u64) -> InitUploadRequest {
        InitUploadRequest {
            file_name: "clip.mp4".into(),
            file_size,
            file_type: "video/mp4".into(),
            post_data: serde_json::Value::Null,
        }
    }

    async fn spooled_session(
        spool: &TempDir,
        chunk_size: u64,
        data: &[u8],
    ) -> (UploadStore, uuid::Uuid) {
        let store = UploadStore::new(
            spool.path(),
            chunk_size,
            UploadPolicy::default(),
            Duration::from_secs(3600),
        );
        let id = store.init(&req(data.len() as u64)).await.unwrap().upload_id;
        // Send chunks out of order; assembly must still be index order.
        let chunks: Vec<&[u8]> = data.chunks(chunk_size as usize).collect();
        for index in (0..chunks.len()).rev() {
            store
                .patch(id, index as u32, chunks[index], None)
                .await
                .unwrap();
        }
        (store, id)
    }

    #[tokio::test]
    async fn finalize_concatenates_in_index_order() {
        let spool = TempDir::new().unwrap();
        let objects = TempDir::new().unwrap();
        let data = b"0123456789ABCDEFG";

        let (store, id) = spooled_session(&spool, 4, data).await;
        let completed = store.complete(id).await.unwrap();
        let spool_dir = completed.spool.clone();

        let finalizer = Finalizer::new(Arc::new(FsObjectStorage::new(objects.path())));
        let resp = finalizer.finalize(completed).await.unwrap();

        assert_eq!(resp.size, data.len() as u64);
        assert_eq!(std::fs::read(&resp.object_ref).unwrap(), data);
        assert!(resp.object_ref.contains(&format!("{id}_clip.mp4")));
        assert!(!spool_dir.exists());
    }

    #[tokio::test]
    async fn finalize_streams_large_multi_chunk_objects() {
        let spool = TempDir::new().unwrap();
        let objects = TempDir::new().unwrap();
        // Larger than one io::copy buffer, with an uneven tail chunk.
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let (store, id) = spooled_session(&spool, 64 * 1024, &data).await;
        let completed = store.complete(id).await.unwrap();
        assert_eq!(completed.total_chunks, 4);

        let finalizer = Finalizer::new(Arc::new(FsObjectStorage::new(objects.path())));
        let resp = finalizer.finalize(completed).await.unwrap();

        assert_eq!(resp.size, data.len() as u64);
        assert_eq!(std::fs::read(&resp.object_ref).unwrap(), data);
    }

    struct FailingStorage;

    impl ObjectStorage for FailingStorage {
        fn create(&self, _name: &str) -> StorageFuture<'_, (String, ObjectWriter)> {
            Box::pin(async { Err(StoreError::Storage("backend offline".into())) })
        }
    }

    #[tokio::test]
    async fn failed_finalize_still_clears_spool() {
        let spool = TempDir::new().unwrap();
        let data = b"0123456789";

        let (store, id) = spooled_session(&spool, 4, data).await;
        let completed = store.complete(id).await.unwrap();
        let spool_dir = completed.spool.clone();

        let finalizer = Finalizer::new(Arc::new(FailingStorage));
        let err = finalizer.finalize(completed).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));

        // Teardown happened regardless of the backend failure.
        assert!(!spool_dir.exists());
        assert!(matches!(
            store.status(id).await.unwrap_err(),
            StoreError::NotFound
        ));
    }
}
