fn main() {
    println!("Run `cargo test -p e2e` to execute the end-to-end upload tests.");
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use medialift_client::{
        HttpTransport, MemorySlot, SessionStatus, TransportError, UploadError, UploadTransport,
        Uploader, checksum_bytes,
    };
    use medialift_protocol::InitUploadRequest;
    use medialift_server::http::{AppState, router};
    use medialift_server::{Finalizer, FsObjectStorage, UploadPolicy, UploadStore};

    const WAIT: Duration = Duration::from_secs(10);

    struct TestServer {
        base_url: String,
        data_dir: TempDir,
    }

    impl TestServer {
        /// Boots the real axum server on an ephemeral port with its own
        /// data directory.
        async fn start(chunk_size: u64) -> Self {
            let data_dir = TempDir::new().unwrap();
            let spool = data_dir.path().join("spool");
            let objects = data_dir.path().join("objects");
            std::fs::create_dir_all(&spool).unwrap();
            std::fs::create_dir_all(&objects).unwrap();

            let store = Arc::new(UploadStore::new(
                &spool,
                chunk_size,
                UploadPolicy::default(),
                Duration::from_secs(3600),
            ));
            let finalizer = Arc::new(Finalizer::new(Arc::new(FsObjectStorage::new(&objects))));
            let app = router(AppState { store, finalizer });

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base_url: format!("http://{addr}"),
                data_dir,
            }
        }

        fn spool_dir(&self) -> PathBuf {
            self.data_dir.path().join("spool")
        }

        fn objects_dir(&self) -> PathBuf {
            self.data_dir.path().join("objects")
        }

        fn transport(&self) -> HttpTransport {
            HttpTransport::new(&self.base_url)
        }
    }

    fn write_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn dir_entries(dir: &Path) -> Vec<PathBuf> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[tokio::test]
    async fn uploader_round_trip_over_real_http() {
        let server = TestServer::start(8).await;
        let files = TempDir::new().unwrap();
        let data = b"0123456789ABCDEFG"; // 17 bytes -> 3 chunks of 8.
        let path = write_test_file(files.path(), "clip.mp4", data);

        let uploader = Uploader::new(
            Arc::new(server.transport()),
            Arc::new(MemorySlot::new()),
            Some(Duration::from_millis(50)),
        );
        let object_refs: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&object_refs);
        uploader.set_on_complete(Box::new(move |_post_data, resp| {
            sink.lock().unwrap().push(resp.object_ref);
        }));

        let mut rx = uploader.subscribe();
        uploader
            .start(&path, "video/mp4", serde_json::json!({"caption": "e2e"}))
            .await
            .unwrap();
        timeout(
            WAIT,
            rx.wait_for(|s| {
                s.as_ref()
                    .is_some_and(|s| s.status == SessionStatus::Completed)
            }),
        )
        .await
        .expect("upload did not complete")
        .unwrap();

        let refs = object_refs.lock().unwrap();
        assert_eq!(refs.len(), 1);
        // The finalized object is byte-identical to the source file.
        assert_eq!(std::fs::read(&refs[0]).unwrap(), data);
        // The spool is empty once the upload finished.
        assert!(dir_entries(&server.spool_dir()).is_empty());
    }

    #[tokio::test]
    async fn transport_level_protocol_round_trip() {
        let server = TestServer::start(4).await;
        let transport = server.transport();
        let data = b"0123456789"; // 3 chunks: 4 + 4 + 2.

        let init = transport
            .init(InitUploadRequest {
                file_name: "pic.png".into(),
                file_size: data.len() as u64,
                file_type: "image/png".into(),
                post_data: serde_json::Value::Null,
            })
            .await
            .unwrap();
        assert_eq!(init.total_chunks, 3);
        assert_eq!(init.chunk_size, 4);

        // Arrival order does not matter server-side.
        for index in [2u32, 0, 1] {
            let chunk = &data[index as usize * 4..data.len().min((index as usize + 1) * 4)];
            let ack = transport
                .patch_chunk(
                    init.upload_id,
                    index,
                    chunk.to_vec(),
                    checksum_bytes(chunk),
                )
                .await
                .unwrap();
            assert!(ack.total_received >= 1);
        }

        let status = transport.status(init.upload_id).await.unwrap();
        assert_eq!(status.total_received, 3);
        assert_eq!(status.progress, 100);

        let resp = transport.complete(init.upload_id).await.unwrap();
        assert_eq!(resp.size, data.len() as u64);
        assert_eq!(std::fs::read(&resp.object_ref).unwrap(), data);

        // The session is gone: a second complete is a 404.
        let err = transport.complete(init.upload_id).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Rejected { status: 404, ref code, .. } if code == "not_found")
        );
    }

    #[tokio::test]
    async fn chunk_validation_over_http() {
        let server = TestServer::start(4).await;
        let transport = server.transport();

        let init = transport
            .init(InitUploadRequest {
                file_name: "pic.png".into(),
                file_size: 10,
                file_type: "image/png".into(),
                post_data: serde_json::Value::Null,
            })
            .await
            .unwrap();

        // Index at totalChunks is out of range.
        let err = transport
            .patch_chunk(init.upload_id, 3, b"XXXX".to_vec(), String::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::Rejected { status: 416, ref code, .. } if code == "chunk_out_of_range")
        );

        // Tail chunk must carry exactly the 2-byte remainder.
        let err = transport
            .patch_chunk(init.upload_id, 2, b"XXXX".to_vec(), String::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::Rejected { status: 400, ref code, .. } if code == "chunk_mismatch")
        );

        // A declared checksum that does not match the bytes is rejected.
        let err = transport
            .patch_chunk(
                init.upload_id,
                0,
                b"AABB".to_vec(),
                checksum_bytes(b"other"),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::Rejected { status: 400, ref code, .. } if code == "chunk_mismatch")
        );

        // Finalizing with gaps is a conflict.
        let err = transport.complete(init.upload_id).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Rejected { status: 409, ref code, .. } if code == "incomplete")
        );

        // Unknown session ids are 404 on every session route.
        let missing = uuid::Uuid::new_v4();
        let err = transport.status(missing).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn cancel_leaves_nothing_behind() {
        let server = TestServer::start(4).await;
        let transport = server.transport();

        let init = transport
            .init(InitUploadRequest {
                file_name: "clip.mp4".into(),
                file_size: 10,
                file_type: "video/mp4".into(),
                post_data: serde_json::Value::Null,
            })
            .await
            .unwrap();
        transport
            .patch_chunk(init.upload_id, 0, b"AABB".to_vec(), String::new())
            .await
            .unwrap();

        transport.delete(init.upload_id).await.unwrap();
        // Idempotent: deleting again succeeds.
        transport.delete(init.upload_id).await.unwrap();

        let err = transport.status(init.upload_id).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { status: 404, .. }));
        assert!(dir_entries(&server.spool_dir()).is_empty());
        assert!(dir_entries(&server.objects_dir()).is_empty());
    }

    #[tokio::test]
    async fn disallowed_file_type_rejected_at_init() {
        let server = TestServer::start(8).await;
        let files = TempDir::new().unwrap();
        let path = write_test_file(files.path(), "tool.exe", b"MZ....");

        let uploader = Uploader::new(
            Arc::new(server.transport()),
            Arc::new(MemorySlot::new()),
            None,
        );
        let err = uploader
            .start(&path, "application/x-msdownload", serde_json::Value::Null)
            .await
            .unwrap_err();
        match err {
            UploadError::SessionInit(message) => assert!(message.contains("not allowed")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(uploader.current().is_none());
        assert!(dir_entries(&server.spool_dir()).is_empty());
    }
}
