//! Chunk transport: one HTTP request per protocol operation.
//!
//! `UploadTransport` is a trait so the orchestrator stays decoupled from the
//! wire and testable with mocks; [`HttpTransport`] is the real reqwest-backed
//! implementation. Cancellation is cooperative: the orchestrator races every
//! call against its cancellation token and drops the in-flight request.

use std::future::Future;
use std::pin::Pin;

use uuid::Uuid;

use medialift_protocol::{
    CHECKSUM_HEADER, ChunkAck, CompleteUploadResponse, ErrorResponse, InitUploadRequest,
    InitUploadResponse,
};

/// Boxed future returned by transport methods, keeping the trait
/// dyn-compatible.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Errors produced by a chunk transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request was cancelled through the shared cancellation signal.
    /// Never surfaced as a user-facing failure.
    #[error("request cancelled")]
    Cancelled,

    /// The server answered with a protocol error.
    #[error("{code}: {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced a usable response.
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// `true` for a definitive server-side rejection (as opposed to a
    /// transient transport failure).
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected { status, .. } if *status < 500)
    }
}

/// Abstract connection to the upload session store.
pub trait UploadTransport: Send + Sync {
    /// Creates a server-side session for the described file.
    fn init(&self, req: InitUploadRequest) -> TransportFuture<'_, InitUploadResponse>;

    /// Transmits one chunk, tagged with its index.
    fn patch_chunk(
        &self,
        upload_id: Uuid,
        index: u32,
        data: Vec<u8>,
        checksum: String,
    ) -> TransportFuture<'_, ChunkAck>;

    /// Reads server-truth progress, used to reconcile before resuming.
    fn status(&self, upload_id: Uuid) -> TransportFuture<'_, ChunkAck>;

    /// Finalizes the upload into one durable object.
    fn complete(&self, upload_id: Uuid) -> TransportFuture<'_, CompleteUploadResponse>;

    /// Deletes the server-side session and any partial chunk data.
    fn delete(&self, upload_id: Uuid) -> TransportFuture<'_, ()>;
}

/// HTTP implementation of [`UploadTransport`].
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport for the upload service at `base_url`
    /// (e.g. `http://127.0.0.1:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl UploadTransport for HttpTransport {
    fn init(&self, req: InitUploadRequest) -> TransportFuture<'_, InitUploadResponse> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.url("/uploads/init"))
                .json(&req)
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            decode_json(resp).await
        })
    }

    fn patch_chunk(
        &self,
        upload_id: Uuid,
        index: u32,
        data: Vec<u8>,
        checksum: String,
    ) -> TransportFuture<'_, ChunkAck> {
        Box::pin(async move {
            let mut builder = self
                .client
                .patch(self.url(&format!("/uploads/{upload_id}")))
                .query(&[("index", index)])
                .body(data);
            if !checksum.is_empty() {
                builder = builder.header(CHECKSUM_HEADER, checksum);
            }
            let resp = builder
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            decode_json(resp).await
        })
    }

    fn status(&self, upload_id: Uuid) -> TransportFuture<'_, ChunkAck> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.url(&format!("/uploads/{upload_id}/status")))
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            decode_json(resp).await
        })
    }

    fn complete(&self, upload_id: Uuid) -> TransportFuture<'_, CompleteUploadResponse> {
        Box::pin(async move {
            let resp = self
                .client
                .post(self.url(&format!("/uploads/{upload_id}/complete")))
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            decode_json(resp).await
        })
    }

    fn delete(&self, upload_id: Uuid) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let resp = self
                .client
                .delete(self.url(&format!("/uploads/{upload_id}")))
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(rejection(resp).await)
            }
        })
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, TransportError> {
    if resp.status().is_success() {
        resp.json::<T>()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    } else {
        Err(rejection(resp).await)
    }
}

/// Turns a non-2xx response into a [`TransportError::Rejected`], falling back
/// to the raw body when it is not an [`ErrorResponse`].
async fn rejection(resp: reqwest::Response) -> TransportError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => TransportError::Rejected {
            status,
            code: err.code,
            message: err.message,
        },
        Err(_) => TransportError::Rejected {
            status,
            code: "unknown".into(),
            message: body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_stripped() {
        let t = HttpTransport::new("http://localhost:3000/");
        assert_eq!(t.url("/uploads/init"), "http://localhost:3000/uploads/init");
    }

    #[test]
    fn rejection_classification() {
        let err = TransportError::Rejected {
            status: 400,
            code: "invalid_upload".into(),
            message: "bad type".into(),
        };
        assert!(err.is_rejection());

        let err = TransportError::Rejected {
            status: 500,
            code: "storage".into(),
            message: "disk full".into(),
        };
        assert!(!err.is_rejection());

        assert!(!TransportError::Cancelled.is_rejection());
    }
}
