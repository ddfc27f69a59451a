//! HTTP surface of the upload protocol.
//!
//! One route per protocol operation; handlers stay thin and delegate to the
//! store and finalizer. Failures become `ErrorResponse` JSON bodies with a
//! stable code.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

use medialift_protocol::{
    CHECKSUM_HEADER, ChunkAck, CompleteUploadResponse, ErrorResponse, InitUploadRequest,
    InitUploadResponse,
};

use crate::error::StoreError;
use crate::finalizer::Finalizer;
use crate::store::UploadStore;

/// Headroom over the chunk size for a patch body.
const CHUNK_BODY_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<UploadStore>,
    pub finalizer: Arc<Finalizer>,
}

/// Builds the protocol router. The body limit tracks the store's chunk size;
/// axum's default is far below a media chunk.
pub fn router(state: AppState) -> Router {
    let body_limit = state.store.chunk_size() as usize + CHUNK_BODY_SLACK;
    Router::new()
        .route("/uploads/init", post(init_upload))
        .route("/uploads/{id}", patch(patch_chunk).delete(delete_upload))
        .route("/uploads/{id}/status", get(upload_status))
        .route("/uploads/{id}/complete", post(complete_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Wire-facing error: maps [`StoreError`] to an HTTP status plus an
/// [`ErrorResponse`] body.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            StoreError::InvalidUpload(_) | StoreError::ChunkMismatch(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::ChunkOutOfRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            StoreError::Incomplete { .. } => StatusCode::CONFLICT,
            StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        } else {
            debug!("request rejected: {}", self.0);
        }
        let body = Json(ErrorResponse {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, ApiError> {
    let resp = state.store.init(&req).await?;
    Ok(Json(resp))
}

#[derive(Deserialize)]
struct PatchQuery {
    index: u32,
}

async fn patch_chunk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<PatchQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkAck>, ApiError> {
    let checksum = headers
        .get(CHECKSUM_HEADER)
        .and_then(|value| value.to_str().ok());
    let ack = state.store.patch(id, query.index, &body, checksum).await?;
    Ok(Json(ack))
}

async fn upload_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChunkAck>, ApiError> {
    let ack = state.store.status(id).await?;
    Ok(Json(ack))
}

async fn complete_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CompleteUploadResponse>, ApiError> {
    let completed = state.store.complete(id).await?;
    let resp = state.finalizer.finalize(completed).await?;
    Ok(Json(resp))
}

async fn delete_upload(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    state.store.delete(id).await;
    StatusCode::OK
}
