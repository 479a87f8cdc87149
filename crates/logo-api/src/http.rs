use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use logo_proto::{DetectResponse, HealthReport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::info;

use crate::admission::AdmissionPipeline;
use crate::error::DetectError;

/// Form field carrying the image.
pub const FILE_FIELD: &str = "file";

// multipart framing on top of the file itself
const FORM_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AdmissionPipeline>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.pipeline.limits().max_file_bytes.saturating_add(FORM_OVERHEAD);
    Router::new()
        .route("/detect", post(detect))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serves until ctrl-c.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("api: listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown_signal()).await?;
    info!("api: stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("api: shutdown requested");
    }
}

async fn detect(State(st): State<AppState>, mut multipart: Multipart) -> Result<Json<DetectResponse>, DetectError> {
    // the clock starts on arrival and also covers reading the upload
    let deadline = Instant::now() + st.pipeline.limits().request_timeout;
    let (payload, content_type) = tokio::time::timeout_at(deadline, read_file_field(&mut multipart))
        .await
        .map_err(|_| DetectError::Timeout)??;

    let dets = st.pipeline.handle_until(payload, &content_type, deadline).await?;
    Ok(Json(DetectResponse { detections: dets.iter().map(|d| d.to_wire()).collect() }))
}

async fn health(State(st): State<AppState>) -> Json<HealthReport> {
    Json(st.pipeline.adapter().runtime_info().to_health("ok"))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(Bytes, String), DetectError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        return Ok((data, content_type));
    }
    Err(DetectError::InvalidInput(format!("missing form field `{}`", FILE_FIELD)))
}

fn multipart_error(e: MultipartError) -> DetectError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DetectError::PayloadTooLarge(format!("request body too large: {}", e.body_text()))
    } else {
        DetectError::InvalidInput(format!("malformed multipart body: {}", e.body_text()))
    }
}
