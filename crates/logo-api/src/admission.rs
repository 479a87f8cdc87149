//! Request admission: validation, bounded concurrency and the per-request
//! deadline in front of the shared detector.

use bytes::Bytes;
use image::{DynamicImage, ImageReader};
use logo_vision::{Detection, DetectionAdapter, PredictError};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::DetectError;

pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/bmp", "image/webp"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionLimits {
    pub max_file_bytes: usize,
    pub max_image_pixels: u64,
    pub request_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_image_pixels: 40_000_000,
            request_timeout: Duration::from_secs(30),
            max_concurrency: 2,
        }
    }
}

/// Counting gate in front of inference. Waiters block; nobody is rejected.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    sem: Arc<Semaphore>,
    capacity: usize,
}

/// One admitted request. The slot is returned when this is dropped.
#[derive(Debug)]
pub struct AdmissionTicket {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { sem: Arc::new(Semaphore::new(capacity)), capacity }
    }

    pub async fn acquire(&self) -> Result<AdmissionTicket, DetectError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DetectError::InternalError("admission gate closed".into()))?;
        Ok(AdmissionTicket { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub struct AdmissionPipeline {
    adapter: Arc<DetectionAdapter>,
    gate: AdmissionGate,
    limits: AdmissionLimits,
}

impl AdmissionPipeline {
    pub fn new(adapter: Arc<DetectionAdapter>, limits: AdmissionLimits) -> Self {
        Self { gate: AdmissionGate::new(limits.max_concurrency), adapter, limits }
    }

    pub fn adapter(&self) -> &Arc<DetectionAdapter> {
        &self.adapter
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    /// Validates and runs one image, with the deadline starting now.
    pub async fn handle(&self, payload: Bytes, content_type: &str) -> Result<Vec<Detection>, DetectError> {
        self.handle_until(payload, content_type, Instant::now() + self.limits.request_timeout).await
    }

    /// Same as [`handle`](Self::handle) with a deadline the caller started.
    pub async fn handle_until(&self, payload: Bytes, content_type: &str, deadline: Instant) -> Result<Vec<Detection>, DetectError> {
        let t0 = std::time::Instant::now();
        let size = payload.len();
        let res = match tokio::time::timeout_at(deadline, self.run(payload, content_type, deadline)).await {
            Ok(r) => r,
            Err(_) => Err(DetectError::Timeout),
        };

        let p = self.adapter.params();
        let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
        match &res {
            Ok(dets) => info!(
                outcome = "ok",
                boxes = dets.len(),
                bytes = size,
                elapsed_ms,
                conf = p.conf_threshold,
                iou = p.iou_threshold,
                img_size = p.img_size,
                "detect"
            ),
            Err(e) if e.status().is_server_error() => warn!(
                outcome = e.kind(),
                error = %e,
                bytes = size,
                elapsed_ms,
                conf = p.conf_threshold,
                iou = p.iou_threshold,
                img_size = p.img_size,
                "detect"
            ),
            Err(e) => info!(
                outcome = e.kind(),
                error = %e,
                bytes = size,
                elapsed_ms,
                conf = p.conf_threshold,
                iou = p.iou_threshold,
                img_size = p.img_size,
                "detect"
            ),
        }
        res
    }

    async fn run(&self, payload: Bytes, content_type: &str, deadline: Instant) -> Result<Vec<Detection>, DetectError> {
        check_content_type(content_type)?;
        if payload.is_empty() {
            return Err(DetectError::EmptyInput);
        }
        if payload.len() > self.limits.max_file_bytes {
            return Err(DetectError::PayloadTooLarge(format!(
                "file too large ({} bytes, limit {} bytes)",
                payload.len(),
                self.limits.max_file_bytes
            )));
        }

        let max_pixels = self.limits.max_image_pixels;
        let img = tokio::task::spawn_blocking(move || decode_limited(&payload, max_pixels))
            .await
            .map_err(|e| DetectError::InternalError(format!("decode task failed: {}", e)))??;

        // held by this future, so a timeout drops it even while inference runs on
        let _ticket = self.gate.acquire().await?;

        let adapter = self.adapter.clone();
        let until = deadline.into_std();
        match tokio::task::spawn_blocking(move || adapter.predict_until(&img, Some(until))).await {
            Ok(Ok(dets)) => Ok(dets),
            Ok(Err(PredictError::Expired)) => Err(DetectError::Timeout),
            Ok(Err(PredictError::Failed(e))) => Err(DetectError::InternalError(format!("{:#}", e))),
            Err(e) if e.is_panic() => Err(DetectError::InternalError("inference panicked".into())),
            Err(e) => Err(DetectError::InternalError(format!("inference task failed: {}", e))),
        }
    }
}

/// Accepts the allowed image types; parameters and case are ignored.
pub fn check_content_type(content_type: &str) -> Result<(), DetectError> {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(DetectError::UnsupportedMediaType { got: content_type.to_string(), allowed: ALLOWED_CONTENT_TYPES.join(", ") })
    }
}

/// Probes the header for dimensions, enforces the pixel ceiling, then
/// decodes. The format is guessed from the bytes, not the declared type.
pub fn decode_limited(payload: &[u8], max_pixels: u64) -> Result<DynamicImage, DetectError> {
    let invalid = |e: &dyn std::fmt::Display| DetectError::InvalidInput(e.to_string());

    let probe = ImageReader::new(Cursor::new(payload)).with_guessed_format().map_err(|e| invalid(&e))?;
    if probe.format().is_none() {
        return Err(DetectError::InvalidInput("unrecognized image format".into()));
    }
    let (w, h) = probe.into_dimensions().map_err(|e| invalid(&e))?;
    let pixels = w as u64 * h as u64;
    if pixels > max_pixels {
        return Err(DetectError::PayloadTooLarge(format!("image has {} pixels ({}x{}), limit {}", pixels, w, h, max_pixels)));
    }

    ImageReader::new(Cursor::new(payload))
        .with_guessed_format()
        .map_err(|e| invalid(&e))?
        .decode()
        .map_err(|e| invalid(&e))
}
