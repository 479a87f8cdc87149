//! Admission pipeline behaviour with fake detectors.

mod common;

use bytes::Bytes;
use common::*;
use image::ImageFormat;
use logo_api::{AdmissionGate, AdmissionLimits, DetectError};
use logo_vision::{PixelBox, RawDetection};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn limits() -> AdmissionLimits {
    AdmissionLimits {
        max_file_bytes: 64 * 1024,
        max_image_pixels: 10_000,
        request_timeout: Duration::from_secs(5),
        max_concurrency: 2,
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

#[tokio::test]
async fn test_valid_image_returns_clamped_boxes() {
    let raw = vec![RawDetection { conf: 0.8, x1: -3.0, y1: 4.0, x2: 500.0, y2: 20.9 }];
    let (det, calls) = counting(raw);
    let p = pipeline(det, limits());
    let dets = p.handle(Bytes::from(png(40, 30)), "image/png").await.unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].bbox, PixelBox::new(0, 4, 39, 20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_detections_is_empty_ok() {
    let (det, _) = counting(Vec::new());
    let p = pipeline(det, limits());
    for fmt in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Bmp] {
        let dets = p.handle(Bytes::from(encode(16, 16, fmt)), "image/jpeg").await.unwrap();
        assert!(dets.is_empty());
    }
}

#[tokio::test]
async fn test_unsupported_media_type() {
    let (det, calls) = counting(Vec::new());
    let p = pipeline(det, limits());
    let err = p.handle(Bytes::from(png(8, 8)), "image/gif").await.unwrap_err();
    match &err {
        DetectError::UnsupportedMediaType { allowed, .. } => assert!(allowed.contains("image/webp")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(err.status().as_u16(), 400);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_content_type_parameters_ignored() {
    let (det, _) = counting(Vec::new());
    let p = pipeline(det, limits());
    assert!(p.handle(Bytes::from(png(8, 8)), "Image/PNG; name=x.png").await.is_ok());
}

#[tokio::test]
async fn test_empty_payload() {
    let (det, calls) = counting(Vec::new());
    let p = pipeline(det, limits());
    let err = p.handle(Bytes::new(), "image/png").await.unwrap_err();
    assert!(matches!(err, DetectError::EmptyInput));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_payload_never_reaches_adapter() {
    let (det, calls) = counting(Vec::new());
    let p = pipeline(det, limits());
    let big = vec![0u8; 64 * 1024 + 1];
    let err = p.handle(Bytes::from(big), "image/png").await.unwrap_err();
    assert!(matches!(err, DetectError::PayloadTooLarge(_)));
    assert_eq!(err.status().as_u16(), 413);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pixel_ceiling() {
    let (det, calls) = counting(Vec::new());
    let p = pipeline(det, limits());
    // 101 * 100 > 10_000, a few hundred bytes on the wire
    let err = p.handle(Bytes::from(png(101, 100)), "image/png").await.unwrap_err();
    assert!(matches!(err, DetectError::PayloadTooLarge(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert!(p.handle(Bytes::from(png(100, 100)), "image/png").await.is_ok());
}

#[tokio::test]
async fn test_invalid_bytes() {
    let (det, calls) = counting(Vec::new());
    let p = pipeline(det, limits());
    let err = p.handle(Bytes::from_static(b"\x89PNG but truncated"), "image/png").await.unwrap_err();
    assert!(matches!(err, DetectError::InvalidInput(_)));

    let mut broken = png(20, 20);
    broken.truncate(broken.len() / 2);
    let err = p.handle(Bytes::from(broken), "image/png").await.unwrap_err();
    assert!(matches!(err, DetectError::InvalidInput(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// FAULTS AND TICKETS
// ============================================================================

#[tokio::test]
async fn test_backend_error_is_internal_and_releases_ticket() {
    let p = pipeline(Failing, limits());
    for _ in 0..10 {
        let err = p.handle(Bytes::from(png(8, 8)), "image/png").await.unwrap_err();
        assert!(matches!(err, DetectError::InternalError(_)));
        assert_eq!(err.status().as_u16(), 500);
    }
    assert_eq!(p.gate().available(), p.gate().capacity());
}

#[tokio::test]
async fn test_backend_panic_is_internal_and_releases_ticket() {
    let p = pipeline(Panicking, limits());
    for _ in 0..5 {
        let err = p.handle(Bytes::from(png(8, 8)), "image/png").await.unwrap_err();
        assert!(matches!(err, DetectError::InternalError(_)), "{:?}", err);
    }
    assert_eq!(p.gate().available(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_frees_ticket_immediately() {
    let lim = AdmissionLimits { request_timeout: Duration::from_millis(100), ..limits() };
    let (det, _) = slow(Duration::from_millis(600));
    let p = pipeline(det, lim);

    let t0 = std::time::Instant::now();
    let err = p.handle(Bytes::from(png(8, 8)), "image/png").await.unwrap_err();
    assert!(matches!(err, DetectError::Timeout));
    assert_eq!(err.status().as_u16(), 504);
    assert!(t0.elapsed() < Duration::from_millis(500));
    // the blocking inference is still running, but its slot is back
    assert_eq!(p.gate().available(), p.gate().capacity());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queued_request_past_deadline_skips_inference() {
    let lim = AdmissionLimits { request_timeout: Duration::from_millis(150), max_concurrency: 4, ..limits() };
    let (det, calls) = slow(Duration::from_millis(400));
    let p = pipeline(det, lim);
    // the first call holds the model past the second one's deadline
    let (a, b) = tokio::join!(
        p.handle(Bytes::from(png(8, 8)), "image/png"),
        p.handle(Bytes::from(png(8, 8)), "image/png")
    );
    assert!(matches!(a, Err(DetectError::Timeout)));
    assert!(matches!(b, Err(DetectError::Timeout)));

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gate_bounds_concurrency() {
    let gate = AdmissionGate::new(2);
    let a = gate.acquire().await.unwrap();
    let _b = gate.acquire().await.unwrap();
    assert_eq!(gate.available(), 0);

    let blocked = tokio::time::timeout(Duration::from_millis(50), gate.acquire()).await;
    assert!(blocked.is_err(), "third ticket must wait");

    drop(a);
    let c = tokio::time::timeout(Duration::from_millis(200), gate.acquire()).await;
    assert!(c.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_requests_all_complete() {
    let (det, calls) = counting(vec![RawDetection { conf: 0.9, x1: 1.0, y1: 1.0, x2: 5.0, y2: 5.0 }]);
    let p = std::sync::Arc::new(pipeline(det, limits()));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let p = p.clone();
        tasks.push(tokio::spawn(async move { p.handle(Bytes::from(png(16, 16)), "image/png").await }));
    }
    for t in tasks {
        assert_eq!(t.await.unwrap().unwrap().len(), 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(p.gate().available(), 2);
}
