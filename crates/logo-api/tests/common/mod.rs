#![allow(dead_code)]

use anyhow::Result;
use image::{DynamicImage, ImageFormat, RgbImage};
use logo_api::{AdmissionLimits, AdmissionPipeline};
use logo_vision::adapter::DetectParams;
use logo_vision::{DetectionAdapter, Detector, RawDetection};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Returns fixed boxes and counts calls.
pub struct Counting {
    pub calls: Arc<AtomicUsize>,
    pub out: Vec<RawDetection>,
}

impl Detector for Counting {
    fn detect_rgb(&mut self, _img: &RgbImage) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.out.clone())
    }
}

pub struct Failing;

impl Detector for Failing {
    fn detect_rgb(&mut self, _img: &RgbImage) -> Result<Vec<RawDetection>> {
        anyhow::bail!("tensor shape mismatch")
    }
}

pub struct Panicking;

impl Detector for Panicking {
    fn detect_rgb(&mut self, _img: &RgbImage) -> Result<Vec<RawDetection>> {
        panic!("backend exploded")
    }
}

/// Holds the model for `delay` on every call.
pub struct Slow {
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

impl Detector for Slow {
    fn detect_rgb(&mut self, _img: &RgbImage) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(Vec::new())
    }
}

pub fn slow(delay: Duration) -> (Slow, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (Slow { delay, calls: calls.clone() }, calls)
}

pub fn adapter(det: impl Detector + 'static) -> Arc<DetectionAdapter> {
    let params = DetectParams { conf_threshold: 0.25, iou_threshold: 0.45, img_size: 640 };
    Arc::new(DetectionAdapter::new(Box::new(det), params, "cpu", "weights/test.tflite"))
}

pub fn pipeline(det: impl Detector + 'static, limits: AdmissionLimits) -> AdmissionPipeline {
    AdmissionPipeline::new(adapter(det), limits)
}

pub fn counting(out: Vec<RawDetection>) -> (Counting, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (Counting { calls: calls.clone(), out }, calls)
}

pub fn encode(w: u32, h: u32, fmt: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(w, h)).write_to(&mut Cursor::new(&mut buf), fmt).unwrap();
    buf
}

pub fn png(w: u32, h: u32) -> Vec<u8> {
    encode(w, h, ImageFormat::Png)
}
