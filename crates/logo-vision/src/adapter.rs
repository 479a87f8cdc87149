use anyhow::Result;
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::geometry::PixelBox;
use crate::{Detection, Detector, VisionConfig};

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("deadline passed before inference started")]
    Expired,
    #[error("inference failed: {0:#}")]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub img_size: u32,
}

impl From<&VisionConfig> for DetectParams {
    fn from(c: &VisionConfig) -> Self {
        Self { conf_threshold: c.conf_threshold, iou_threshold: c.nms_iou_threshold, img_size: c.img_size }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeInfo {
    pub device: String,
    pub weights_path: PathBuf,
    pub weights_exists: bool,
    pub params: DetectParams,
}

impl RuntimeInfo {
    pub fn to_health(&self, status: &str) -> logo_proto::HealthReport {
        logo_proto::HealthReport {
            status: status.to_string(),
            device: self.device.clone(),
            weights_path: self.weights_path.display().to_string(),
            weights_exists: self.weights_exists,
            conf_threshold: self.params.conf_threshold,
            iou_threshold: self.params.iou_threshold,
            img_size: self.params.img_size,
        }
    }
}

/// Process-wide wrapper around the single model instance.
///
/// The backend is `&mut self` and sits behind a mutex, so concurrent callers
/// serialize here; bounding how many of them wait is the caller's job.
/// Every returned box is clamped to the source image.
pub struct DetectionAdapter {
    detector: Mutex<Box<dyn Detector>>,
    params: DetectParams,
    device: String,
    weights_path: PathBuf,
}

impl DetectionAdapter {
    pub fn new(detector: Box<dyn Detector>, params: DetectParams, device: impl Into<String>, weights_path: impl Into<PathBuf>) -> Self {
        Self { detector: Mutex::new(detector), params, device: device.into(), weights_path: weights_path.into() }
    }

    /// Builds the compiled-in backend for `cfg` with weights at `weights_path`.
    pub fn load(cfg: &VisionConfig, weights_path: &Path) -> Result<Self> {
        let (detector, device) = load_backend(cfg, weights_path)?;
        info!(
            "vision: model ready (device={}, weights={}, conf={:.2}, iou={:.2}, img={})",
            device,
            weights_path.display(),
            cfg.conf_threshold,
            cfg.nms_iou_threshold,
            cfg.img_size
        );
        Ok(Self::new(detector, cfg.into(), device, weights_path))
    }

    pub fn params(&self) -> DetectParams {
        self.params
    }

    pub fn predict(&self, img: &DynamicImage) -> Result<Vec<Detection>, PredictError> {
        self.predict_until(img, None)
    }

    /// Like [`predict`](Self::predict), but gives up without running the model
    /// if `deadline` has passed by the time the model lock is obtained.
    pub fn predict_until(&self, img: &DynamicImage, deadline: Option<Instant>) -> Result<Vec<Detection>, PredictError> {
        let rgb = img.to_rgb8();
        self.predict_rgb_until(&rgb, deadline)
    }

    pub fn predict_rgb_until(&self, rgb: &RgbImage, deadline: Option<Instant>) -> Result<Vec<Detection>, PredictError> {
        let (w, h) = rgb.dimensions();
        let t0 = Instant::now();

        let mut det = match self.detector.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("vision: previous inference panicked; reusing model");
                self.detector.clear_poison();
                poisoned.into_inner()
            }
        };
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(PredictError::Expired);
        }
        let raw = det.detect_rgb(rgb)?;
        drop(det);

        let out: Vec<Detection> = raw
            .into_iter()
            .map(|r| Detection { bbox: PixelBox::from_xyxy_clamped(r.x1, r.y1, r.x2, r.y2, w, h), conf: Some(r.conf) })
            .collect();
        debug!("vision: {} boxes in {:.1} ms ({}x{})", out.len(), t0.elapsed().as_secs_f64() * 1000.0, w, h);
        Ok(out)
    }

    pub fn runtime_info(&self) -> RuntimeInfo {
        RuntimeInfo {
            device: self.device.clone(),
            weights_path: self.weights_path.clone(),
            weights_exists: self.weights_path.is_file(),
            params: self.params,
        }
    }

    /// One synthetic inference to allocate device buffers ahead of traffic.
    pub fn warmup(&self) -> Result<usize, PredictError> {
        let img = RgbImage::new(64, 64);
        self.predict_rgb_until(&img, None).map(|d| d.len())
    }
}

#[cfg(feature = "vision-tflite")]
fn load_backend(cfg: &VisionConfig, weights_path: &Path) -> Result<(Box<dyn Detector>, String)> {
    let device = cfg.device.resolve(cfg!(feature = "vision-gpu"))?;
    let det = crate::tflite::TfliteDetector::new(cfg.clone(), weights_path, device != "cpu")?;
    Ok((Box::new(det), device.to_string()))
}

#[cfg(not(feature = "vision-tflite"))]
fn load_backend(_cfg: &VisionConfig, _weights_path: &Path) -> Result<(Box<dyn Detector>, String)> {
    anyhow::bail!("no inference backend compiled in; build with --features vision-tflite")
}
