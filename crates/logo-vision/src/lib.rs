pub mod adapter;
pub mod device;
pub mod draw;
pub mod geometry;
pub mod weights;
mod nms;

#[cfg(feature = "vision-tflite")]
pub mod tflite;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use adapter::{DetectionAdapter, PredictError, RuntimeInfo};
pub use device::Device;
pub use geometry::{iou, PixelBox};
pub use nms::nms_filter;

/// One predicted logo. The class is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: PixelBox,
    pub conf: Option<f32>,
}

impl Detection {
    pub fn to_wire(&self) -> logo_proto::DetectionOut {
        logo_proto::DetectionOut { bbox: self.bbox.into() }
    }
}

/// Backend output in absolute pixel coordinates of the source image,
/// before clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub conf: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Model-space candidate, normalized center format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub conf: f32,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    /// `[cx, cy, w, h, score]` per anchor, channel-major `[1, 5, N]` or row-major `[1, N, 5]`.
    #[default]
    Yolov8,
    /// `[cx, cy, w, h, obj, cls]` per row, `[1, N, 6]`.
    Yolov5,
}

impl std::str::FromStr for OutputLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yolov8" | "ultralytics" => Ok(Self::Yolov8),
            "yolov5" => Ok(Self::Yolov5),
            other => anyhow::bail!("unknown output layout: {} (expected yolov8|yolov5)", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub model_path: String,
    pub img_size: u32,
    pub conf_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
    pub output_layout: OutputLayout,
    pub device: Device,
    /// Model emits coordinates normalized to `[0, 1]` (ultralytics tflite export).
    /// When false they are in input-pixel units and divided by `img_size`.
    pub normalized_coords: bool,
    pub num_threads: i32,
}

/// Non-reentrant inference backend. One instance owns one model on one device.
pub trait Detector: Send {
    fn detect_rgb(&mut self, img: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// Decodes a raw single-class output tensor into thresholded candidates.
pub fn decode_output(
    raw: &[f32],
    dims: &[i32],
    layout: OutputLayout,
    conf_th: f32,
    coord_scale: f32,
) -> Result<Vec<Candidate>> {
    let dims: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
    let (rows, cols) = match dims.as_slice() {
        [1, a, b] | [a, b] => (*a, *b),
        other => anyhow::bail!("unexpected output dims {:?}", other),
    };
    anyhow::ensure!(raw.len() >= rows * cols, "output tensor shorter than its dims: {} < {}", raw.len(), rows * cols);

    let mut out = match layout {
        OutputLayout::Yolov8 if rows == 5 => postprocess_yolov8_channel_major(raw, cols, conf_th),
        OutputLayout::Yolov8 if cols == 5 => postprocess_rows(raw, rows, 5, conf_th, |r| r[4]),
        OutputLayout::Yolov5 if cols == 6 => postprocess_rows(raw, rows, 6, conf_th, |r| r[4] * r[5]),
        _ => anyhow::bail!(
            "output dims {:?} do not match a single-class {:?} layout",
            dims,
            layout
        ),
    };
    if coord_scale != 1.0 && coord_scale > 0.0 {
        for c in &mut out {
            c.cx /= coord_scale;
            c.cy /= coord_scale;
            c.w /= coord_scale;
            c.h /= coord_scale;
        }
    }
    Ok(out)
}

fn postprocess_yolov8_channel_major(raw: &[f32], n: usize, conf_th: f32) -> Vec<Candidate> {
    let mut out = Vec::new();
    for i in 0..n {
        let conf = raw[4 * n + i];
        if conf >= conf_th {
            out.push(Candidate { conf, cx: raw[i], cy: raw[n + i], w: raw[2 * n + i], h: raw[3 * n + i] });
        }
    }
    out
}

fn postprocess_rows(raw: &[f32], rows: usize, stride: usize, conf_th: f32, score: impl Fn(&[f32]) -> f32) -> Vec<Candidate> {
    raw.chunks_exact(stride)
        .take(rows)
        .filter_map(|r| {
            let conf = score(r);
            (conf >= conf_th).then_some(Candidate { conf, cx: r[0], cy: r[1], w: r[2], h: r[3] })
        })
        .collect()
}

/// Maps normalized candidates onto a `w x h` source image (stretch resize,
/// no letterbox).
pub fn to_pixel_space(cands: &[Candidate], w: u32, h: u32) -> Vec<RawDetection> {
    let (wf, hf) = (w as f32, h as f32);
    cands
        .iter()
        .map(|c| RawDetection {
            conf: c.conf,
            x1: (c.cx - c.w / 2.0) * wf,
            y1: (c.cy - c.h / 2.0) * hf,
            x2: (c.cx + c.w / 2.0) * wf,
            y2: (c.cy + c.h / 2.0) * hf,
        })
        .collect()
}
