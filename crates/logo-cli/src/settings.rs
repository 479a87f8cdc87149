use anyhow::{Context, Result};
use logo_api::AdmissionLimits;
use logo_vision::weights::WeightsSource;
use logo_vision::{Device, OutputLayout, VisionConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for `request_timeout_s` (one day).
pub const MAX_REQUEST_TIMEOUT_S: f64 = 86_400.0;

/// Service settings. Keys in the TOML file are the lower-case form of the
/// environment variables (`conf_threshold` for `CONF_THRESHOLD`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub weights_path: PathBuf,
    pub weights_url: Option<String>,
    pub weights_sha256: Option<String>,
    pub weights_cert_sha256: Option<String>,

    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub img_size: u32,
    pub max_detections: usize,
    pub output_layout: OutputLayout,
    pub normalized_coords: bool,
    pub num_threads: i32,
    pub device: Device,

    pub max_file_size_mb: u64,
    pub request_timeout_s: f64,
    pub max_image_pixels: u64,
    pub max_concurrency: usize,
    pub warmup: bool,
    pub bind_addr: String,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from("weights/best.tflite"),
            weights_url: None,
            weights_sha256: None,
            weights_cert_sha256: None,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            img_size: 640,
            max_detections: 300,
            output_layout: OutputLayout::Yolov8,
            normalized_coords: true,
            num_threads: 2,
            device: Device::Auto,
            max_file_size_mb: 10,
            request_timeout_s: 30.0,
            max_image_pixels: 40_000_000,
            max_concurrency: 2,
            warmup: false,
            bind_addr: "0.0.0.0:8000".into(),
            log_level: "info".into(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut s = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        s.apply_env(|k| std::env::var(k).ok())?;
        s.validate()?;
        Ok(s)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).context("parse config toml")
    }

    /// Overrides fields from `lookup(NAME)`; unset or blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("WEIGHTS_PATH") {
            self.weights_path = PathBuf::from(v);
        }
        if let Some(v) = get("WEIGHTS_URL") {
            self.weights_url = Some(v);
        }
        if let Some(v) = get("WEIGHTS_SHA256") {
            self.weights_sha256 = Some(v);
        }
        if let Some(v) = get("WEIGHTS_CERT_SHA256") {
            self.weights_cert_sha256 = Some(v);
        }
        set(&mut self.conf_threshold, "CONF_THRESHOLD", get("CONF_THRESHOLD"))?;
        set(&mut self.iou_threshold, "IOU_THRESHOLD", get("IOU_THRESHOLD"))?;
        set(&mut self.img_size, "IMG_SIZE", get("IMG_SIZE"))?;
        set(&mut self.max_detections, "MAX_DETECTIONS", get("MAX_DETECTIONS"))?;
        set(&mut self.output_layout, "OUTPUT_LAYOUT", get("OUTPUT_LAYOUT"))?;
        if let Some(v) = get("NORMALIZED_COORDS") {
            self.normalized_coords = parse_bool(&v).context("NORMALIZED_COORDS")?;
        }
        set(&mut self.num_threads, "NUM_THREADS", get("NUM_THREADS"))?;
        set(&mut self.device, "DEVICE", get("DEVICE"))?;
        set(&mut self.max_file_size_mb, "MAX_FILE_SIZE_MB", get("MAX_FILE_SIZE_MB"))?;
        set(&mut self.request_timeout_s, "REQUEST_TIMEOUT_S", get("REQUEST_TIMEOUT_S"))?;
        set(&mut self.max_image_pixels, "MAX_IMAGE_PIXELS", get("MAX_IMAGE_PIXELS"))?;
        set(&mut self.max_concurrency, "MAX_CONCURRENCY", get("MAX_CONCURRENCY"))?;
        if let Some(v) = get("WARMUP") {
            self.warmup = parse_bool(&v).context("WARMUP")?;
        }
        if let Some(v) = get("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!((0.0..=1.0).contains(&self.conf_threshold), "conf_threshold must be in [0, 1]");
        anyhow::ensure!((0.0..=1.0).contains(&self.iou_threshold), "iou_threshold must be in [0, 1]");
        anyhow::ensure!(self.img_size > 0, "img_size must be > 0");
        anyhow::ensure!(self.max_detections > 0, "max_detections must be > 0");
        anyhow::ensure!(self.num_threads > 0, "num_threads must be > 0");
        anyhow::ensure!(self.max_file_size_mb > 0, "max_file_size_mb must be > 0");
        anyhow::ensure!(
            self.request_timeout_s > 0.0 && self.request_timeout_s <= MAX_REQUEST_TIMEOUT_S,
            "request_timeout_s must be in (0, {}]",
            MAX_REQUEST_TIMEOUT_S
        );
        anyhow::ensure!(self.max_image_pixels > 0, "max_image_pixels must be > 0");
        anyhow::ensure!(self.max_concurrency > 0, "max_concurrency must be > 0");
        self.bind_addr()?;
        if let Some(url) = self.weights_url.as_deref() {
            logo_fetch::doctor::check_url(url)?;
        }
        if let Some(pin) = self.weights_cert_sha256.as_deref() {
            logo_fetch::doctor::check_pin(pin)?;
        }
        if let Some(sum) = self.weights_sha256.as_deref() {
            anyhow::ensure!(
                sum.len() == 64 && sum.chars().all(|c| c.is_ascii_hexdigit()),
                "weights_sha256 must be 64 hex chars"
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind_addr.parse().with_context(|| format!("bind_addr invalid: {}", self.bind_addr))
    }

    pub fn vision_config(&self) -> VisionConfig {
        VisionConfig {
            model_path: self.weights_path.display().to_string(),
            img_size: self.img_size,
            conf_threshold: self.conf_threshold,
            nms_iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
            output_layout: self.output_layout,
            device: self.device,
            normalized_coords: self.normalized_coords,
            num_threads: self.num_threads,
        }
    }

    pub fn weights_source(&self) -> WeightsSource {
        WeightsSource {
            path: self.weights_path.clone(),
            url: self.weights_url.clone(),
            sha256: self.weights_sha256.clone(),
            pin_sha256: self.weights_cert_sha256.clone(),
        }
    }

    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_file_bytes: usize::try_from(self.max_file_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX),
            max_image_pixels: self.max_image_pixels,
            request_timeout: Duration::from_secs_f64(self.request_timeout_s),
            max_concurrency: self.max_concurrency,
        }
    }
}

fn set<T>(field: &mut T, name: &str, value: Option<String>) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = value {
        *field = v.parse().map_err(|e| anyhow::anyhow!("{}={:?}: {}", name, v, e))?;
    }
    Ok(())
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.admission_limits().max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(s.admission_limits().request_timeout, Duration::from_secs(30));
        assert_eq!(s.bind_addr().unwrap().port(), 8000);
    }

    #[test]
    fn one_day_timeout_is_accepted() {
        let s = Settings { request_timeout_s: MAX_REQUEST_TIMEOUT_S, ..Settings::default() };
        s.validate().unwrap();
        assert_eq!(s.admission_limits().request_timeout, Duration::from_secs(86_400));
    }

    #[test]
    fn env_overrides_file() {
        let mut s: Settings = toml::from_str(
            r#"
            conf_threshold = 0.4
            max_concurrency = 8
            device = "cpu"
            output_layout = "yolov5"
            "#,
        )
        .unwrap();
        s.apply_env(env(&[("CONF_THRESHOLD", "0.6"), ("WARMUP", "true"), ("DEVICE", " cuda "), ("IMG_SIZE", "")]))
            .unwrap();
        assert_eq!(s.conf_threshold, 0.6);
        assert_eq!(s.max_concurrency, 8);
        assert_eq!(s.device, Device::Cuda);
        assert_eq!(s.output_layout, OutputLayout::Yolov5);
        assert_eq!(s.img_size, 640);
        assert!(s.warmup);
    }

    #[test]
    fn bad_env_names_the_variable() {
        let mut s = Settings::default();
        let err = s.apply_env(env(&[("MAX_CONCURRENCY", "lots")])).unwrap_err();
        assert!(format!("{:#}", err).contains("MAX_CONCURRENCY"));
        assert!(s.apply_env(env(&[("WARMUP", "maybe")])).is_err());
    }

    #[test]
    fn unknown_file_keys_rejected() {
        assert!(toml::from_str::<Settings>("conf_treshold = 0.3").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let bad = [
            Settings { conf_threshold: 1.5, ..Settings::default() },
            Settings { max_concurrency: 0, ..Settings::default() },
            Settings { request_timeout_s: 0.0, ..Settings::default() },
            Settings { request_timeout_s: 9e18, ..Settings::default() },
            Settings { request_timeout_s: f64::NAN, ..Settings::default() },
            Settings { bind_addr: "nowhere".into(), ..Settings::default() },
            Settings { weights_url: Some("ftp://x/y".into()), ..Settings::default() },
            Settings { weights_sha256: Some("abc".into()), ..Settings::default() },
        ];
        for s in bad {
            assert!(s.validate().is_err(), "{:?}", s);
        }
    }

    #[test]
    fn conversions_carry_values() {
        let s = Settings { iou_threshold: 0.5, weights_cert_sha256: Some("ab".repeat(32)), ..Settings::default() };
        let v = s.vision_config();
        assert_eq!(v.nms_iou_threshold, 0.5);
        assert_eq!(v.model_path, "weights/best.tflite");
        assert_eq!(s.weights_source().pin_sha256.as_deref(), Some("ab".repeat(32).as_str()));
    }
}
