use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use std::path::Path;
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::info;

use crate::{decode_output, nms_filter, to_pixel_space, Detector, RawDetection, VisionConfig};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

const K_TFLITE_FLOAT32: c_int = 1;
const K_TFLITE_UINT8: c_int = 3;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorType(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "vision-gpu")]
#[link(name = "tensorflowlite_gpu_delegate")]
extern "C" {
    // null options selects the delegate defaults
    fn TfLiteGpuDelegateV2Create(options: *const c_void) -> *mut TfLiteDelegate;
    fn TfLiteGpuDelegateV2Delete(delegate: *mut TfLiteDelegate);
}

/// Single-class YOLO detector over the TFLite C API.
pub struct TfliteDetector {
    cfg: VisionConfig,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    delegate: Option<*mut TfLiteDelegate>,
}

// The raw handles are only touched through `&mut self`.
unsafe impl Send for TfliteDetector {}

/// Shape and element type of one model tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub dims: Vec<i32>,
    pub dtype: c_int,
    pub bytes: usize,
}

impl std::fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ty = match self.dtype {
            K_TFLITE_FLOAT32 => "float32",
            K_TFLITE_UINT8 => "uint8",
            _ => "other",
        };
        write!(f, "dims={:?} type={}({}) bytes={}", self.dims, ty, self.dtype, self.bytes)
    }
}

impl TfliteDetector {
    pub fn new(cfg: VisionConfig, weights_path: &Path, use_gpu: bool) -> Result<Self> {
        let path_str = weights_path.to_str().context("weights path is not utf-8")?;
        let cpath = CString::new(path_str)?;

        // handles are filled in one by one; Drop frees whatever was created
        let mut det = Self { cfg, model: ptr::null_mut(), opts: ptr::null_mut(), interp: ptr::null_mut(), delegate: None };

        det.model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!det.model.is_null(), "failed to load tflite model: {}", path_str);

        det.opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!det.opts.is_null(), "failed to create tflite options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(det.opts, det.cfg.num_threads.max(1)) };

        if use_gpu {
            let d = gpu_delegate()?;
            det.delegate = Some(d);
            unsafe { TfLiteInterpreterOptionsAddDelegate(det.opts, d) };
        }

        det.interp = unsafe { TfLiteInterpreterCreate(det.model, det.opts) };
        anyhow::ensure!(!det.interp.is_null(), "failed to create tflite interpreter");
        let rc = unsafe { TfLiteInterpreterAllocateTensors(det.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed ({})", rc);

        info!("vision: tflite model {} (threads={}, gpu={})", path_str, det.cfg.num_threads.max(1), use_gpu);
        Ok(det)
    }

    /// Input and first output tensor, for matching `OUTPUT_LAYOUT` to a model.
    pub fn inspect(&mut self) -> Result<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let output = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!output.is_null(), "no output tensor 0");
        Ok(format!("input[0]  {}\noutput[0] {}\n", tensor_info(input), tensor_info(output)))
    }

    fn fill_input(&mut self, resized: &RgbImage) -> Result<()> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");

        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        let px = resized.as_raw();
        match unsafe { TfLiteTensorType(input) } {
            K_TFLITE_UINT8 => {
                anyhow::ensure!(in_bytes >= px.len(), "input tensor too small: {} < {}", in_bytes, px.len());
                unsafe { ptr::copy_nonoverlapping(px.as_ptr(), in_ptr as *mut u8, px.len()) };
            }
            K_TFLITE_FLOAT32 => {
                let need = px.len() * std::mem::size_of::<f32>();
                anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
                let dst = unsafe { std::slice::from_raw_parts_mut(in_ptr as *mut f32, px.len()) };
                for (d, s) in dst.iter_mut().zip(px) {
                    *d = *s as f32 / 255.0;
                }
            }
            other => anyhow::bail!("unsupported input tensor type {}", other),
        }
        Ok(())
    }
}

impl Detector for TfliteDetector {
    fn detect_rgb(&mut self, img: &RgbImage) -> Result<Vec<RawDetection>> {
        let side = self.cfg.img_size;
        let resized = image::imageops::resize(img, side, side, FilterType::Triangle);
        self.fill_input(&resized)?;

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out.is_null(), "no output tensor 0");
        anyhow::ensure!(unsafe { TfLiteTensorType(out) } == K_TFLITE_FLOAT32, "output tensor must be float32");

        let out_dims = tensor_dims(out);
        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
        let out_len = unsafe { TfLiteTensorByteSize(out) } / std::mem::size_of::<f32>();
        let raw = unsafe { std::slice::from_raw_parts(out_ptr, out_len) };

        let scale = if self.cfg.normalized_coords { 1.0 } else { side as f32 };
        let cands = decode_output(raw, &out_dims, self.cfg.output_layout, self.cfg.conf_threshold, scale)
            .context("run `logo inspect` to see the output tensor and set OUTPUT_LAYOUT accordingly")?;
        let kept = nms_filter(cands, self.cfg.nms_iou_threshold, self.cfg.max_detections);
        Ok(to_pixel_space(&kept, img.width(), img.height()))
    }
}

#[cfg(feature = "vision-gpu")]
fn gpu_delegate() -> Result<*mut TfLiteDelegate> {
    let d = unsafe { TfLiteGpuDelegateV2Create(ptr::null()) };
    anyhow::ensure!(!d.is_null(), "failed to create GPU delegate");
    Ok(d)
}

#[cfg(not(feature = "vision-gpu"))]
fn gpu_delegate() -> Result<*mut TfLiteDelegate> {
    anyhow::bail!("gpu requested but binary not built with --features vision-gpu")
}

fn tensor_info(t: *const TfLiteTensor) -> TensorInfo {
    TensorInfo { dims: tensor_dims(t), dtype: unsafe { TfLiteTensorType(t) }, bytes: unsafe { TfLiteTensorByteSize(t) } }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        (0..nd).map(|i| TfLiteTensorDim(t, i)).collect()
    }
}

impl Drop for TfliteDetector {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        // the interpreter must be gone before its delegate
        #[cfg(feature = "vision-gpu")]
        if let Some(d) = self.delegate.take() {
            unsafe { TfLiteGpuDelegateV2Delete(d) };
        }
    }
}
