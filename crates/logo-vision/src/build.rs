fn main() {
    // Features reach build scripts as CARGO_FEATURE_* env vars; only link the
    // TFLite C API when a backend that needs it is enabled.
    if std::env::var_os("CARGO_FEATURE_VISION_TFLITE").is_some() {
        println!("cargo:rustc-link-lib=tensorflowlite_c");
    }
    if std::env::var_os("CARGO_FEATURE_VISION_GPU").is_some() {
        println!("cargo:rustc-link-lib=tensorflowlite_gpu_delegate");
    }
    if let Some(dir) = std::env::var_os("TFLITE_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
    }
    println!("cargo:rerun-if-env-changed=TFLITE_LIB_DIR");
}
