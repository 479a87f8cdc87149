use serde::{Deserialize, Serialize};

/// Requested compute device. `Auto` takes the accelerator when the binary
/// was built with one and falls back to CPU otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    #[default]
    Auto,
}

impl std::str::FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "auto" => Ok(Self::Auto),
            other => anyhow::bail!("unknown device: {} (expected cpu|cuda|auto)", other),
        }
    }
}

impl Device {
    /// Resolves to the concrete device name reported in `/health`.
    pub fn resolve(self, accelerator_available: bool) -> anyhow::Result<&'static str> {
        match self {
            Device::Cpu => Ok("cpu"),
            Device::Cuda if accelerator_available => Ok("gpu:0"),
            Device::Cuda => anyhow::bail!("device=cuda but binary not built with --features vision-gpu"),
            Device::Auto => Ok(if accelerator_available { "gpu:0" } else { "cpu" }),
        }
    }
}
