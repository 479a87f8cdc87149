use logo_fetch::{yadisk, Fetcher};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("weights not found at {0} and WEIGHTS_URL is not set")]
    Missing(PathBuf),
    #[error("weights download failed: {0:#}")]
    Download(anyhow::Error),
    #[error("weights checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct WeightsSource {
    pub path: PathBuf,
    pub url: Option<String>,
    /// Expected SHA-256 of the file, hex. Checked only for downloads.
    pub sha256: Option<String>,
    /// Certificate fingerprint pin for the download host.
    pub pin_sha256: Option<String>,
}

/// Returns a local weights path, downloading once from `src.url` when the
/// file is absent. Single attempt, no retry.
pub async fn ensure_weights(src: &WeightsSource) -> Result<PathBuf, WeightsError> {
    if src.path.is_file() {
        return Ok(src.path.clone());
    }
    let Some(url) = src.url.as_deref().filter(|u| !u.trim().is_empty()) else {
        return Err(WeightsError::Missing(src.path.clone()));
    };

    let url = yadisk::normalize_public_url(url.trim());
    info!("weights: {} missing, downloading", src.path.display());
    let fetcher = Fetcher::new(src.pin_sha256.as_deref()).map_err(WeightsError::Download)?;
    let href = yadisk::resolve_download(&fetcher, &url).await.map_err(WeightsError::Download)?;
    fetcher.download_to(&href, &src.path).await.map_err(WeightsError::Download)?;

    if let Some(expected) = src.sha256.as_deref().filter(|s| !s.trim().is_empty()) {
        if let Err(e) = verify_sha256(&src.path, expected) {
            warn!("weights: removing {} after failed verification", src.path.display());
            std::fs::remove_file(&src.path).ok();
            return Err(e);
        }
    }
    Ok(src.path.clone())
}

pub fn verify_sha256(path: &Path, expected_hex: &str) -> Result<(), WeightsError> {
    let bytes = std::fs::read(path).map_err(|source| WeightsError::Io { path: path.to_path_buf(), source })?;
    let actual = hex::encode(Sha256::digest(&bytes));
    let expected = expected_hex.trim().to_ascii_lowercase();
    if actual != expected {
        return Err(WeightsError::Checksum { expected, actual });
    }
    Ok(())
}
