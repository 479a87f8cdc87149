use anyhow::{Context, Result};
use image::DynamicImage;
use logo_vision::Detection;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aggregate::EvaluationAggregator;
use crate::labels::read_yolo_labels;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub image: PathBuf,
    pub label: PathBuf,
}

/// Image files directly under `dir`, sorted by path.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for ent in std::fs::read_dir(dir).with_context(|| format!("read images dir {}", dir.display()))? {
        let path = ent?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
        if ext.is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str())) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub fn corpus_entries(images_dir: &Path, labels_dir: &Path) -> Result<Vec<CorpusEntry>> {
    Ok(list_images(images_dir)?
        .into_iter()
        .map(|image| {
            let stem = image.file_stem().unwrap_or_default().to_os_string();
            let mut name = stem;
            name.push(".txt");
            CorpusEntry { label: labels_dir.join(name), image }
        })
        .collect())
}

/// Runs `predict` over every corpus image and feeds the aggregator.
/// Images that fail to decode are logged and left out of the count.
pub fn evaluate_entries<F>(entries: &[CorpusEntry], agg: &mut EvaluationAggregator, mut predict: F) -> Result<()>
where
    F: FnMut(&DynamicImage) -> Result<Vec<Detection>>,
{
    for (i, e) in entries.iter().enumerate() {
        let img = match image::open(&e.image) {
            Ok(img) => img,
            Err(err) => {
                warn!("eval: skipping {}: {}", e.image.display(), err);
                continue;
            }
        };
        let gt = read_yolo_labels(&e.label, img.width(), img.height())?;
        let preds = predict(&img).with_context(|| format!("predict {}", e.image.display()))?;
        let c = agg.push(&preds, &gt);
        info!(
            image = %e.image.display(),
            tp = c.tp,
            fp = c.fp,
            fn_ = c.fn_,
            "eval: {}/{}",
            i + 1,
            entries.len()
        );
    }
    Ok(())
}
