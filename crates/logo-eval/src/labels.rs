use anyhow::{Context, Result};
use logo_vision::PixelBox;
use std::path::Path;
use tracing::debug;

/// Parses YOLO `class cx cy bw bh` lines (normalized to the image) into
/// absolute boxes. Lines without exactly five numeric fields are skipped.
pub fn parse_yolo_labels(text: &str, w: u32, h: u32) -> Vec<PixelBox> {
    let mut boxes = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let parsed: Option<Vec<f64>> = fields.iter().map(|f| f.parse::<f64>().ok().filter(|v| v.is_finite())).collect();
        match parsed.as_deref() {
            Some([_class, cx, cy, bw, bh]) => boxes.push(PixelBox::from_yolo_normalized(*cx, *cy, *bw, *bh, w, h)),
            _ => debug!("labels: skipping line {}: {:?}", n + 1, line),
        }
    }
    boxes
}

/// A missing label file means the image has no ground truth.
pub fn read_yolo_labels(path: &Path, w: u32, h: u32) -> Result<Vec<PixelBox>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("read labels {}", path.display()))?;
    Ok(parse_yolo_labels(&text, w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_and_skips_malformed() {
        let text = "0 0.5 0.5 0.5 0.5\n\
                    0 0.5 0.5\n\
                    garbage line here ok now\n\
                    0 0.1 0.1 0.1 0.1 0.9\n\
                    \n\
                    0 0.25 0.25 0.1 0.1\n\
                    0 nan 0.5 0.5 0.5\n";
        let b = parse_yolo_labels(text, 100, 100);
        assert_eq!(b, vec![PixelBox::new(25, 25, 75, 75), PixelBox::new(20, 20, 30, 30)]);
    }

    #[test]
    fn corners_match_integer_truncation() {
        let b = parse_yolo_labels("0 0.29 0.5 0.1 0.1", 100, 100);
        assert_eq!(b[0].x_min, 23);
        let b = parse_yolo_labels("0 0.145 0.5 0.05 0.05", 100, 100);
        assert_eq!(b[0].x_min, 11);
    }

    #[test]
    fn missing_file_is_empty() {
        let b = read_yolo_labels(Path::new("/nonexistent/labels/x.txt"), 10, 10).unwrap();
        assert!(b.is_empty());
    }
}
