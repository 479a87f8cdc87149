//! Greedy non-maximum suppression over model-space candidates.

use std::cmp::Ordering;

use crate::Candidate;

fn corners(c: &Candidate) -> [f32; 4] {
    let (hw, hh) = (c.w / 2.0, c.h / 2.0);
    [c.cx - hw, c.cy - hh, c.cx + hw, c.cy + hh]
}

/// Continuous-area IoU; model coordinates are not pixel indices.
fn overlap(a: &Candidate, b: &Candidate) -> f32 {
    let [ax1, ay1, ax2, ay2] = corners(a);
    let [bx1, by1, bx2, by2] = corners(b);
    let inter = (ax2.min(bx2) - ax1.max(bx1)).max(0.0) * (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let union = a.w.max(0.0) * a.h.max(0.0) + b.w.max(0.0) * b.h.max(0.0) - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

/// Keeps the highest-scoring candidates, dropping any that overlap an
/// already kept one by `iou_th` or more. At most `max_det` survive.
pub fn nms_filter(mut cands: Vec<Candidate>, iou_th: f32, max_det: usize) -> Vec<Candidate> {
    cands.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::with_capacity(cands.len().min(max_det));
    for c in cands {
        if kept.len() >= max_det {
            break;
        }
        if kept.iter().all(|k| overlap(&c, k) < iou_th) {
            kept.push(c);
        }
    }
    kept
}
