//! Greedy assignment of predictions to ground-truth boxes for one image.

use logo_vision::{iou, Detection, PixelBox};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Per-image (or accumulated) match outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCount {
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
}

impl MatchCount {
    pub fn new(tp: u64, fp: u64, fn_: u64) -> Self {
        Self { tp, fp, fn_ }
    }
}

impl Add for MatchCount {
    type Output = MatchCount;

    fn add(self, o: MatchCount) -> MatchCount {
        MatchCount { tp: self.tp + o.tp, fp: self.fp + o.fp, fn_: self.fn_ + o.fn_ }
    }
}

impl AddAssign for MatchCount {
    fn add_assign(&mut self, o: MatchCount) {
        *self = *self + o;
    }
}

impl Sum for MatchCount {
    fn sum<I: Iterator<Item = MatchCount>>(iter: I) -> MatchCount {
        iter.fold(MatchCount::default(), Add::add)
    }
}

/// Order in which predictions claim ground truth.
///
/// `AsGiven` keeps the detector's output order and is the default, matching
/// earlier reports. `ConfidenceDesc` is the usual evaluation convention and
/// can assign near-ties differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchOrder {
    #[default]
    AsGiven,
    ConfidenceDesc,
}

impl std::str::FromStr for MatchOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "as-given" | "given" | "input" => Ok(Self::AsGiven),
            "confidence" | "confidence-desc" => Ok(Self::ConfidenceDesc),
            other => anyhow::bail!("unknown match order: {} (expected as-given|confidence)", other),
        }
    }
}

/// Each prediction, in slice order, claims the unclaimed ground-truth box
/// with the highest positive IoU, counting a true positive when that IoU
/// reaches `iou_threshold`. A ground-truth box is claimed at most once.
///
/// Equal-IoU candidates are resolved by the smaller box coordinates, so the
/// result does not depend on ground-truth order. It does depend on
/// prediction order.
pub fn match_boxes(predictions: &[PixelBox], ground_truth: &[PixelBox], iou_threshold: f64) -> MatchCount {
    let mut claimed = vec![false; ground_truth.len()];
    let mut tp = 0u64;

    for p in predictions {
        let mut best: Option<(usize, f64)> = None;
        for (gi, g) in ground_truth.iter().enumerate() {
            if claimed[gi] {
                continue;
            }
            let v = iou(p, g);
            if v <= 0.0 {
                continue;
            }
            best = match best {
                Some((bi, bv)) if v < bv || (v == bv && ground_truth[bi] <= *g) => Some((bi, bv)),
                _ => Some((gi, v)),
            };
        }
        if let Some((gi, v)) = best {
            if v >= iou_threshold {
                claimed[gi] = true;
                tp += 1;
            }
        }
    }

    MatchCount {
        tp,
        fp: predictions.len() as u64 - tp,
        fn_: ground_truth.len() as u64 - tp,
    }
}

pub fn match_detections(predictions: &[Detection], ground_truth: &[PixelBox], iou_threshold: f64, order: MatchOrder) -> MatchCount {
    let boxes: Vec<PixelBox> = match order {
        MatchOrder::AsGiven => predictions.iter().map(|d| d.bbox).collect(),
        MatchOrder::ConfidenceDesc => {
            let mut sorted: Vec<&Detection> = predictions.iter().collect();
            // stable: equal scores keep detector order, unscored go last
            sorted.sort_by(|a, b| {
                let ka = a.conf.unwrap_or(f32::NEG_INFINITY);
                let kb = b.conf.unwrap_or(f32::NEG_INFINITY);
                kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
            });
            sorted.into_iter().map(|d| d.bbox).collect()
        }
    };
    match_boxes(&boxes, ground_truth, iou_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_sum() {
        let total: MatchCount = [MatchCount::new(1, 0, 2), MatchCount::new(3, 1, 0)].into_iter().sum();
        assert_eq!(total, MatchCount::new(4, 1, 2));
    }

    #[test]
    fn zero_iou_never_matches_even_at_zero_threshold() {
        let p = [PixelBox::new(0, 0, 4, 4)];
        let g = [PixelBox::new(10, 10, 14, 14)];
        assert_eq!(match_boxes(&p, &g, 0.0), MatchCount::new(0, 1, 1));
    }

    #[test]
    fn order_parses() {
        assert_eq!("confidence".parse::<MatchOrder>().unwrap(), MatchOrder::ConfidenceDesc);
        assert_eq!("AS-GIVEN".parse::<MatchOrder>().unwrap(), MatchOrder::AsGiven);
        assert!("random".parse::<MatchOrder>().is_err());
    }
}
