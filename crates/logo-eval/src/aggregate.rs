use logo_proto::EvaluationReport;
use logo_vision::{Detection, PixelBox};

use crate::matcher::{match_boxes, match_detections, MatchCount, MatchOrder};

pub fn precision(tp: u64, fp: u64) -> f64 {
    ratio(tp, tp + fp)
}

pub fn recall(tp: u64, fn_: u64) -> f64 {
    ratio(tp, tp + fn_)
}

pub fn f1(precision: f64, recall: f64) -> f64 {
    let denom = precision + recall;
    if denom > 0.0 { 2.0 * precision * recall / denom } else { 0.0 }
}

fn ratio(num: u64, denom: u64) -> f64 {
    if denom == 0 { 0.0 } else { num as f64 / denom as f64 }
}

/// Accumulates per-image match counts into a corpus report. The reduction
/// is a plain sum, so push order does not matter and partial aggregators
/// can be merged.
#[derive(Debug, Clone)]
pub struct EvaluationAggregator {
    iou_threshold: f64,
    order: MatchOrder,
    images: usize,
    total: MatchCount,
}

impl EvaluationAggregator {
    pub fn new(iou_threshold: f64) -> Self {
        Self { iou_threshold, order: MatchOrder::default(), images: 0, total: MatchCount::default() }
    }

    pub fn with_order(mut self, order: MatchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn iou_threshold(&self) -> f64 {
        self.iou_threshold
    }

    pub fn push_boxes(&mut self, predictions: &[PixelBox], ground_truth: &[PixelBox]) -> MatchCount {
        self.push_count(match_boxes(predictions, ground_truth, self.iou_threshold))
    }

    pub fn push(&mut self, predictions: &[Detection], ground_truth: &[PixelBox]) -> MatchCount {
        self.push_count(match_detections(predictions, ground_truth, self.iou_threshold, self.order))
    }

    /// Records one image's already-computed counts.
    pub fn push_count(&mut self, c: MatchCount) -> MatchCount {
        self.images += 1;
        self.total += c;
        c
    }

    pub fn merge(&mut self, other: &EvaluationAggregator) {
        self.images += other.images;
        self.total += other.total;
    }

    pub fn totals(&self) -> MatchCount {
        self.total
    }

    pub fn images(&self) -> usize {
        self.images
    }

    pub fn finish(&self) -> EvaluationReport {
        let MatchCount { tp, fp, fn_ } = self.total;
        let p = precision(tp, fp);
        let r = recall(tp, fn_);
        EvaluationReport {
            image_count: self.images,
            tp,
            fp,
            fn_,
            precision: p,
            recall: r,
            f1: f1(p, r),
            iou_threshold: self.iou_threshold,
        }
    }
}

/// Scores a whole corpus of `(predictions, ground_truth)` pairs, predictions
/// in the order given.
pub fn evaluate<I, P, G>(corpus: I, iou_threshold: f64) -> EvaluationReport
where
    I: IntoIterator<Item = (P, G)>,
    P: AsRef<[PixelBox]>,
    G: AsRef<[PixelBox]>,
{
    let mut agg = EvaluationAggregator::new(iou_threshold);
    for (p, g) in corpus {
        agg.push_boxes(p.as_ref(), g.as_ref());
    }
    agg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_denominators_give_zero() {
        assert_eq!(precision(0, 0), 0.0);
        assert_eq!(recall(0, 0), 0.0);
        assert_eq!(f1(0.0, 0.0), 0.0);

        // predictions only: nothing to recall
        let mut agg = EvaluationAggregator::new(0.5);
        agg.push_count(MatchCount::new(0, 3, 0));
        let r = agg.finish();
        assert_eq!((r.precision, r.recall, r.f1), (0.0, 0.0, 0.0));
    }

    #[test]
    fn metrics_from_totals() {
        let mut agg = EvaluationAggregator::new(0.5);
        agg.push_count(MatchCount::new(3, 1, 0));
        agg.push_count(MatchCount::new(1, 0, 4));
        let r = agg.finish();
        assert_eq!(r.image_count, 2);
        assert_eq!((r.tp, r.fp, r.fn_), (4, 1, 4));
        assert!((r.precision - 0.8).abs() < 1e-12);
        assert!((r.recall - 0.5).abs() < 1e-12);
        assert!((r.f1 - 2.0 * 0.8 * 0.5 / 1.3).abs() < 1e-12);
        assert_eq!(r.iou_threshold, 0.5);
    }
}
