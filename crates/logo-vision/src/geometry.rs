//! Axis-aligned integer boxes with inclusive pixel extents.

use logo_proto::BBox;
use serde::{Deserialize, Serialize};

/// `(x_min, y_min, x_max, y_max)`, inclusive on both ends, so a box with
/// `x_min == x_max` is one pixel wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PixelBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl PixelBox {
    /// Corners are reordered if given swapped.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x_min: x1.min(x2), y_min: y1.min(y2), x_max: x1.max(x2), y_max: y1.max(y2) }
    }

    /// Truncates float corners and clamps them into `[0, w-1] x [0, h-1]`.
    /// NaN coordinates collapse to 0.
    pub fn from_xyxy_clamped(x1: f32, y1: f32, x2: f32, y2: f32, w: u32, h: u32) -> Self {
        let cx = |v: f32| clamp_coord(v, w);
        let cy = |v: f32| clamp_coord(v, h);
        Self::new(cx(x1), cy(y1), cx(x2), cy(y2))
    }

    /// Converts a normalized YOLO `cx cy bw bh` label into absolute corners.
    /// Corners are clamped and truncated in f64 so values just under an
    /// integer stay below it.
    pub fn from_yolo_normalized(cx: f64, cy: f64, bw: f64, bh: f64, w: u32, h: u32) -> Self {
        let (wf, hf) = (w as f64, h as f64);
        let (cx, cy, half_w, half_h) = (cx * wf, cy * hf, bw * wf / 2.0, bh * hf / 2.0);
        Self::new(
            clamp_coord_f64(cx - half_w, w),
            clamp_coord_f64(cy - half_h, h),
            clamp_coord_f64(cx + half_w, w),
            clamp_coord_f64(cy + half_h, h),
        )
    }

    pub fn width(&self) -> u64 {
        (self.x_max - self.x_min) as u64 + 1
    }

    pub fn height(&self) -> u64 {
        (self.y_max - self.y_min) as u64 + 1
    }

    pub fn area(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn clamp_to(self, w: u32, h: u32) -> Self {
        let (mx, my) = (w.saturating_sub(1), h.saturating_sub(1));
        Self::new(self.x_min.min(mx), self.y_min.min(my), self.x_max.min(mx), self.y_max.min(my))
    }

    pub fn fits(&self, w: u32, h: u32) -> bool {
        w > 0 && h > 0 && self.x_max < w && self.y_max < h
    }
}

impl From<PixelBox> for BBox {
    fn from(b: PixelBox) -> Self {
        BBox { x_min: b.x_min, y_min: b.y_min, x_max: b.x_max, y_max: b.y_max }
    }
}

impl From<BBox> for PixelBox {
    fn from(b: BBox) -> Self {
        PixelBox::new(b.x_min, b.y_min, b.x_max, b.y_max)
    }
}

fn clamp_coord(v: f32, extent: u32) -> u32 {
    let max = extent.saturating_sub(1) as f32;
    if v.is_nan() {
        return 0;
    }
    v.max(0.0).min(max) as u32
}

fn clamp_coord_f64(v: f64, extent: u32) -> u32 {
    if v.is_nan() {
        return 0;
    }
    v.max(0.0).min(extent.saturating_sub(1) as f64) as u32
}

/// Intersection over union with inclusive extents. Returns 0.0 for disjoint
/// boxes and when the union is empty.
pub fn iou(a: &PixelBox, b: &PixelBox) -> f64 {
    let ix1 = a.x_min.max(b.x_min) as i64;
    let iy1 = a.y_min.max(b.y_min) as i64;
    let ix2 = a.x_max.min(b.x_max) as i64;
    let iy2 = a.y_max.min(b.y_max) as i64;

    let iw = (ix2 - ix1 + 1).max(0) as u64;
    let ih = (iy2 - iy1 + 1).max(0) as u64;
    let inter = iw * ih;

    let union = a.area() + b.area() - inter;
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_pixel_box_has_unit_area() {
        let b = PixelBox::new(3, 3, 3, 3);
        assert_eq!(b.area(), 1);
    }

    #[test]
    fn clamps_out_of_frame_float_corners() {
        let b = PixelBox::from_xyxy_clamped(-12.5, 4.9, 700.0, 481.0, 640, 480);
        assert_eq!(b, PixelBox::new(0, 4, 639, 479));
        assert!(b.fits(640, 480));
    }

    #[test]
    fn nan_collapses_to_origin() {
        let b = PixelBox::from_xyxy_clamped(f32::NAN, 1.0, 5.0, f32::NAN, 10, 10);
        assert_eq!(b, PixelBox::new(0, 0, 5, 1));
    }

    #[test]
    fn yolo_label_to_corners() {
        // centered 50% box on a 100x80 image
        let b = PixelBox::from_yolo_normalized(0.5, 0.5, 0.5, 0.5, 100, 80);
        assert_eq!(b, PixelBox::new(25, 20, 75, 60));

        // full-frame box gets clamped to the last pixel
        let full = PixelBox::from_yolo_normalized(0.5, 0.5, 1.0, 1.0, 100, 80);
        assert_eq!(full, PixelBox::new(0, 0, 99, 79));
    }

    #[test]
    fn yolo_corners_truncate_without_rounding() {
        // 0.29 * 100 - 5 = 23.999999999999996
        assert_eq!(PixelBox::from_yolo_normalized(0.29, 0.5, 0.1, 0.1, 100, 100).x_min, 23);
        // 0.145 * 100 - 2.5 = 11.999999999999998
        assert_eq!(PixelBox::from_yolo_normalized(0.145, 0.5, 0.05, 0.05, 100, 100).x_min, 11);
    }

    #[test]
    fn partial_overlap() {
        let a = PixelBox::new(0, 0, 9, 9);
        let b = PixelBox::new(5, 0, 14, 9);
        // inter 5x10 = 50, union 100 + 100 - 50
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-12);
    }

    #[test]
    fn touching_edges_share_a_pixel_column() {
        let a = PixelBox::new(0, 0, 9, 9);
        let b = PixelBox::new(9, 0, 18, 9);
        assert!(iou(&a, &b) > 0.0);
        let c = PixelBox::new(10, 0, 19, 9);
        assert_eq!(iou(&a, &c), 0.0);
    }
}
