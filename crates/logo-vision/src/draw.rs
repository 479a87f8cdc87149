use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::Detection;

const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);
const STROKE: u32 = 3;

/// Draws each box as a red outline, stroked inward.
pub fn draw_detections(img: &mut RgbImage, dets: &[Detection]) {
    for d in dets {
        let b = d.bbox.clamp_to(img.width(), img.height());
        for inset in 0..STROKE {
            let (w, h) = (b.width() as i64 - 2 * inset as i64, b.height() as i64 - 2 * inset as i64);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at((b.x_min + inset) as i32, (b.y_min + inset) as i32).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(img, rect, OUTLINE);
        }
    }
}
