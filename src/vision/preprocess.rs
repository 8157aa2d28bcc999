//! Image preprocessing for OCR models
//!
//! Handles image resizing, normalization, and tensor conversion for the
//! detection and recognition models.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use ndarray::Array4;

/// Mean values for detection normalization [R, G, B] (ImageNet)
pub const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Std values for detection normalization [R, G, B] (ImageNet)
pub const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Recognition maps [0, 255] -> [-1, 1]: (pixel / 255.0 - 0.5) / 0.5
pub const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// Both model input dimensions must be divisible by this
pub const DIMENSION_ALIGN: u32 = 32;

/// Round `value` up to the nearest multiple of `align`
pub fn align_up(value: u32, align: u32) -> u32 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Model input size for detection.
///
/// One scale factor keeps the longer side within `limit_side_len` (images that
/// already fit keep scale 1), then both sides are rounded up to a multiple of 32.
pub fn detection_input_size(width: u32, height: u32, limit_side_len: u32) -> (u32, u32) {
    let longer = width.max(height).max(1) as f32;
    let scale = if longer > limit_side_len as f32 {
        limit_side_len as f32 / longer
    } else {
        1.0
    };

    let scaled_w = ((width as f32 * scale).round() as u32).max(1);
    let scaled_h = ((height as f32 * scale).round() as u32).max(1);

    (
        align_up(scaled_w, DIMENSION_ALIGN),
        align_up(scaled_h, DIMENSION_ALIGN),
    )
}

/// Width of a crop resized to `target_height`, before alignment.
///
/// `round(box_width * target_height / box_height)` clamped to `[min_width, max_width]`.
pub fn recognition_input_width(
    box_width: u32,
    box_height: u32,
    target_height: u32,
    min_width: u32,
    max_width: u32,
) -> u32 {
    if box_height == 0 {
        return min_width;
    }
    let ratio = target_height as f32 / box_height as f32;
    let width = (box_width as f32 * ratio).round() as u32;
    width.clamp(min_width, max_width.max(min_width))
}

/// Convert a bitmap into a normalized `[1, 3, H, W]` tensor.
///
/// The bitmap is resized to exactly `target_w x target_h` if it is not that size
/// already. Each channel maps to `(value / 255 - mean[c]) / std[c]`.
pub fn build_tensor(
    bitmap: &RgbaImage,
    target_w: u32,
    target_h: u32,
    mean: &[f32; 3],
    std: &[f32; 3],
) -> Array4<f32> {
    let resized;
    let source = if bitmap.dimensions() == (target_w, target_h) {
        bitmap
    } else {
        resized = imageops::resize(bitmap, target_w, target_h, FilterType::Triangle);
        &resized
    };

    let (w, h) = (target_w as usize, target_h as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

    for (x, y, pixel) in source.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel.0[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }

    tensor
}
