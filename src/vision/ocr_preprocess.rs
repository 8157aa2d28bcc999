//! Recognition crop preparation
//!
//! Crops a detected box, decides whether the text is light-on-dark from the
//! mean luma, and letterboxes the crop (and its inverted variant) to the
//! recognizer's fixed input height.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use ndarray::Array4;
use tracing::debug;

use super::detection::DetectionBox;
use super::preprocess::{align_up, build_tensor, recognition_input_width};
use crate::config::RecognitionParams;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Letterboxed crop(s) ready for the recognizer
#[derive(Debug, Clone)]
pub struct PreparedCrop {
    /// Normal polarity, on a white canvas
    pub normal: RgbaImage,
    /// Colour-inverted variant, present when the crop is dark
    pub inverted: Option<RgbaImage>,
    /// Mean luma of the unresized crop
    pub mean_luma: f32,
}

impl PreparedCrop {
    pub fn should_test_inverted(&self) -> bool {
        self.inverted.is_some()
    }
}

/// Crop `bbox` from `bitmap` and build the recognizer inputs.
///
/// Returns `None` when the box does not overlap the bitmap.
pub fn prepare_crop(
    bitmap: &RgbaImage,
    bbox: &DetectionBox,
    params: &RecognitionParams,
) -> Option<PreparedCrop> {
    let crop = crop_region(bitmap, bbox)?;
    let mean_luma = mean_luma(&crop);

    let target_h = params.target_height;
    let target_w = recognition_input_width(
        crop.width(),
        crop.height(),
        target_h,
        params.min_width,
        params.max_width,
    );
    let canvas_w = align_up(target_w, params.width_align);

    let resized = imageops::resize(&crop, target_w, target_h, FilterType::Triangle);
    let normal = letterbox(&resized, canvas_w, target_h);

    let inverted = if mean_luma < params.invert_luma_threshold {
        let mut negative = resized;
        apply_invert(&mut negative);
        Some(letterbox(&negative, canvas_w, target_h))
    } else {
        None
    };

    debug!(
        "Prepared crop {:?}: {}x{} -> {}x{} canvas, luma {:.1}, inverted: {}",
        bbox.bounds(),
        crop.width(),
        crop.height(),
        canvas_w,
        target_h,
        mean_luma,
        inverted.is_some()
    );

    Some(PreparedCrop {
        normal,
        inverted,
        mean_luma,
    })
}

/// Normalized recognizer tensor for a letterboxed crop
pub fn crop_to_tensor(crop: &RgbaImage, params: &RecognitionParams) -> Array4<f32> {
    build_tensor(crop, crop.width(), crop.height(), &params.mean, &params.std)
}

/// Copy the part of `bbox` that lies inside the bitmap
fn crop_region(bitmap: &RgbaImage, bbox: &DetectionBox) -> Option<RgbaImage> {
    let (img_w, img_h) = bitmap.dimensions();

    let x0 = bbox.x.min(img_w);
    let y0 = bbox.y.min(img_h);
    let x1 = bbox.x.saturating_add(bbox.width).min(img_w);
    let y1 = bbox.y.saturating_add(bbox.height).min(img_h);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(imageops::crop_imm(bitmap, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Mean Rec. 709 luma over all pixels (alpha ignored)
pub fn mean_luma(image: &RgbaImage) -> f32 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0.0;
    }

    let sum: f64 = image
        .pixels()
        .map(|p| 0.2126 * p.0[0] as f64 + 0.7152 * p.0[1] as f64 + 0.0722 * p.0[2] as f64)
        .sum();

    (sum / count as f64) as f32
}

/// Place `content` left-aligned on a white `width x height` canvas
fn letterbox(content: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, WHITE);
    imageops::replace(&mut canvas, content, 0, 0);
    canvas
}

/// Invert RGB colors (useful for light text on dark backgrounds)
fn apply_invert(data: &mut [u8]) {
    for chunk in data.chunks_exact_mut(4) {
        chunk[0] = 255 - chunk[0];
        chunk[1] = 255 - chunk[1];
        chunk[2] = 255 - chunk[2];
        // Alpha unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RecognitionParams {
        RecognitionParams::default()
    }

    #[test]
    fn test_invert() {
        let mut data = vec![0, 100, 255, 255];
        apply_invert(&mut data);
        assert_eq!(data[0], 255);
        assert_eq!(data[1], 155);
        assert_eq!(data[2], 0);
        assert_eq!(data[3], 255); // Alpha unchanged
    }

    #[test]
    fn test_mean_luma() {
        let white = RgbaImage::from_pixel(3, 3, WHITE);
        assert!((mean_luma(&white) - 255.0).abs() < 0.01);

        let green = RgbaImage::from_pixel(2, 2, Rgba([0, 100, 0, 255]));
        assert!((mean_luma(&green) - 71.52).abs() < 0.01);
    }

    #[test]
    fn test_light_crop_has_no_inverted_variant() {
        let bitmap = RgbaImage::from_pixel(200, 100, Rgba([230, 230, 230, 255]));
        let crop = prepare_crop(&bitmap, &DetectionBox::new(10, 10, 100, 40), &params()).unwrap();

        assert!(!crop.should_test_inverted());
        // 100x40 -> 120x48, padded to 128
        assert_eq!(crop.normal.dimensions(), (128, 48));
        assert_eq!(crop.normal.get_pixel(127, 0), &WHITE);
        assert_eq!(crop.normal.get_pixel(0, 0), &Rgba([230, 230, 230, 255]));
    }

    #[test]
    fn test_dark_crop_gets_inverted_variant() {
        let bitmap = RgbaImage::from_pixel(200, 100, Rgba([20, 20, 20, 255]));
        // 70x32 -> 105x48 content on a 128-wide canvas
        let crop = prepare_crop(&bitmap, &DetectionBox::new(0, 0, 70, 32), &params()).unwrap();

        assert!(crop.should_test_inverted());
        let inverted = crop.inverted.as_ref().unwrap();
        assert_eq!(inverted.dimensions(), crop.normal.dimensions());

        // Content is inverted, padding stays white
        assert_eq!(inverted.get_pixel(0, 0), &Rgba([235, 235, 235, 255]));
        assert_eq!(crop.normal.get_pixel(0, 0), &Rgba([20, 20, 20, 255]));
        assert_eq!(inverted.width(), 128);
        assert_eq!(inverted.get_pixel(127, 47), &WHITE);
    }

    #[test]
    fn test_crop_is_clamped_to_bitmap() {
        let bitmap = RgbaImage::from_pixel(50, 50, WHITE);

        let crop = prepare_crop(&bitmap, &DetectionBox::new(40, 40, 100, 100), &params());
        assert!(crop.is_some());

        let outside = prepare_crop(&bitmap, &DetectionBox::new(60, 60, 10, 10), &params());
        assert!(outside.is_none());

        let empty = prepare_crop(&bitmap, &DetectionBox::new(10, 10, 0, 10), &params());
        assert!(empty.is_none());
    }

    #[test]
    fn test_width_is_clamped_and_aligned() {
        let bitmap = RgbaImage::from_pixel(4000, 20, WHITE);
        let crop = prepare_crop(&bitmap, &DetectionBox::new(0, 0, 4000, 10), &params()).unwrap();
        assert_eq!(crop.normal.dimensions(), (1536, 48));

        let narrow = prepare_crop(&bitmap, &DetectionBox::new(0, 0, 1, 20), &params()).unwrap();
        assert_eq!(narrow.normal.dimensions(), (32, 48));
    }

    #[test]
    fn test_crop_to_tensor_shape() {
        let bitmap = RgbaImage::from_pixel(100, 40, WHITE);
        let crop = prepare_crop(&bitmap, &DetectionBox::new(0, 0, 100, 40), &params()).unwrap();
        let tensor = crop_to_tensor(&crop.normal, &params());

        assert_eq!(tensor.dim(), (1, 3, 48, 128));
        assert!((tensor[[0, 0, 10, 10]] - 1.0).abs() < 1e-5);
    }
}
