//! Detector output interpretation
//!
//! The DB detector's output tensor comes back with an engine-defined rank and
//! axis order. This module resolves it into a 2-D text probability map.

use ndarray::{Array2, ArrayView2, ArrayViewD, Axis, Ix2};

/// Dense per-pixel text probability in [0, 1], in model output dimensions
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    data: Array2<f32>,
}

impl ProbabilityMap {
    /// Wrap a `(height, width)` array of probabilities
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Probability at column `x`, row `y`
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[[y, x]]
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }
}

pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Values already in [0, 1] are probabilities; anything else is a logit
pub fn normalize_score(value: f32) -> f32 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        sigmoid(value)
    }
}

/// Build the probability map from a raw detector output.
///
/// Returns the map plus the scale factors from map cells back to source-image
/// pixels. `None` when the spatial dimensions can't be resolved; callers fall
/// back to a single full-image box.
pub fn build_map(
    output: ArrayViewD<'_, f32>,
    source_w: u32,
    source_h: u32,
) -> Option<(ProbabilityMap, f32, f32)> {
    let plane = spatial_plane(output)?;
    let (height, width) = plane.dim();
    if height == 0 || width == 0 {
        return None;
    }

    let data = plane.mapv(normalize_score);
    let scale_x = source_w as f32 / width as f32;
    let scale_y = source_h as f32 / height as f32;

    Some((ProbabilityMap::new(data), scale_x, scale_y))
}

/// Reduce the output tensor to its (height, width) plane.
fn spatial_plane(output: ArrayViewD<'_, f32>) -> Option<ArrayView2<'_, f32>> {
    let shape = output.shape().to_vec();
    if shape.contains(&0) {
        return None;
    }

    let plane = match shape.len() {
        2 => output,
        3 => {
            if shape[0] == 1 {
                output.index_axis_move(Axis(0), 0)
            } else if shape[2] == 1 {
                // trailing channel: (H, W, 1)
                output.index_axis_move(Axis(2), 0)
            } else if shape[1] == 1 {
                output.index_axis_move(Axis(1), 0)
            } else {
                output.index_axis_move(Axis(0), 0)
            }
        }
        4 => {
            let batch = output.index_axis_move(Axis(0), 0);
            // First singleton among the remaining axes is the channel;
            // with none, take channel 0 and treat the last two dims as (H, W)
            let channel = shape[1..].iter().position(|&d| d == 1).unwrap_or(0);
            batch.index_axis_move(Axis(channel), 0)
        }
        _ => return None,
    };

    plane.into_dimensionality::<Ix2>().ok()
}
