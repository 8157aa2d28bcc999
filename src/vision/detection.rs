//! Text box detection from the probability map
//!
//! Connected-component box finder: 4-connected flood fill over cells above the
//! detection threshold, area/size filtering, an expansion margin derived from
//! each blob's area/perimeter ratio, and rescaling to source-image pixels.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::debug;

use super::prob_map::ProbabilityMap;
use crate::config::DetectionParams;

/// Axis-aligned text box in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectionBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectionBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box covering an entire `width x height` image
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get bounding box as (x, y, width, height)
    pub fn bounds(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &DetectionBox) -> f32 {
        let x0 = self.x.max(other.x) as u64;
        let y0 = self.y.max(other.y) as u64;
        let x1 = (self.x as u64 + self.width as u64).min(other.x as u64 + other.width as u64);
        let y1 = (self.y as u64 + self.height as u64).min(other.y as u64 + other.height as u64);

        let intersection = x1.saturating_sub(x0) * y1.saturating_sub(y0);
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f32 / union as f32
    }
}

/// One 4-connected component of above-threshold cells
#[derive(Debug, Clone, Copy)]
struct Blob {
    min_x: usize,
    max_x: usize,
    min_y: usize,
    max_y: usize,
    area: usize,
}

impl Blob {
    fn width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    /// Margin (in map cells) the blob is grown by on every side
    fn expansion(&self, unclip_ratio: f32) -> f32 {
        let perimeter = 2 * (self.width() + self.height());
        if perimeter == 0 {
            return 0.0;
        }
        self.area as f32 * unclip_ratio / perimeter as f32
    }
}

/// Find text boxes in a probability map.
///
/// Components are emitted in row-major order of their first cell. When nothing
/// survives the filters the whole source image is returned as a single box.
pub fn find_boxes(
    map: &ProbabilityMap,
    scale_x: f32,
    scale_y: f32,
    source_w: u32,
    source_h: u32,
    params: &DetectionParams,
) -> Vec<DetectionBox> {
    let (map_w, map_h) = (map.width(), map.height());
    let min_area = (map_w * map_h) as f32 * params.min_area_ratio;

    let mut visited = vec![false; map_w * map_h];
    let mut queue = VecDeque::new();
    let mut boxes = Vec::new();
    let mut components = 0usize;

    'scan: for y in 0..map_h {
        for x in 0..map_w {
            if visited[y * map_w + x] || map.get(x, y) <= params.threshold {
                continue;
            }

            let blob = flood_fill(map, x, y, params.threshold, &mut visited, &mut queue);
            components += 1;

            if (blob.area as f32) < min_area
                || blob.width() < params.min_blob_side
                || blob.height() < params.min_blob_side
            {
                continue;
            }

            if let Some(b) = scale_blob(&blob, scale_x, scale_y, source_w, source_h, params) {
                boxes.push(b);
                if boxes.len() >= params.max_boxes {
                    break 'scan;
                }
            }
        }
    }

    debug!(
        "Box finder: {} components on {}x{} map, {} boxes kept",
        components,
        map_w,
        map_h,
        boxes.len()
    );

    if boxes.is_empty() {
        return vec![DetectionBox::full(source_w, source_h)];
    }
    boxes
}

/// BFS over 4-connected neighbours strictly above `threshold`
fn flood_fill(
    map: &ProbabilityMap,
    start_x: usize,
    start_y: usize,
    threshold: f32,
    visited: &mut [bool],
    queue: &mut VecDeque<(usize, usize)>,
) -> Blob {
    let (map_w, map_h) = (map.width(), map.height());
    let mut blob = Blob {
        min_x: start_x,
        max_x: start_x,
        min_y: start_y,
        max_y: start_y,
        area: 0,
    };

    visited[start_y * map_w + start_x] = true;
    queue.clear();
    queue.push_back((start_x, start_y));

    while let Some((x, y)) = queue.pop_front() {
        blob.area += 1;
        blob.min_x = blob.min_x.min(x);
        blob.max_x = blob.max_x.max(x);
        blob.min_y = blob.min_y.min(y);
        blob.max_y = blob.max_y.max(y);

        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx >= map_w || ny >= map_h {
                continue;
            }
            let idx = ny * map_w + nx;
            if !visited[idx] && map.get(nx, ny) > threshold {
                visited[idx] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    blob
}

/// Grow a blob by its expansion margin and map it to source pixels
fn scale_blob(
    blob: &Blob,
    scale_x: f32,
    scale_y: f32,
    source_w: u32,
    source_h: u32,
    params: &DetectionParams,
) -> Option<DetectionBox> {
    let expansion = blob.expansion(params.unclip_ratio);

    // Cell edges: a blob spanning cells min..=max covers [min, max + 1)
    let left = (blob.min_x as f32 - expansion) * scale_x;
    let right = (blob.max_x as f32 + 1.0 + expansion) * scale_x;
    let top = (blob.min_y as f32 - expansion) * scale_y;
    let bottom = (blob.max_y as f32 + 1.0 + expansion) * scale_y;

    let left = left.clamp(0.0, source_w as f32);
    let right = right.clamp(0.0, source_w as f32);
    let top = top.clamp(0.0, source_h as f32);
    let bottom = bottom.clamp(0.0, source_h as f32);

    if right - left <= params.min_box_side || bottom - top <= params.min_box_side {
        return None;
    }

    let x0 = left.floor() as u32;
    let y0 = top.floor() as u32;
    let x1 = (right.ceil() as u32).min(source_w);
    let y1 = (bottom.ceil() as u32).min(source_h);

    Some(DetectionBox::new(x0, y0, x1 - x0, y1 - y0))
}
