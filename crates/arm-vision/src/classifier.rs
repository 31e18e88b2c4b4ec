use crate::PieceColor;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One color class the classifier knows, as an inclusive RGB box.
/// The class table is part of the trained classifier artifact and is loaded
/// at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorClass {
    pub color: PieceColor,
    pub min_rgb: [u8; 3],
    pub max_rgb: [u8; 3],
}

impl ColorClass {
    fn matches(&self, px: &image::Rgba<u8>) -> bool {
        (0..3).all(|i| px[i] >= self.min_rgb[i] && px[i] <= self.max_rgb[i])
    }
}

/// Default class table for the standard blue/red game pieces.
pub fn default_classes() -> Vec<ColorClass> {
    vec![
        ColorClass {
            color: PieceColor::Blue,
            min_rgb: [0, 0, 120],
            max_rgb: [90, 110, 255],
        },
        ColorClass {
            color: PieceColor::Red,
            min_rgb: [130, 0, 0],
            max_rgb: [255, 90, 90],
        },
    ]
}

/// A labeled blob found in a frame.
#[derive(Debug, Clone)]
pub struct LabeledRegion {
    pub color: PieceColor,
    /// Pixel-space centroid.
    pub centroid: (f64, f64),
    /// Estimated covered area in full-resolution pixels.
    pub area: u32,
    /// Fraction of the blob's bounding box matching the class color.
    pub confidence: f64,
}

/// Boundary to the block classifier. The production artifact is a trained
/// model; tests substitute fixed outputs.
pub trait Classifier: Send + Sync {
    fn infer(&self, frame: &RgbaImage) -> Vec<LabeledRegion>;
}

/// Color-threshold classifier over a sampled pixel grid.
///
/// Pixels are sampled every `sample_step` in both axes, matched against
/// each class box, and grouped into 4-connected blobs. Blobs smaller than
/// `min_area` full-resolution pixels are noise and dropped.
pub struct ColorClassifier {
    classes: Vec<ColorClass>,
    sample_step: u32,
    min_area: u32,
}

impl ColorClassifier {
    pub fn new(classes: Vec<ColorClass>, sample_step: u32, min_area: u32) -> Self {
        Self {
            classes,
            sample_step: sample_step.max(1),
            min_area,
        }
    }
}

impl Default for ColorClassifier {
    fn default() -> Self {
        Self::new(default_classes(), 4, 500)
    }
}

impl Classifier for ColorClassifier {
    fn infer(&self, frame: &RgbaImage) -> Vec<LabeledRegion> {
        let mut regions = Vec::new();
        for class in &self.classes {
            regions.extend(find_blobs(frame, class, self.sample_step, self.min_area));
        }
        debug!("classifier found {} region(s)", regions.len());
        regions
    }
}

/// Find connected blobs of `class`-colored pixels on the sampled grid.
fn find_blobs(
    frame: &RgbaImage,
    class: &ColorClass,
    step: u32,
    min_area: u32,
) -> Vec<LabeledRegion> {
    let (w, h) = (frame.width(), frame.height());
    let gw = w.div_ceil(step) as usize;
    let gh = h.div_ceil(step) as usize;
    if gw == 0 || gh == 0 {
        return Vec::new();
    }

    // Sampled hit mask.
    let mut hits = vec![false; gw * gh];
    for gy in 0..gh {
        for gx in 0..gw {
            let px = frame.get_pixel(gx as u32 * step, gy as u32 * step);
            hits[gy * gw + gx] = class.matches(px);
        }
    }

    // 4-connected flood fill over the mask.
    let mut visited = vec![false; gw * gh];
    let mut regions = Vec::new();
    let mut queue = Vec::new();

    for start in 0..gw * gh {
        if !hits[start] || visited[start] {
            continue;
        }

        queue.clear();
        queue.push(start);
        visited[start] = true;
        let mut count = 0u32;
        let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);
        let (mut min_x, mut max_x) = (usize::MAX, 0usize);
        let (mut min_y, mut max_y) = (usize::MAX, 0usize);

        while let Some(idx) = queue.pop() {
            let (gx, gy) = (idx % gw, idx / gw);
            count += 1;
            sum_x += gx as f64;
            sum_y += gy as f64;
            min_x = min_x.min(gx);
            max_x = max_x.max(gx);
            min_y = min_y.min(gy);
            max_y = max_y.max(gy);

            let mut push = |nidx: usize| {
                if hits[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    queue.push(nidx);
                }
            };
            if gx > 0 {
                push(idx - 1);
            }
            if gx + 1 < gw {
                push(idx + 1);
            }
            if gy > 0 {
                push(idx - gw);
            }
            if gy + 1 < gh {
                push(idx + gw);
            }
        }

        let area = count * step * step;
        if area < min_area {
            continue;
        }

        let bbox_cells = ((max_x - min_x + 1) * (max_y - min_y + 1)) as f64;
        let confidence = (count as f64 / bbox_cells).clamp(0.0, 1.0);
        let centroid = (
            (sum_x / count as f64) * step as f64 + step as f64 / 2.0,
            (sum_y / count as f64) * step as f64 + step as f64 / 2.0,
        );

        debug!(
            "{} blob at ({:.0}, {:.0}): area {} px, confidence {:.2}",
            class.color, centroid.0, centroid.1, area, confidence
        );
        regions.push(LabeledRegion {
            color: class.color,
            centroid,
            area,
            confidence,
        });
    }

    regions
}
