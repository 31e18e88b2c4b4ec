mod calibration;
mod capture;
mod classifier;

pub use calibration::Calibration;
pub use capture::{capture_loop, CaptureStatus, FrameSource, ReplaySource, StillCameraSource};
pub use classifier::{default_classes, Classifier, ColorClass, ColorClassifier, LabeledRegion};

use arm_kinematics::Point3;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Color class of a game piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceColor {
    /// The human player's pieces.
    Blue,
    /// The robot's pieces.
    Red,
}

impl std::fmt::Display for PieceColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PieceColor::Blue => write!(f, "blue"),
            PieceColor::Red => write!(f, "red"),
        }
    }
}

/// A classified, localized game piece in one frame. Produced per frame and
/// consumed once; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub color: PieceColor,
    /// Pixel-space centroid.
    pub pixel: (f64, f64),
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// Centroid projected onto the board plane in arm-space.
    pub world: Point3,
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("calibration has not been loaded")]
    CalibrationMissing,

    #[error("failed to read calibration file {path}: {source}")]
    CalibrationRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write calibration file {path}: {source}")]
    CalibrationWrite {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse calibration file {path}: {source}")]
    CalibrationParse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
}

/// Lazy, finite, restartable sequence of detections from one frame.
/// Regions under the confidence threshold are skipped during iteration.
#[derive(Debug, Clone)]
pub struct Detections {
    regions: Vec<LabeledRegion>,
    calibration: Calibration,
    min_confidence: f64,
    index: usize,
}

impl Detections {
    /// Rewind to the first detection.
    pub fn restart(&mut self) {
        self.index = 0;
    }
}

impl Iterator for Detections {
    type Item = Detection;

    fn next(&mut self) -> Option<Detection> {
        while self.index < self.regions.len() {
            let region = &self.regions[self.index];
            self.index += 1;

            if region.confidence < self.min_confidence {
                debug!(
                    "{} region at ({:.0}, {:.0}) discarded: confidence {:.2} < {:.2}",
                    region.color,
                    region.centroid.0,
                    region.centroid.1,
                    region.confidence,
                    self.min_confidence
                );
                continue;
            }

            let world = self.calibration.project(region.centroid.0, region.centroid.1);
            return Some(Detection {
                color: region.color,
                pixel: region.centroid,
                confidence: region.confidence,
                world,
            });
        }
        None
    }
}

/// Classifies and localizes game pieces in captured frames. Stateless per
/// frame; the calibration is loaded once and immutable afterwards.
pub struct Localizer {
    classifier: Box<dyn Classifier>,
    calibration: Option<Calibration>,
    min_confidence: f64,
}

impl Localizer {
    pub fn new(classifier: Box<dyn Classifier>, min_confidence: f64) -> Self {
        Self {
            classifier,
            calibration: None,
            min_confidence,
        }
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn load_calibration(&mut self, path: &Path) -> Result<(), VisionError> {
        self.calibration = Some(Calibration::load(path)?);
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Classify the frame and project every confident detection into
    /// arm-space. Fails with `CalibrationMissing` before calibration is
    /// loaded.
    pub fn localize(&self, frame: &RgbaImage) -> Result<Detections, VisionError> {
        let calibration = self
            .calibration
            .as_ref()
            .ok_or(VisionError::CalibrationMissing)?
            .clone();

        let regions = self.classifier.infer(frame);
        Ok(Detections {
            regions,
            calibration,
            min_confidence: self.min_confidence,
            index: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Classifier that returns a fixed set of regions, ignoring the frame.
    struct FixedClassifier(Vec<LabeledRegion>);

    impl Classifier for FixedClassifier {
        fn infer(&self, _frame: &RgbaImage) -> Vec<LabeledRegion> {
            self.0.clone()
        }
    }

    fn identity_calibration() -> Calibration {
        Calibration {
            pixel_to_arm: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            surface_z: 0.0,
        }
    }

    fn region(color: PieceColor, x: f64, y: f64, confidence: f64) -> LabeledRegion {
        LabeledRegion {
            color,
            centroid: (x, y),
            area: 1600,
            confidence,
        }
    }

    #[test]
    fn test_uncalibrated_localize_fails() {
        let localizer = Localizer::new(Box::new(FixedClassifier(vec![])), 0.6);
        let frame = RgbaImage::new(8, 8);
        let err = localizer.localize(&frame).unwrap_err();
        assert!(matches!(err, VisionError::CalibrationMissing));
    }

    #[test]
    fn test_low_confidence_discarded() {
        // Confidence 0.4 against threshold 0.6: the piece never surfaces.
        let localizer = Localizer::new(
            Box::new(FixedClassifier(vec![region(PieceColor::Blue, 50.0, 50.0, 0.4)])),
            0.6,
        )
        .with_calibration(identity_calibration());

        let detections: Vec<_> = localizer.localize(&RgbaImage::new(8, 8)).unwrap().collect();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_confident_detection_projected() {
        let localizer = Localizer::new(
            Box::new(FixedClassifier(vec![region(PieceColor::Red, 120.0, 30.0, 0.9)])),
            0.6,
        )
        .with_calibration(Calibration {
            pixel_to_arm: [[0.5, 0.0, 10.0], [0.0, 0.5, -20.0]],
            surface_z: 15.0,
        });

        let detections: Vec<_> = localizer.localize(&RgbaImage::new(8, 8)).unwrap().collect();
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.color, PieceColor::Red);
        assert_eq!(d.world.x, 70.0);
        assert_eq!(d.world.y, -5.0);
        assert_eq!(d.world.z, 15.0);
    }

    #[test]
    fn test_detections_restart() {
        let localizer = Localizer::new(
            Box::new(FixedClassifier(vec![
                region(PieceColor::Blue, 10.0, 10.0, 0.9),
                region(PieceColor::Red, 90.0, 90.0, 0.9),
            ])),
            0.6,
        )
        .with_calibration(identity_calibration());

        let mut detections = localizer.localize(&RgbaImage::new(8, 8)).unwrap();
        // Stop consuming early, then restart from the top.
        let first = detections.next().unwrap();
        assert_eq!(first.color, PieceColor::Blue);

        detections.restart();
        assert_eq!(detections.count(), 2);
    }
}
