use crate::VisionError;
use arm_kinematics::Point3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Pixel-space to arm-space mapping, established once during bench setup
/// and immutable for the rest of the session.
///
/// The camera looks at the board plane from a fixed mount, so a 2D affine
/// transform onto the plane plus the plane's height is sufficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibration {
    /// Row-major 2x3 affine: arm = M * [px, py, 1].
    pub pixel_to_arm: [[f64; 3]; 2],
    /// Height of the board surface in arm-space, millimeters.
    pub surface_z: f64,
}

impl Calibration {
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            VisionError::CalibrationRead {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let cal: Calibration =
            serde_json::from_str(&content).map_err(|source| VisionError::CalibrationParse {
                path: path.to_path_buf(),
                source,
            })?;
        info!("calibration loaded from {}", path.display());
        Ok(cal)
    }

    pub fn save(&self, path: &Path) -> Result<(), VisionError> {
        let content = serde_json::to_string_pretty(self).expect("calibration serializes");
        std::fs::write(path, content).map_err(|source| VisionError::CalibrationWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!("calibration saved to {}", path.display());
        Ok(())
    }

    /// Map a pixel centroid onto the board plane in arm-space.
    pub fn project(&self, px: f64, py: f64) -> Point3 {
        let m = &self.pixel_to_arm;
        Point3::new(
            m[0][0] * px + m[0][1] * py + m[0][2],
            m[1][0] * px + m[1][1] * py + m[1][2],
            self.surface_z,
        )
    }
}
