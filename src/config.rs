use anyhow::{Context, Result};
use arm_game::SessionConfig;
use arm_kinematics::{ArmGeometry, JointLimits};
use arm_link::LinkConfig;
use arm_motion::MotionConfig;
use arm_vision::{default_classes, ColorClass};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Everything the binary needs to run a session, loaded from one JSON file.
/// Missing fields fall back to the bench defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub geometry: ArmGeometry,
    pub limits: JointLimits,
    pub motion: MotionConfig,
    pub link: LinkConfig,
    pub session: SessionConfig,
    pub vision: VisionSettings,
    /// Relay server address, host:port.
    pub server_addr: String,
    pub calibration_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            geometry: ArmGeometry::default(),
            limits: JointLimits::default(),
            motion: MotionConfig::default(),
            link: LinkConfig::default(),
            session: SessionConfig::default(),
            vision: VisionSettings::default(),
            server_addr: "127.0.0.1:9000".into(),
            calibration_path: PathBuf::from("calibration.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Detections below this confidence are discarded.
    pub min_confidence: f64,
    /// Pixel sampling stride for the color classifier.
    pub sample_step: u32,
    /// Smallest blob, in full-resolution pixels, treated as a piece.
    pub min_area: u32,
    pub capture_interval_ms: u64,
    pub classes: Vec<ColorClass>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            sample_step: 4,
            min_area: 500,
            capture_interval_ms: 500,
            classes: default_classes(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Load the config if the file exists, otherwise run on defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vision.min_confidence) {
            anyhow::bail!("vision.min_confidence must be in [0, 1]");
        }
        if self.motion.max_delta_per_tick <= 0.0 {
            anyhow::bail!("motion.max_delta_per_tick must be positive");
        }
        if self.motion.tick_period.is_zero() {
            anyhow::bail!("motion.tick_period must be positive");
        }
        if self.link.retry_budget == 0 {
            anyhow::bail!("link.retry_budget must be at least 1");
        }
        if self.session.rack_slots == 0 {
            anyhow::bail!("session.rack_slots must be at least 1");
        }
        if self.session.recovery_budget == 0 {
            anyhow::bail!("session.recovery_budget must be at least 1");
        }
        if self
            .limits
            .violation(&self.session.home)
            .is_some()
        {
            anyhow::bail!("session.home violates the joint limits");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_or_default_without_file() {
        let config = AppConfig::load_or_default(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(back.server_addr, config.server_addr);
        assert_eq!(back.vision.classes.len(), config.vision.classes.len());
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let mut config = AppConfig::default();
        config.vision.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_home_outside_limits_rejected() {
        let mut config = AppConfig::default();
        config.session.home.0[0] = 300.0;
        assert!(config.validate().is_err());
    }
}
