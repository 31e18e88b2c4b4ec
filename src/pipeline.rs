use crate::config::AppConfig;
use arm_motion::{spawn_motion_task, MotionController, MotionHandle, ServoDriver};
use arm_vision::{
    capture_loop, CaptureStatus, ColorClassifier, FrameSource, Localizer, VisionError,
};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Owns the background tasks every CLI mode shares: the capture loop
/// publishing frames and the motion task owning the servo driver.
pub struct Pipeline {
    stop: Arc<AtomicBool>,
    frame_rx: watch::Receiver<Option<Arc<RgbaImage>>>,
    status_rx: watch::Receiver<CaptureStatus>,
    motion: MotionHandle,
}

impl Pipeline {
    pub fn start<S: FrameSource + 'static>(
        source: S,
        driver: Box<dyn ServoDriver>,
        config: &AppConfig,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(CaptureStatus::default());

        tokio::spawn(capture_loop(
            source,
            frame_tx,
            status_tx,
            Duration::from_millis(config.vision.capture_interval_ms),
            stop.clone(),
        ));

        let controller =
            MotionController::new(config.motion, config.limits, config.session.home);
        let motion = spawn_motion_task(controller, driver, 16);

        info!("pipeline started");
        Self {
            stop,
            frame_rx,
            status_rx,
            motion,
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        info!("pipeline stop requested");
    }

    pub fn frames(&self) -> watch::Receiver<Option<Arc<RgbaImage>>> {
        self.frame_rx.clone()
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.status_rx.borrow().clone()
    }

    /// Latest captured frame, if the camera has produced one yet.
    pub fn latest_frame(&self) -> Option<Arc<RgbaImage>> {
        self.frame_rx.borrow().clone()
    }

    pub fn motion(&self) -> MotionHandle {
        self.motion.clone()
    }
}

/// Build the localizer from the vision settings and the calibration file.
pub fn build_localizer(config: &AppConfig) -> Result<Localizer, VisionError> {
    let classifier = ColorClassifier::new(
        config.vision.classes.clone(),
        config.vision.sample_step,
        config.vision.min_area,
    );
    let mut localizer = Localizer::new(Box::new(classifier), config.vision.min_confidence);
    localizer.load_calibration(&config.calibration_path)?;
    Ok(localizer)
}
