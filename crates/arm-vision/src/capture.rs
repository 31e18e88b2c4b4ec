use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Source of camera frames. Implementations block; the capture loop runs
/// them on a blocking thread.
pub trait FrameSource: Send {
    fn grab(&mut self) -> anyhow::Result<RgbaImage>;
}

/// Status of the capture pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub is_capturing: bool,
    pub fps: f64,
    pub last_frame_ms: Option<u64>,
    pub resolution: Option<(u32, u32)>,
}

/// The capture loop that runs as a background task. Publishes the latest
/// frame through the watch channel and status updates alongside.
pub async fn capture_loop<S: FrameSource + 'static>(
    mut source: S,
    frame_tx: watch::Sender<Option<Arc<RgbaImage>>>,
    status_tx: watch::Sender<CaptureStatus>,
    capture_interval: Duration,
    stop: Arc<AtomicBool>,
) {
    info!("capture loop started, interval: {:?}", capture_interval);

    let mut frame_count = 0u64;
    let mut fps_timer = Instant::now();

    loop {
        if stop.load(Ordering::Relaxed) {
            info!("capture loop stopping (stop signal received)");
            break;
        }

        let grab_start = Instant::now();

        // Grab on a blocking thread; the source moves in and back out.
        let result = tokio::task::spawn_blocking(move || {
            let frame = source.grab();
            (frame, source)
        })
        .await;

        let (frame, returned) = match result {
            Ok(v) => v,
            Err(e) => {
                warn!("capture task panicked: {}", e);
                break;
            }
        };
        source = returned;

        match frame {
            Ok(frame) => {
                let resolution = (frame.width(), frame.height());
                frame_count += 1;

                let elapsed = fps_timer.elapsed().as_secs_f64();
                let fps = if elapsed > 0.0 {
                    frame_count as f64 / elapsed
                } else {
                    0.0
                };
                if elapsed > 5.0 {
                    frame_count = 0;
                    fps_timer = Instant::now();
                }

                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;

                let _ = status_tx.send(CaptureStatus {
                    is_capturing: true,
                    fps,
                    last_frame_ms: Some(now),
                    resolution: Some(resolution),
                });
                let _ = frame_tx.send(Some(Arc::new(frame)));
            }
            Err(e) => {
                warn!("capture failed: {}", e);
                let _ = status_tx.send(CaptureStatus::default());
            }
        }

        let elapsed = grab_start.elapsed();
        if elapsed < capture_interval {
            tokio::time::sleep(capture_interval - elapsed).await;
        } else {
            // Yield to prevent a busy loop when grabs run long.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    let _ = status_tx.send(CaptureStatus::default());
    info!("capture loop stopped");
}

/// Frame source backed by the Pi camera via the `rpicam-still` CLI.
/// Falls back gracefully when the tool is not installed.
pub struct StillCameraSource {
    output: PathBuf,
    available: bool,
}

impl StillCameraSource {
    pub fn new() -> Self {
        let available = check_rpicam();
        if available {
            debug!("rpicam-still available");
        } else {
            warn!("rpicam-still not found; camera capture disabled");
        }
        let dir = std::env::temp_dir().join("tictac_arm_capture");
        let _ = std::fs::create_dir_all(&dir);
        Self {
            output: dir.join("frame.png"),
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }
}

impl Default for StillCameraSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for StillCameraSource {
    fn grab(&mut self) -> anyhow::Result<RgbaImage> {
        use anyhow::Context;

        if !self.available {
            anyhow::bail!("rpicam-still is not installed");
        }

        let status = Command::new("rpicam-still")
            .arg("--nopreview")
            .arg("--immediate")
            .arg("-o")
            .arg(&self.output)
            .status()
            .context("failed to run rpicam-still")?;
        if !status.success() {
            anyhow::bail!("rpicam-still exited with {}", status);
        }

        let img = image::open(&self.output)
            .with_context(|| format!("failed to open {}", self.output.display()))?;
        Ok(img.to_rgba8())
    }
}

fn check_rpicam() -> bool {
    Command::new("rpicam-still")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Frame source that cycles through saved images in a directory. Used for
/// bench runs without a camera.
pub struct ReplaySource {
    paths: Vec<PathBuf>,
    index: usize,
}

impl ReplaySource {
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png") | Some("jpg") | Some("jpeg")
                )
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("no images found in {}", dir.display());
        }
        info!("replay source: {} frame(s) from {}", paths.len(), dir.display());
        Ok(Self { paths, index: 0 })
    }
}

impl FrameSource for ReplaySource {
    fn grab(&mut self) -> anyhow::Result<RgbaImage> {
        use anyhow::Context;

        let path = &self.paths[self.index % self.paths.len()];
        self.index += 1;
        let img = image::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(img.to_rgba8())
    }
}
