use anyhow::{Context, Result};
use arm_game::{Board, Coordinator};
use arm_kinematics::{Joint, Solver};
use arm_link::LinkTransport;
use arm_motion::{
    spawn_motion_task, CommandStatus, MotionController, ServoDriver, SimulatedDriver,
};
use arm_vision::{ReplaySource, StillCameraSource};
use std::path::{Path, PathBuf};
use tictac_arm::{build_localizer, AppConfig, Pipeline};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tictac_arm=info,arm_motion=info,arm_vision=info,arm_link=info,arm_game=info"
                    .into()
            }),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut mode = String::from("play");
    let mut config_path = PathBuf::from("tictac-arm.json");
    let mut replay: Option<PathBuf> = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "play" | "calibrate" | "scan" => mode = arg.clone(),
            "--config" => {
                config_path = iter.next().context("--config needs a path")?.into();
            }
            "--replay" => {
                replay = Some(iter.next().context("--replay needs a directory")?.into());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Usage: tictac-arm [play|calibrate|scan] [--config <path>] [--replay <dir>]");
                std::process::exit(2);
            }
        }
    }

    let config = AppConfig::load_or_default(&config_path)?;

    match mode.as_str() {
        "play" => play(&config, replay.as_deref()).await,
        "calibrate" => calibrate(&config).await,
        "scan" => scan(&config, replay.as_deref()).await,
        _ => unreachable!(),
    }
}

fn start_pipeline(config: &AppConfig, replay: Option<&Path>) -> Result<Pipeline> {
    // The hardware PWM board attaches at the ServoDriver boundary; bench
    // runs use the simulated driver.
    let driver: Box<dyn ServoDriver> = Box::new(SimulatedDriver::new());
    Ok(match replay {
        Some(dir) => Pipeline::start(ReplaySource::from_dir(dir)?, driver, config),
        None => Pipeline::start(StillCameraSource::new(), driver, config),
    })
}

/// Connect to the relay server and run a full game session.
async fn play(config: &AppConfig, replay: Option<&Path>) -> Result<()> {
    let localizer = build_localizer(config).context("a calibration file is required to play")?;
    let pipeline = start_pipeline(config, replay)?;

    let stream = tokio::net::TcpStream::connect(&config.server_addr)
        .await
        .with_context(|| format!("failed to connect to relay server {}", config.server_addr))?;
    info!("connected to relay server {}", config.server_addr);
    let link = LinkTransport::new(stream, config.link);

    let solver = Solver::new(config.geometry, config.limits);
    let mut coordinator = Coordinator::new(
        link,
        pipeline.motion(),
        localizer,
        pipeline.frames(),
        solver,
        config.session.clone(),
    );

    let status = coordinator.run().await?;
    println!("{}", coordinator.board().render());
    println!("Game over: {:?}", status);

    pipeline.stop();
    Ok(())
}

/// Sweep every joint through its range, then return home. Bench check for
/// servo wiring and limits.
async fn calibrate(config: &AppConfig) -> Result<()> {
    let controller = MotionController::new(config.motion, config.limits, config.session.home);
    let motion = spawn_motion_task(controller, Box::new(SimulatedDriver::new()), 16);

    for &joint in &Joint::ALL {
        let limit = config.limits.get(joint);
        println!(
            "Testing {:?} ({:.0}° .. {:.0}°)...",
            joint, limit.min_deg, limit.max_deg
        );
        let mut pose = motion.current().await?;
        let mid = (limit.min_deg + limit.max_deg) / 2.0;
        for angle in [limit.min_deg, limit.max_deg, mid] {
            pose.set(joint, angle);
            let status = motion.run(pose, config.session.move_duration).await?;
            if status != CommandStatus::Done {
                anyhow::bail!("{:?} sweep ended {:?}", joint, status);
            }
        }
    }

    motion
        .run(config.session.home, config.session.move_duration)
        .await?;
    println!("Servo calibration complete, arm at home.");
    Ok(())
}

/// Capture one frame, localize the pieces, and print the observed board.
async fn scan(config: &AppConfig, replay: Option<&Path>) -> Result<()> {
    let localizer = build_localizer(config)?;
    let pipeline = start_pipeline(config, replay)?;

    let mut frames = pipeline.frames();
    let first_frame = async {
        loop {
            if let Some(frame) = pipeline.latest_frame() {
                break Ok::<_, anyhow::Error>(frame);
            }
            frames
                .changed()
                .await
                .map_err(|_| anyhow::anyhow!("capture loop stopped before producing a frame"))?;
        }
    };
    let frame = tokio::time::timeout(std::time::Duration::from_secs(10), first_frame)
        .await
        .context("no frame captured within 10 seconds")??;

    let detections = localizer.localize(&frame)?;
    let board = Board::from_detections(detections, &config.session.board);
    println!("{}", board.render());

    pipeline.stop();
    Ok(())
}
