//! CLI tool to run a saved board photo through the localizer.
//! Usage: cargo run --bin scan_frame --features cli -- <photo.png> [calibration.json]

use arm_vision::{ColorClassifier, Localizer};
use std::path::PathBuf;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <photo.png> [calibration.json]", args[0]);
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    println!("Loading image: {}", input_path.display());
    let img = image::open(&input_path)
        .expect("failed to open image")
        .to_rgba8();
    println!("Image size: {}x{}", img.width(), img.height());

    let mut localizer = Localizer::new(Box::new(ColorClassifier::default()), 0.6);
    if args.len() >= 3 {
        let cal_path = PathBuf::from(&args[2]);
        localizer
            .load_calibration(&cal_path)
            .expect("failed to load calibration");
    } else {
        // Without a calibration file, report pixel coordinates only.
        localizer = localizer.with_calibration(arm_vision::Calibration {
            pixel_to_arm: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            surface_z: 0.0,
        });
        println!("No calibration given; arm-space equals pixel-space.");
    }

    println!("\n=== Detections ===");
    let detections = localizer.localize(&img).expect("localize failed");
    let mut count = 0;
    for d in detections {
        count += 1;
        println!(
            "{}: pixel ({:.0}, {:.0}) -> arm ({:.1}, {:.1}, {:.1}) confidence {:.2}",
            d.color, d.pixel.0, d.pixel.1, d.world.x, d.world.y, d.world.z, d.confidence
        );
    }
    if count == 0 {
        println!("No pieces detected.");
    }
}
