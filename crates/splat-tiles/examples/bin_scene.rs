//! Bin a synthetic splat cloud on the GPU and print per-frame stats.
//!
//! Run with: cargo run --example bin_scene

use std::time::Instant;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splat_tiles::{verify, BinningConfig, CameraUniform, Splat, TileBinner};

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let splat_count = 200_000;
    let (width, height) = (1280, 720);

    println!("Generating {} splats...", splat_count);
    let mut rng = StdRng::seed_from_u64(42);
    let splats: Vec<Splat> = (0..splat_count)
        .map(|_| {
            Splat::new(
                [
                    rng.random_range(-20.0..20.0),
                    rng.random_range(-12.0..12.0),
                    rng.random_range(-20.0..20.0),
                ],
                rng.random_range(0.02..0.3),
            )
        })
        .collect();

    let mut binner = pollster::block_on(TileBinner::new(BinningConfig::default()))
        .expect("Failed to create tile binner");
    binner.upload_splats(&splats).expect("Failed to upload splats");

    println!("Orbiting camera over {} frames...", 60);
    let start = Instant::now();
    for frame in 0..60 {
        let angle = frame as f32 * 0.05;
        let eye = Vec3::new(angle.sin() * 40.0, 5.0, angle.cos() * 40.0);
        let camera = CameraUniform::look_at(eye, Vec3::ZERO, 0.9, width, height, 0.1, 100.0, 16);

        let stats = binner.run_frame(&camera).expect("Frame failed");
        if frame % 10 == 0 {
            println!(
                "Frame {}: {} visible, {} pairs, largest tile {}",
                frame, stats.num_visible, stats.num_pairs, stats.max_tile_count
            );
        }
    }
    let elapsed = start.elapsed();
    println!(
        "\nCompleted 60 frames in {:.2?} ({:.2} ms/frame)",
        elapsed,
        elapsed.as_secs_f64() * 1000.0 / 60.0
    );

    let frame = binner.read_frame_blocking().expect("Readback failed");
    match verify::check_frame(&frame) {
        Ok(()) => println!("Last frame passed every invariant check"),
        Err(e) => println!("Last frame failed verification: {}", e),
    }
}
