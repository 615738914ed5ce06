//! Synthetic scenes for benchmarking and verification.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splat_tiles::{CameraUniform, KeyValue, Splat};

use crate::config::SceneConfig;

const HALF_EXTENT: f32 = 20.0;

/// Uniformly scattered splats in a cube around the origin.
pub fn random_splats(scene: &SceneConfig) -> Vec<Splat> {
    let mut rng = StdRng::seed_from_u64(scene.seed);
    (0..scene.splats)
        .map(|_| {
            Splat::new(
                [
                    rng.random_range(-HALF_EXTENT..HALF_EXTENT),
                    rng.random_range(-HALF_EXTENT * 0.6..HALF_EXTENT * 0.6),
                    rng.random_range(-HALF_EXTENT..HALF_EXTENT),
                ],
                rng.random_range(0.02..0.4),
            )
        })
        .collect()
}

/// Camera `frame` steps along an orbit around the scene.
pub fn orbit_camera(scene: &SceneConfig, tile_size: u32, frame: u32) -> CameraUniform {
    let angle = frame as f32 * 0.05;
    let eye = Vec3::new(angle.sin(), 0.15, angle.cos()) * HALF_EXTENT * 2.0;
    CameraUniform::look_at(
        eye,
        Vec3::ZERO,
        0.9,
        scene.width,
        scene.height,
        0.1,
        HALF_EXTENT * 5.0,
        tile_size,
    )
}

/// `count` pairs with random keys below `2^key_bits`.
pub fn random_pairs(count: u32, key_bits: u32, seed: u64) -> Vec<KeyValue> {
    let mut rng = StdRng::seed_from_u64(seed);
    let max = if key_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << key_bits) - 1
    };
    (0..count)
        .map(|i| KeyValue::new(rng.random_range(0..=max), i))
        .collect()
}
