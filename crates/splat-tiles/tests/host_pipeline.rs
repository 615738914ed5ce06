//! Integration tests for the host pipeline: frame invariants and the sort
//! scenarios, with seeded random inputs.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splat_tiles::host::{
    bitonic, exclusive_scan, project_splats, Dispatch, HostBinner, HostRadixSorter, LaunchOrder,
};
use splat_tiles::{
    verify, BinnedFrame, BinningConfig, BinningError, CameraUniform, KeyLayout, KeyValue,
    RadixScheme, SortPath, SortStrategy, Splat,
};

// ============================================================================
// Scene builders
// ============================================================================

/// Random splats in a box in front of a camera at the origin looking down -Z.
fn random_scene(n: usize, seed: u64) -> Vec<Splat> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            Splat::new(
                [
                    rng.random_range(-8.0..8.0),
                    rng.random_range(-6.0..6.0),
                    rng.random_range(-60.0..-1.0),
                ],
                rng.random_range(0.01..0.6),
            )
        })
        .collect()
}

fn camera(width: u32, height: u32) -> CameraUniform {
    CameraUniform::look_at(Vec3::ZERO, Vec3::NEG_Z, 1.0, width, height, 0.5, 80.0, 16)
}

fn host_frame(splats: &[Splat], camera: &CameraUniform, config: BinningConfig) -> BinnedFrame {
    HostBinner::new(config)
        .unwrap()
        .run_frame(splats, camera)
        .unwrap()
}

// ============================================================================
// Frame invariants
// ============================================================================

#[test]
fn test_conservation_and_offsets() {
    let splats = random_scene(5_000, 11);
    let frame = host_frame(&splats, &camera(640, 480), BinningConfig::default());

    let fanouts: u64 = frame.projected.iter().map(|p| p.fanout as u64).sum();
    let counted: u64 = frame.counts.iter().map(|&c| c as u64).sum();
    assert_eq!(fanouts, counted);
    assert_eq!(counted, frame.stats.num_pairs as u64);
    assert!(frame.stats.num_pairs > 0);

    let last = frame.counts.len() - 1;
    assert_eq!(frame.offsets[last] + frame.counts[last], frame.stats.num_pairs);
    verify::check_offsets(&frame.counts, &frame.offsets, frame.stats.num_pairs).unwrap();
}

#[test]
fn test_buckets_hold_exactly_covering_splats() {
    let splats = random_scene(3_000, 12);
    let frame = host_frame(&splats, &camera(320, 240), BinningConfig::default());
    verify::check_buckets(&frame).unwrap();
    verify::check_sorted(&frame).unwrap();
}

#[test]
fn test_every_strategy_and_launch_order_agrees() {
    let splats = random_scene(4_000, 13);
    let cam = camera(480, 320);

    let mut reference: Option<BinnedFrame> = None;
    for sort in [
        SortStrategy::Radix,
        SortStrategy::RadixReduceScan,
        SortStrategy::Bitonic,
        SortStrategy::TileBitonic,
        SortStrategy::Auto,
    ] {
        for order in [
            LaunchOrder::InOrder,
            LaunchOrder::Reversed,
            LaunchOrder::Shuffled(99),
        ] {
            let config = BinningConfig {
                sort,
                workers: 4,
                ..Default::default()
            };
            let frame = HostBinner::new(config)
                .unwrap()
                .with_dispatch(Dispatch::new(4).with_order(order))
                .run_frame(&splats, &cam)
                .unwrap();
            verify::check_frame(&frame).unwrap();

            // Keys are a deterministic function of the scene; values within
            // equal keys may differ between runs
            match &reference {
                None => reference = Some(frame),
                Some(r) => {
                    assert_eq!(r.counts, frame.counts);
                    assert_eq!(r.offsets, frame.offsets);
                    let a: Vec<u32> = r.keys.iter().map(|kv| kv.key).collect();
                    let b: Vec<u32> = frame.keys.iter().map(|kv| kv.key).collect();
                    assert_eq!(a, b);
                }
            }
        }
    }
}

#[test]
fn test_tile_boundaries_survive_the_sort() {
    let splats = random_scene(2_000, 14);
    let frame = host_frame(&splats, &camera(320, 240), BinningConfig::default());
    for t in 0..frame.grid.num_tiles() {
        for kv in frame.tile(t) {
            assert_eq!(frame.layout.tile_of(kv.key), t);
        }
    }
}

#[test]
fn test_tile_walk_is_front_to_back() {
    let splats = random_scene(2_000, 15);
    let frame = host_frame(&splats, &camera(320, 240), BinningConfig::default());
    for t in 0..frame.grid.num_tiles() {
        let depths: Vec<f32> = frame
            .tile(t)
            .iter()
            .map(|kv| frame.projected[kv.value as usize].depth)
            .collect();
        for w in depths.windows(2) {
            // Equal quantized depth may reorder nearly equal depths
            let slack = 80.0 / frame.layout.depth_max() as f32;
            assert!(w[0] <= w[1] + slack, "tile {t}: {} after {}", w[1], w[0]);
        }
    }
}

#[test]
fn test_depth_range_matches_visible_splats() {
    let splats = random_scene(1_000, 16);
    let frame = host_frame(&splats, &camera(320, 240), BinningConfig::default());
    let (near, far) = frame.stats.depth_range().unwrap();
    let visible: Vec<f32> = frame
        .projected
        .iter()
        .filter(|p| p.is_visible())
        .map(|p| p.depth)
        .collect();
    assert_eq!(visible.len() as u32, frame.stats.num_visible);
    assert_eq!(near, visible.iter().cloned().fold(f32::INFINITY, f32::min));
    assert_eq!(far, visible.iter().cloned().fold(f32::NEG_INFINITY, f32::max));
}

#[test]
fn test_resort_is_noop() {
    let splats = random_scene(2_000, 17);
    let config = BinningConfig::default();
    let binner = HostBinner::new(config).unwrap();
    let frame = binner.run_frame(&splats, &camera(320, 240)).unwrap();

    let mut again = frame.keys.clone();
    binner
        .sort(
            &mut again,
            &frame.offsets,
            &frame.counts,
            frame.layout.key_bits(),
            SortPath::Radix,
        )
        .unwrap();
    assert_eq!(again, frame.keys);

    binner
        .sort(
            &mut again,
            &frame.offsets,
            &frame.counts,
            frame.layout.key_bits(),
            SortPath::TileBitonic,
        )
        .unwrap();
    assert_eq!(again, frame.keys);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_four_tile_scenario() {
    let counts = [3, 0, 2, 1];
    let (offsets, total) = exclusive_scan(&Dispatch::new(2), &counts);
    assert_eq!(offsets, vec![0, 3, 3, 5]);
    assert_eq!(total, 6);

    // Six pairs scattered into their buckets with depths out of order
    let layout = KeyLayout::for_tiles(4);
    let pairs = [
        (0, 900, 0),
        (0, 100, 1),
        (0, 500, 2),
        (2, 70, 3),
        (2, 10, 4),
        (3, 42, 5),
    ];
    let written: Vec<KeyValue> = pairs
        .iter()
        .map(|&(tile, depth, id)| KeyValue::new(layout.compose(tile, depth), id))
        .collect();

    let expected_ids = [1, 2, 0, 4, 3, 5];

    let mut radix = written.clone();
    HostRadixSorter::new(Dispatch::new(2), 8).sort(&mut radix, layout.key_bits());
    let ids: Vec<u32> = radix.iter().map(|kv| kv.value).collect();
    assert_eq!(ids, expected_ids);

    let mut tiled = written;
    bitonic::sort_tiles(&Dispatch::new(2), &mut tiled, &offsets, &counts).unwrap();
    assert_eq!(tiled, radix);
}

/// 32x32 viewport at 16px tiles: a 2x2 grid, 90 degree field of view.
fn four_tile_camera() -> CameraUniform {
    CameraUniform::look_at(
        Vec3::ZERO,
        Vec3::NEG_Z,
        std::f32::consts::FRAC_PI_2,
        32,
        32,
        0.5,
        80.0,
        16,
    )
}

/// Point-sized splats at tile centres: three in tile 0, two in tile 2, one
/// in tile 3, each tile's depths out of order.
fn four_tile_splats() -> Vec<Splat> {
    // (x side, y side, depth); +y is the top row
    let at = |sx: f32, sy: f32, depth: f32| {
        Splat::new([sx * 0.5 * depth, sy * 0.5 * depth, -depth], 0.01)
    };
    vec![
        at(-1.0, 1.0, 9.0),
        at(-1.0, 1.0, 1.0),
        at(-1.0, 1.0, 5.0),
        at(-1.0, -1.0, 7.0),
        at(-1.0, -1.0, 2.0),
        at(1.0, -1.0, 4.0),
    ]
}

#[test]
fn test_four_tile_scenario_through_pipeline() {
    let splats = four_tile_splats();
    let cam = four_tile_camera();
    for sort in [
        SortStrategy::Radix,
        SortStrategy::RadixReduceScan,
        SortStrategy::Bitonic,
        SortStrategy::TileBitonic,
    ] {
        let config = BinningConfig {
            sort,
            workers: 3,
            check_bounds: true,
            ..Default::default()
        };
        let frame = host_frame(&splats, &cam, config);
        assert_eq!(frame.counts, vec![3, 0, 2, 1], "{sort:?}");
        assert_eq!(frame.offsets, vec![0, 3, 3, 5], "{sort:?}");
        assert_eq!(frame.stats.num_pairs, 6);

        let ids: Vec<u32> = frame.keys.iter().map(|kv| kv.value).collect();
        assert_eq!(ids, vec![1, 2, 0, 4, 3, 5], "{sort:?}");
        let tiles: Vec<u32> = frame
            .keys
            .iter()
            .map(|kv| frame.layout.tile_of(kv.key))
            .collect();
        assert_eq!(tiles, vec![0, 0, 0, 2, 2, 3], "{sort:?}");
        verify::check_frame(&frame).unwrap();
    }
}

#[test]
fn test_undersized_pair_capacity_is_reported() {
    let mut config = BinningConfig::default();
    config.capacity.max_pairs = 5;
    let err = HostBinner::new(config)
        .unwrap()
        .run_frame(&four_tile_splats(), &four_tile_camera())
        .unwrap_err();
    assert!(
        matches!(err, BinningError::CapacityExceeded { required: 6, capacity: 5 }),
        "{err:?}"
    );
}

#[test]
#[cfg_attr(
    debug_assertions,
    should_panic(expected = "key writer left its tile bucket")
)]
fn test_key_writer_overcount_is_reported() {
    let cam = four_tile_camera();
    let config = BinningConfig {
        check_bounds: true,
        workers: 2,
        ..Default::default()
    };
    let binner = HostBinner::new(config).unwrap();
    let layout = cam.grid().key_layout();
    let mut projection = project_splats(&Dispatch::new(2), &four_tile_splats(), &cam, &layout, 32);

    // Tile 0 now reserves two slots for three splats
    projection.counts[0] -= 1;
    projection.stats.num_pairs -= 1;

    let err = binner.run_projected(projection, &cam).unwrap_err();
    assert!(matches!(err, BinningError::Inconsistent(_)), "{err:?}");
}

#[test]
fn test_projection_with_wrong_totals_is_rejected() {
    let cam = four_tile_camera();
    let binner = HostBinner::new(BinningConfig::default()).unwrap();
    let layout = cam.grid().key_layout();
    let mut projection = project_splats(&Dispatch::new(2), &four_tile_splats(), &cam, &layout, 32);
    projection.stats.num_pairs += 1;
    assert!(matches!(
        binner.run_projected(projection, &cam),
        Err(BinningError::Inconsistent(_))
    ));
}

#[test]
fn test_camera_tile_size_must_match_config() {
    let splats = random_scene(100, 19);
    let binner = HostBinner::new(BinningConfig::default()).unwrap();
    let eight_px = CameraUniform::look_at(Vec3::ZERO, Vec3::NEG_Z, 1.0, 640, 480, 0.5, 80.0, 8);
    assert!(matches!(
        binner.run_frame(&splats, &eight_px),
        Err(BinningError::InvalidConfig(_))
    ));

    let zero = CameraUniform::look_at(Vec3::ZERO, Vec3::NEG_Z, 1.0, 640, 480, 0.5, 80.0, 0);
    assert!(matches!(
        binner.run_frame(&splats, &zero),
        Err(BinningError::InvalidConfig(_))
    ));
}

#[test]
fn test_single_tile_bitonic_matches_stable_sort() {
    let mut rng = StdRng::seed_from_u64(256);
    let layout = KeyLayout::for_tiles(1);
    // Narrow depth range forces duplicates
    let input: Vec<KeyValue> = (0..256)
        .map(|i| KeyValue::new(layout.compose(0, rng.random_range(0..64)), i))
        .collect();

    let mut sorted = input.clone();
    bitonic::sort_segment(&mut sorted).unwrap();
    verify::check_stable_sort(&input, &sorted).unwrap();
}

#[test]
fn test_single_tile_scene_through_pipeline() {
    // A 16x16 viewport is one tile, so every visible splat lands there
    let splats = random_scene(256, 18);
    let config = BinningConfig {
        sort: SortStrategy::Bitonic,
        ..Default::default()
    };
    let frame = host_frame(&splats, &camera(16, 16), config);
    assert_eq!(frame.grid.num_tiles(), 1);
    assert_eq!(frame.stats.num_pairs, frame.stats.num_visible);
    assert_eq!(frame.sort_path, SortPath::Bitonic);
    verify::check_frame(&frame).unwrap();
}

#[test]
fn test_radix_million_pairs_any_launch_order() {
    let mut rng = StdRng::seed_from_u64(1 << 20);
    let input: Vec<KeyValue> = (0..1u32 << 20)
        .map(|i| KeyValue::new(rng.random(), i))
        .collect();

    let mut in_order = input.clone();
    HostRadixSorter::new(Dispatch::new(8), 8).sort(&mut in_order, 32);
    verify::check_stable_sort(&input, &in_order).unwrap();

    let mut permuted = input;
    HostRadixSorter::new(
        Dispatch::new(8).with_order(LaunchOrder::Shuffled(0x5eed)),
        8,
    )
    .sort(&mut permuted, 32);
    assert_eq!(permuted, in_order);
}

#[test]
fn test_reduce_scan_radix_matches_lookback_on_million_pairs() {
    let mut rng = StdRng::seed_from_u64(0x2020);
    let input: Vec<KeyValue> = (0..1u32 << 20)
        .map(|i| KeyValue::new(rng.random(), i))
        .collect();

    let mut lookback = input.clone();
    HostRadixSorter::new(Dispatch::new(8), 8).sort(&mut lookback, 32);

    let mut reduce_scan = input.clone();
    HostRadixSorter::new(
        Dispatch::new(8).with_order(LaunchOrder::Shuffled(7)),
        8,
    )
    .with_scheme(RadixScheme::ReduceScan)
    .sort(&mut reduce_scan, 32);

    assert_eq!(reduce_scan, lookback);
    verify::check_stable_sort(&input, &reduce_scan).unwrap();
}

#[test]
fn test_footprint_is_clamped() {
    // A huge splat right in front of the camera covers the whole screen
    let splats = vec![Splat::new([0.0, 0.0, -2.0], 50.0)];
    let config = BinningConfig {
        max_footprint: 4,
        ..Default::default()
    };
    let frame = host_frame(&splats, &camera(640, 480), config);
    let [x0, y0, x1, y1] = frame.projected[0].rect;
    assert_eq!(x1 - x0 + 1, 4);
    assert_eq!(y1 - y0 + 1, 4);
    assert_eq!(frame.stats.num_pairs, 16);
    verify::check_frame(&frame).unwrap();
}

#[test]
fn test_culled_splats_produce_no_pairs() {
    let splats = vec![
        // Behind the camera
        Splat::new([0.0, 0.0, 5.0], 1.0),
        // Past the far plane
        Splat::new([0.0, 0.0, -500.0], 1.0),
        // Off screen to the left
        Splat::new([-500.0, 0.0, -10.0], 0.5),
        // Non-finite
        Splat::new([f32::NAN, 0.0, -10.0], 0.5),
        Splat::new([0.0, 0.0, -10.0], f32::INFINITY),
        // Negative radius
        Splat::new([0.0, 0.0, -10.0], -1.0),
    ];
    let frame = host_frame(&splats, &camera(320, 240), BinningConfig::default());
    assert_eq!(frame.stats.num_pairs, 0);
    assert_eq!(frame.stats.num_visible, 0);
    assert!(frame.projected.iter().all(|p| !p.is_visible()));
    assert_eq!(frame.sort_path, SortPath::Skipped);
}
