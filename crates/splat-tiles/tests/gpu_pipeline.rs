//! Device tests. Each one skips with a log line when no adapter is available.

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splat_tiles::{
    verify, BinningConfig, BinningError, CameraUniform, GpuBitonicSorter, GpuContext,
    GpuRadixSorter, KeyValue, RadixScheme, SortPath, SortStrategy, Splat, TileBinner,
    MAX_PAIR_CAPACITY,
};

fn gpu() -> Option<GpuContext> {
    match pollster::block_on(GpuContext::new()) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping device test: {e}");
            None
        }
    }
}

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

fn random_pairs(n: u32, seed: u64) -> Vec<KeyValue> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|i| KeyValue::new(rng.random(), i)).collect()
}

#[test]
fn test_device_frame_passes_every_check() {
    let Some(ctx) = gpu() else { return };
    let config = BinningConfig {
        check_bounds: true,
        ..Default::default()
    };
    let mut binner = TileBinner::with_context(ctx, config).unwrap();
    binner.upload_splats(&random_scene(20_000, 1)).unwrap();

    let stats = binner.run_frame(&camera(640, 480)).unwrap();
    let frame = binner.read_frame_blocking().unwrap();
    assert_eq!(frame.stats, stats);
    assert_eq!(frame.sort_path, SortPath::Radix);
    verify::check_frame(&frame).unwrap();
}

#[test]
fn test_device_strategies() {
    for (sort, expected) in [
        (SortStrategy::Radix, SortPath::Radix),
        (SortStrategy::RadixReduceScan, SortPath::RadixReduceScan),
        (SortStrategy::TileBitonic, SortPath::TileBitonic),
    ] {
        let Some(ctx) = gpu() else { return };
        let config = BinningConfig {
            sort,
            ..Default::default()
        };
        let mut binner = TileBinner::with_context(ctx, config).unwrap();
        binner.upload_splats(&random_scene(300, 2)).unwrap();
        binner.run_frame(&camera(320, 240)).unwrap();
        let frame = binner.read_frame_blocking().unwrap();
        assert_eq!(frame.sort_path, expected);
        verify::check_frame(&frame).unwrap();
    }
}

#[test]
fn test_device_single_tile_bitonic() {
    let Some(ctx) = gpu() else { return };
    let config = BinningConfig {
        sort: SortStrategy::Bitonic,
        ..Default::default()
    };
    let mut binner = TileBinner::with_context(ctx, config).unwrap();
    binner.upload_splats(&random_scene(256, 3)).unwrap();
    let stats = binner.run_frame(&camera(16, 16)).unwrap();
    assert_eq!(stats.num_pairs, stats.num_visible);

    let frame = binner.read_frame_blocking().unwrap();
    assert_eq!(frame.sort_path, SortPath::Bitonic);
    verify::check_frame(&frame).unwrap();
}

#[test]
fn test_device_capacity_exceeded_then_resize() {
    let Some(ctx) = gpu() else { return };
    let mut config = BinningConfig::default();
    config.capacity.max_pairs = 64;
    let mut binner = TileBinner::with_context(ctx, config).unwrap();
    binner.upload_splats(&random_scene(2_000, 4)).unwrap();

    let err = binner.run_frame(&camera(320, 240)).unwrap_err();
    let BinningError::CapacityExceeded { required, capacity } = err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(capacity, 64);
    assert!(matches!(
        binner.read_frame_blocking(),
        Err(BinningError::NotInitialized)
    ));

    let grown = binner.config().capacity.grown_to(required);
    binner.resize(grown).unwrap();
    let stats = binner.run_frame(&camera(320, 240)).unwrap();
    assert_eq!(stats.num_pairs as u64, required);
    verify::check_frame(&binner.read_frame_blocking().unwrap()).unwrap();
}

#[test]
fn test_device_rejects_oversized_inputs() {
    let Some(ctx) = gpu() else { return };
    let mut config = BinningConfig::default();
    config.capacity.max_primitives = 8;
    config.capacity.max_tiles = 100;
    let mut binner = TileBinner::with_context(ctx, config).unwrap();

    assert!(matches!(
        binner.upload_splats(&random_scene(9, 5)),
        Err(BinningError::TooManyPrimitives { count: 9, capacity: 8 })
    ));
    assert!(matches!(
        binner.run_frame(&camera(320, 240)),
        Err(BinningError::TooManyTiles { tiles: 300, capacity: 100 })
    ));
}

#[test]
fn test_device_radix_million_pairs() {
    let Some(ctx) = gpu() else { return };
    let input = random_pairs(1 << 20, 6);
    let sorted = GpuRadixSorter::sort_blocking(&ctx, &input, 32, 8).unwrap();
    verify::check_stable_sort(&input, &sorted).unwrap();

    // Already sorted input stays put
    let again = GpuRadixSorter::sort_blocking(&ctx, &sorted, 32, 8).unwrap();
    assert_eq!(again, sorted);
}

#[test]
fn test_device_reduce_scan_matches_lookback_on_million_pairs() {
    let Some(ctx) = gpu() else { return };
    let input = random_pairs(1 << 20, 10);
    let lookback = GpuRadixSorter::sort_blocking(&ctx, &input, 32, 8).unwrap();
    let reduce_scan =
        GpuRadixSorter::sort_blocking_with(&ctx, &input, 32, 8, RadixScheme::ReduceScan).unwrap();
    assert_eq!(reduce_scan, lookback);
    verify::check_stable_sort(&input, &reduce_scan).unwrap();
}

#[test]
fn test_device_reduce_scan_odd_pass_count() {
    let Some(ctx) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(11);
    // 18 bits at 4 bits per digit: five passes, ending in the scratch buffer
    let input: Vec<KeyValue> = (0..30_001)
        .map(|i| KeyValue::new(rng.random_range(0..1 << 18), i))
        .collect();
    let sorted =
        GpuRadixSorter::sort_blocking_with(&ctx, &input, 18, 4, RadixScheme::ReduceScan).unwrap();
    verify::check_stable_sort(&input, &sorted).unwrap();
}

#[test]
fn test_device_radix_rejects_capacity_above_status_range() {
    let Some(ctx) = gpu() else { return };
    let keys = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Test Keys"),
        size: 64,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    for scheme in [RadixScheme::Lookback, RadixScheme::ReduceScan] {
        assert!(matches!(
            GpuRadixSorter::with_scheme(&ctx, &keys, MAX_PAIR_CAPACITY + 1, 8, scheme),
            Err(BinningError::InvalidConfig(_))
        ));
    }
}

#[test]
fn test_device_four_tile_scenario() {
    let Some(ctx) = gpu() else { return };
    let at = |sx: f32, sy: f32, depth: f32| {
        Splat::new([sx * 0.5 * depth, sy * 0.5 * depth, -depth], 0.01)
    };
    let splats = vec![
        at(-1.0, 1.0, 9.0),
        at(-1.0, 1.0, 1.0),
        at(-1.0, 1.0, 5.0),
        at(-1.0, -1.0, 7.0),
        at(-1.0, -1.0, 2.0),
        at(1.0, -1.0, 4.0),
    ];
    let cam = CameraUniform::look_at(
        Vec3::ZERO,
        Vec3::NEG_Z,
        std::f32::consts::FRAC_PI_2,
        32,
        32,
        0.5,
        80.0,
        16,
    );
    let config = BinningConfig {
        sort: SortStrategy::RadixReduceScan,
        check_bounds: true,
        ..Default::default()
    };
    let mut binner = TileBinner::with_context(ctx, config).unwrap();
    binner.upload_splats(&splats).unwrap();
    binner.run_frame(&cam).unwrap();

    let frame = binner.read_frame_blocking().unwrap();
    assert_eq!(frame.counts, vec![3, 0, 2, 1]);
    assert_eq!(frame.offsets, vec![0, 3, 3, 5]);
    let ids: Vec<u32> = frame.keys.iter().map(|kv| kv.value).collect();
    assert_eq!(ids, vec![1, 2, 0, 4, 3, 5]);
    verify::check_frame(&frame).unwrap();
}

#[test]
fn test_device_rejects_mismatched_tile_size() {
    let Some(ctx) = gpu() else { return };
    let mut binner = TileBinner::with_context(ctx, BinningConfig::default()).unwrap();
    binner.upload_splats(&random_scene(100, 12)).unwrap();
    for tile_size in [8, 0] {
        let cam = CameraUniform::look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            1.0,
            640,
            480,
            0.5,
            80.0,
            tile_size,
        );
        assert!(matches!(
            binner.run_frame(&cam),
            Err(BinningError::InvalidConfig(_))
        ));
    }
}

#[test]
fn test_device_radix_4bit_partial_keys() {
    let Some(ctx) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(7);
    let input: Vec<KeyValue> = (0..50_000)
        .map(|i| KeyValue::new(rng.random_range(0..1 << 18), i))
        .collect();
    let sorted = GpuRadixSorter::sort_blocking(&ctx, &input, 18, 4).unwrap();
    verify::check_stable_sort(&input, &sorted).unwrap();
}

#[test]
fn test_device_bitonic_matches_stable_sort() {
    let Some(ctx) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(8);
    for n in [2, 37, 256, 512] {
        let input: Vec<KeyValue> = (0..n)
            .map(|i| KeyValue::new(rng.random_range(0..32), i))
            .collect();
        let sorted = GpuBitonicSorter::sort_blocking(&ctx, &input).unwrap();
        verify::check_stable_sort(&input, &sorted).unwrap();
    }

    let too_many = random_pairs(513, 9);
    assert!(matches!(
        GpuBitonicSorter::sort_blocking(&ctx, &too_many),
        Err(BinningError::CapacityExceeded { required: 513, .. })
    ));
}

#[test]
fn test_device_stage_timings_follow_profiling_switch() {
    let Some(ctx) = gpu() else { return };
    let supported = ctx.supports_timestamps();
    let config = BinningConfig {
        profile_gpu: true,
        ..Default::default()
    };
    let mut binner = TileBinner::with_context(ctx, config).unwrap();
    binner.upload_splats(&random_scene(5_000, 13)).unwrap();
    assert!(binner.last_timings().is_none());

    binner.run_frame(&camera(640, 480)).unwrap();
    assert_eq!(binner.last_timings().is_some(), supported);

    // A failed frame leaves no stale timings behind
    let bad = CameraUniform::look_at(Vec3::ZERO, Vec3::NEG_Z, 1.0, 640, 480, 0.5, 80.0, 8);
    assert!(binner.run_frame(&bad).is_err());
    assert!(binner.last_timings().is_none());

    let Some(ctx) = gpu() else { return };
    let mut quiet = TileBinner::with_context(ctx, BinningConfig::default()).unwrap();
    quiet.upload_splats(&random_scene(100, 14)).unwrap();
    quiet.run_frame(&camera(320, 240)).unwrap();
    assert!(quiet.last_timings().is_none());
}
