//! Binning configuration.

use serde::{Deserialize, Serialize};

use crate::key::MAX_TILE_BITS;
use crate::{BinningError, CameraUniform, Result, TileGrid};

/// Largest pair count a packed lookback status word can describe.
pub const MAX_PAIR_CAPACITY: u32 = (1 << 30) - 1;

/// Elements a single bitonic workgroup can sort.
pub const BITONIC_CAPACITY: u32 = 512;

/// Threads per workgroup for every kernel.
pub const WORKGROUP_SIZE: u32 = 256;

/// Which sorter runs after the key writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortStrategy {
    /// Bitonic when every pair fits one workgroup, radix otherwise.
    #[default]
    Auto,
    /// Always the decoupled-lookback radix sort.
    Radix,
    /// Radix sort without inter-group waits: per-group digit counts, one
    /// workgroup scanning them, then a scatter. For devices that give no
    /// forward-progress guarantee between workgroups.
    RadixReduceScan,
    /// Whole-buffer bitonic network; falls back to radix above capacity.
    Bitonic,
    /// One bitonic workgroup per tile bucket; falls back to radix when a
    /// tile holds more than [`BITONIC_CAPACITY`] pairs.
    TileBitonic,
}

/// How a radix pass finds where each group's digits go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RadixScheme {
    /// One kernel per digit; groups chain their digit prefixes through a
    /// decoupled lookback. Needs forward progress between workgroups.
    #[default]
    Lookback,
    /// Three kernels per digit (reduce, single-group scan, scatter). No
    /// workgroup ever waits on another.
    ReduceScan,
}

/// The sorter actually chosen for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortPath {
    /// Nothing to sort (zero or one pair).
    Skipped,
    Radix,
    RadixReduceScan,
    Bitonic,
    TileBitonic,
}

impl SortPath {
    /// Radix scheme for the radix paths.
    pub fn radix_scheme(self) -> Option<RadixScheme> {
        match self {
            SortPath::Radix => Some(RadixScheme::Lookback),
            SortPath::RadixReduceScan => Some(RadixScheme::ReduceScan),
            _ => None,
        }
    }
}

impl SortStrategy {
    /// Pick the sorter for `num_pairs` pairs whose fullest tile holds
    /// `max_tile_count` of them.
    pub fn resolve(self, num_pairs: u32, max_tile_count: u32) -> SortPath {
        if num_pairs <= 1 {
            return SortPath::Skipped;
        }
        match self {
            SortStrategy::Auto | SortStrategy::Bitonic if num_pairs <= BITONIC_CAPACITY => {
                SortPath::Bitonic
            }
            SortStrategy::TileBitonic if max_tile_count <= BITONIC_CAPACITY => {
                SortPath::TileBitonic
            }
            SortStrategy::Bitonic | SortStrategy::TileBitonic => {
                tracing::warn!(
                    "{:?} cannot sort {} pairs (largest tile {}), using radix",
                    self,
                    num_pairs,
                    max_tile_count
                );
                SortPath::Radix
            }
            SortStrategy::Auto | SortStrategy::Radix => SortPath::Radix,
            SortStrategy::RadixReduceScan => SortPath::RadixReduceScan,
        }
    }
}

impl std::str::FromStr for SortStrategy {
    type Err = BinningError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SortStrategy::Auto),
            "radix" => Ok(SortStrategy::Radix),
            "radix-reduce-scan" | "radix_reduce_scan" => Ok(SortStrategy::RadixReduceScan),
            "bitonic" => Ok(SortStrategy::Bitonic),
            "tile-bitonic" | "tile_bitonic" => Ok(SortStrategy::TileBitonic),
            _ => Err(BinningError::InvalidConfig(format!(
                "unknown sort strategy '{s}'. Use: auto, radix, radix-reduce-scan, bitonic, tile-bitonic"
            ))),
        }
    }
}

/// Buffer sizes reserved at construction.
///
/// Nothing grows implicitly; a frame that needs more fails with
/// [`BinningError::CapacityExceeded`] and the caller decides whether to
/// `resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capacity {
    /// Maximum splats per frame.
    pub max_primitives: u32,
    /// Maximum (tile, splat) pairs per frame.
    pub max_pairs: u32,
    /// Maximum tiles in the camera grid.
    pub max_tiles: u32,
}

impl Default for Capacity {
    fn default() -> Self {
        Self {
            max_primitives: 1 << 20,
            max_pairs: 1 << 22,
            // 4K at 16px tiles
            max_tiles: 240 * 135,
        }
    }
}

impl Capacity {
    /// A capacity that fits `required` pairs with some headroom.
    pub fn grown_to(self, required: u64) -> Self {
        let want = required.saturating_add(required / 4).min(MAX_PAIR_CAPACITY as u64) as u32;
        Self {
            max_pairs: self.max_pairs.max(want),
            ..self
        }
    }
}

/// Configuration for the binning pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// Tile edge length in pixels.
    pub tile_size: u32,
    /// Reserved buffer sizes.
    pub capacity: Capacity,
    /// Maximum footprint span per axis, in tiles.
    pub max_footprint: u32,
    /// Radix digit width in bits (4 or 8).
    pub radix_bits: u32,
    /// Sorter selection.
    pub sort: SortStrategy,
    /// Verify key writer slots against their tile bucket.
    pub check_bounds: bool,
    /// Host worker threads (0 = available parallelism).
    pub workers: usize,
    /// Record per-stage GPU timestamps when the device supports them.
    pub profile_gpu: bool,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            tile_size: 16,
            capacity: Capacity::default(),
            max_footprint: 32,
            radix_bits: 8,
            sort: SortStrategy::Auto,
            check_bounds: cfg!(debug_assertions),
            workers: 0,
            profile_gpu: false,
        }
    }
}

impl BinningConfig {
    /// Reject configurations the kernels cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(BinningError::InvalidConfig("tile_size must be positive".into()));
        }
        if self.max_footprint == 0 {
            return Err(BinningError::InvalidConfig(
                "max_footprint must be positive".into(),
            ));
        }
        if self.radix_bits != 4 && self.radix_bits != 8 {
            return Err(BinningError::InvalidConfig(format!(
                "radix_bits must be 4 or 8, got {}",
                self.radix_bits
            )));
        }
        let cap = &self.capacity;
        if cap.max_primitives == 0 || cap.max_pairs == 0 || cap.max_tiles == 0 {
            return Err(BinningError::InvalidConfig(
                "capacities must be positive".into(),
            ));
        }
        if cap.max_pairs > MAX_PAIR_CAPACITY {
            return Err(BinningError::InvalidConfig(format!(
                "max_pairs {} exceeds {}",
                cap.max_pairs, MAX_PAIR_CAPACITY
            )));
        }
        // The projector accumulates pair counts in a u32.
        let worst_case = cap.max_primitives as u64 * (self.max_footprint as u64).pow(2);
        if worst_case > u32::MAX as u64 {
            return Err(BinningError::InvalidConfig(format!(
                "{} splats with a {}-tile footprint can overflow the pair counter",
                cap.max_primitives, self.max_footprint
            )));
        }
        if cap.max_tiles > (1 << MAX_TILE_BITS) {
            return Err(BinningError::InvalidConfig(format!(
                "max_tiles {} exceeds {}",
                cap.max_tiles,
                1u32 << MAX_TILE_BITS
            )));
        }
        Ok(())
    }

    /// Tile grid for `camera`, checked against this configuration.
    ///
    /// The camera must use [`tile_size`](Self::tile_size) and its grid must
    /// fit the reserved tile capacity.
    pub fn frame_grid(&self, camera: &CameraUniform) -> Result<TileGrid> {
        if camera.tile_size == 0 || camera.tile_size != self.tile_size {
            return Err(BinningError::InvalidConfig(format!(
                "camera tile size {} does not match configured tile size {}",
                camera.tile_size, self.tile_size
            )));
        }
        let grid = camera.grid();
        let tiles = grid.tile_count();
        if tiles > self.capacity.max_tiles as u64 {
            return Err(BinningError::TooManyTiles {
                tiles,
                capacity: self.capacity.max_tiles,
            });
        }
        Ok(grid)
    }

    /// Worker threads for the host pipeline.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BinningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tile_size, 16);
        assert!(!config.profile_gpu);

        let config: BinningConfig = serde_json::from_str(r#"{ "profile_gpu": true }"#).unwrap();
        assert!(config.profile_gpu);
    }

    #[test]
    fn test_rejects_bad_radix_bits() {
        let config = BinningConfig {
            radix_bits: 6,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BinningError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_pair_capacity_above_status_range() {
        let mut config = BinningConfig::default();
        config.capacity.max_pairs = 1 << 30;
        assert!(config.validate().is_err());
        config.capacity.max_pairs = MAX_PAIR_CAPACITY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strategy_resolution() {
        assert_eq!(SortStrategy::Auto.resolve(0, 0), SortPath::Skipped);
        assert_eq!(SortStrategy::Auto.resolve(300, 300), SortPath::Bitonic);
        assert_eq!(SortStrategy::Auto.resolve(513, 10), SortPath::Radix);
        assert_eq!(SortStrategy::Radix.resolve(10, 10), SortPath::Radix);
        assert_eq!(SortStrategy::Bitonic.resolve(5000, 10), SortPath::Radix);
        assert_eq!(
            SortStrategy::TileBitonic.resolve(5000, 512),
            SortPath::TileBitonic
        );
        assert_eq!(SortStrategy::TileBitonic.resolve(5000, 513), SortPath::Radix);
        assert_eq!(
            SortStrategy::RadixReduceScan.resolve(10, 10),
            SortPath::RadixReduceScan
        );
        assert_eq!(SortStrategy::RadixReduceScan.resolve(1, 1), SortPath::Skipped);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Radix".parse::<SortStrategy>().unwrap(), SortStrategy::Radix);
        assert_eq!(
            "tile-bitonic".parse::<SortStrategy>().unwrap(),
            SortStrategy::TileBitonic
        );
        assert_eq!(
            "radix-reduce-scan".parse::<SortStrategy>().unwrap(),
            SortStrategy::RadixReduceScan
        );
        assert!("quick".parse::<SortStrategy>().is_err());
    }

    #[test]
    fn test_config_json_uses_defaults_for_missing_fields() {
        let config: BinningConfig =
            serde_json::from_str(r#"{ "radix_bits": 4, "sort": "tile-bitonic" }"#).unwrap();
        assert_eq!(config.radix_bits, 4);
        assert_eq!(config.sort, SortStrategy::TileBitonic);
        assert_eq!(config.tile_size, 16);
    }

    fn camera(width: u32, height: u32, tile_size: u32) -> CameraUniform {
        CameraUniform::look_at(
            glam::Vec3::ZERO,
            glam::Vec3::NEG_Z,
            1.0,
            width,
            height,
            0.1,
            100.0,
            tile_size,
        )
    }

    #[test]
    fn test_frame_grid_requires_configured_tile_size() {
        let config = BinningConfig::default();
        let grid = config.frame_grid(&camera(640, 480, 16)).unwrap();
        assert_eq!(grid.num_tiles(), 40 * 30);
        assert!(matches!(
            config.frame_grid(&camera(640, 480, 8)),
            Err(BinningError::InvalidConfig(_))
        ));
        assert!(matches!(
            config.frame_grid(&camera(640, 480, 0)),
            Err(BinningError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_frame_grid_rejects_overflowing_grid() {
        let config = BinningConfig {
            tile_size: 1,
            ..Default::default()
        };
        let err = config.frame_grid(&camera(u32::MAX, u32::MAX, 1)).unwrap_err();
        let BinningError::TooManyTiles { tiles, capacity } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(tiles, u32::MAX as u64 * u32::MAX as u64);
        assert_eq!(capacity, config.capacity.max_tiles);
    }

    #[test]
    fn test_capacity_growth() {
        let cap = Capacity::default().grown_to(10_000_000);
        assert!(cap.max_pairs >= 10_000_000);
        assert_eq!(cap.max_primitives, Capacity::default().max_primitives);
    }
}
