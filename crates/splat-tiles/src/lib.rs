//! Tile binning and parallel sorting for splat rendering using WebGPU.
//!
//! Every frame, each splat is projected to screen space and assigned to the
//! 16x16 pixel tiles its footprint covers. The pipeline produces one flat
//! buffer of `(key, splat id)` pairs, sorted tile-major and depth-minor, plus
//! a per-tile offset table so a compositor can walk each tile's splats front
//! to back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        GPU Side                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  Projector  │───▶│ Offset Scan │───▶│ Key Writer  │     │
//! │  │ (footprint, │    │ (lookback   │    │ (atomic     │     │
//! │  │  counts)    │    │  prefix sum)│    │  cursors)   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Back                              │
//! │  FrameStats (pair count, depth range) sizes the sort        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        GPU Side                             │
//! │  ┌───────────────────────────┐  ┌───────────────────────┐  │
//! │  │ Radix sort (onesweep,     │  │ Bitonic network       │  │
//! │  │ decoupled lookback)       │  │ (whole or per tile)   │  │
//! │  └───────────────────────────┘  └───────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`TileBinner`] runs the pipeline on a wgpu device. [`host::HostBinner`]
//! runs the same algorithms on CPU threads and serves as the reference.

mod binner;
mod buffers;
mod config;
mod error;
mod gpu;
pub mod host;
pub mod key;
pub mod projector;
mod shaders;
mod sort;
mod sort_shaders;
mod timing;
pub mod verify;

pub use binner::TileBinner;
#[cfg(not(target_arch = "wasm32"))]
pub use binner::sync;
pub use buffers::BinningBuffers;
pub use config::{
    BinningConfig, Capacity, RadixScheme, SortPath, SortStrategy, BITONIC_CAPACITY,
    MAX_PAIR_CAPACITY, WORKGROUP_SIZE,
};
pub use error::BinningError;
pub use gpu::GpuContext;
pub use key::KeyLayout;
pub use sort::{BitonicMode, GpuBitonicSorter, GpuRadixSorter};
pub use timing::StageTimings;

use glam::{Mat4, Vec3};

/// Result type for binning operations.
pub type Result<T> = std::result::Result<T, BinningError>;

/// A splat as uploaded by the scene loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Splat {
    /// World-space centre
    pub position: [f32; 3],
    /// World-space extent
    pub radius: f32,
}

impl Splat {
    pub fn new(position: [f32; 3], radius: f32) -> Self {
        Self { position, radius }
    }
}

/// One sort element: composite key plus the splat id it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct KeyValue {
    pub key: u32,
    pub value: u32,
}

impl KeyValue {
    pub fn new(key: u32, value: u32) -> Self {
        Self { key, value }
    }
}

/// Tile grid covering a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_size: u32,
}

impl TileGrid {
    /// Smallest grid of `tile_size` tiles covering `width` x `height` pixels.
    ///
    /// A zero `tile_size` gives an empty grid; binners reject it.
    pub fn for_viewport(width: u32, height: u32, tile_size: u32) -> Self {
        if tile_size == 0 {
            return Self {
                tiles_x: 0,
                tiles_y: 0,
                tile_size,
            };
        }
        Self {
            tiles_x: width.div_ceil(tile_size),
            tiles_y: height.div_ceil(tile_size),
            tile_size,
        }
    }

    /// Exact tile count, without overflow.
    pub fn tile_count(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }

    /// Tile count as a `u32`, saturating. Binners reject grids whose
    /// [`tile_count`](Self::tile_count) exceeds their tile capacity first.
    pub fn num_tiles(&self) -> u32 {
        self.tiles_x.saturating_mul(self.tiles_y)
    }

    /// Row-major tile id.
    pub fn tile_id(&self, x: u32, y: u32) -> u32 {
        y * self.tiles_x + x
    }

    pub fn key_layout(&self) -> KeyLayout {
        KeyLayout::for_tiles(self.num_tiles())
    }
}

/// Camera uniform block, laid out for WGSL uniform address space.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct CameraUniform {
    /// World to view, column-major
    pub view: [[f32; 4]; 4],
    /// View to clip, column-major
    pub proj: [[f32; 4]; 4],
    /// Viewport size in pixels
    pub viewport: [f32; 2],
    pub znear: f32,
    pub zfar: f32,
    /// Tile grid dimensions
    pub tiles: [u32; 2],
    pub tile_size: u32,
    pub _pad: u32,
}

impl CameraUniform {
    /// A zero `tile_size` is accepted here and rejected by `run_frame`.
    pub fn new(
        view: Mat4,
        proj: Mat4,
        width: u32,
        height: u32,
        znear: f32,
        zfar: f32,
        tile_size: u32,
    ) -> Self {
        let grid = TileGrid::for_viewport(width, height, tile_size);
        Self {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            viewport: [width as f32, height as f32],
            znear,
            zfar,
            tiles: [grid.tiles_x, grid.tiles_y],
            tile_size,
            _pad: 0,
        }
    }

    /// Right-handed perspective camera at `eye` looking at `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        fov_y: f32,
        width: u32,
        height: u32,
        znear: f32,
        zfar: f32,
        tile_size: u32,
    ) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let aspect = width as f32 / height.max(1) as f32;
        let proj = Mat4::perspective_rh(fov_y, aspect, znear, zfar);
        Self::new(view, proj, width, height, znear, zfar, tile_size)
    }

    pub fn grid(&self) -> TileGrid {
        TileGrid {
            tiles_x: self.tiles[0],
            tiles_y: self.tiles[1],
            tile_size: self.tile_size,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view)
    }

    pub fn proj_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.proj)
    }
}

/// Per-splat projector output, reused by the key writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ProjectedSplat {
    /// View-space depth
    pub depth: f32,
    /// Quantized depth field of the composite key
    pub depth_key: u32,
    /// Tiles covered; 0 means culled
    pub fanout: u32,
    pub _pad: u32,
    /// Inclusive tile rectangle: min_x, min_y, max_x, max_y
    pub rect: [u32; 4],
}

impl ProjectedSplat {
    pub fn is_visible(&self) -> bool {
        self.fanout > 0
    }

    /// Tile coordinates covered, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32)> {
        let [x0, y0, x1, y1] = self.rect;
        let visible = self.is_visible();
        (y0..=y1)
            .flat_map(move |y| (x0..=x1).map(move |x| (x, y)))
            .filter(move |_| visible)
    }
}

/// Frame-wide aggregates, the one record read back every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct FrameStats {
    /// Total (tile, splat) pairs
    pub num_pairs: u32,
    /// Splats with a non-empty footprint
    pub num_visible: u32,
    /// Order-preserving encoding of the nearest visible depth
    pub min_depth: u32,
    /// Order-preserving encoding of the farthest visible depth
    pub max_depth: u32,
    /// Pairs in the fullest tile
    pub max_tile_count: u32,
    /// Key writer slots that fell outside their tile bucket
    pub overflow: u32,
    pub _pad: [u32; 2],
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::cleared()
    }
}

impl FrameStats {
    /// Initial value before the projector accumulates into it.
    pub fn cleared() -> Self {
        Self {
            num_pairs: 0,
            num_visible: 0,
            min_depth: u32::MAX,
            max_depth: 0,
            max_tile_count: 0,
            overflow: 0,
            _pad: [0; 2],
        }
    }

    /// Nearest and farthest visible depth, if anything was visible.
    pub fn depth_range(&self) -> Option<(f32, f32)> {
        (self.num_visible > 0).then(|| {
            (
                key::depth_from_ordered(self.min_depth),
                key::depth_from_ordered(self.max_depth),
            )
        })
    }
}

/// Everything one frame produced, copied to host memory.
#[derive(Debug, Clone)]
pub struct BinnedFrame {
    pub grid: TileGrid,
    pub layout: KeyLayout,
    pub projected: Vec<ProjectedSplat>,
    /// Pairs per tile
    pub counts: Vec<u32>,
    /// Exclusive prefix sum of `counts`
    pub offsets: Vec<u32>,
    /// Sorted pairs, tile-major and depth-minor
    pub keys: Vec<KeyValue>,
    pub stats: FrameStats,
    pub sort_path: SortPath,
}

impl BinnedFrame {
    /// Pairs of one tile, front to back.
    pub fn tile(&self, tile: u32) -> &[KeyValue] {
        let t = tile as usize;
        match (self.offsets.get(t), self.counts.get(t)) {
            (Some(&o), Some(&c)) => {
                let end = (o + c) as usize;
                self.keys.get(o as usize..end).unwrap_or(&[])
            }
            _ => &[],
        }
    }
}

/// Per-frame binning parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BinningParams {
    pub num_primitives: u32,
    pub num_tiles: u32,
    pub depth_bits: u32,
    /// Slots in the key buffer
    pub max_pairs: u32,
    /// Footprint span limit per axis, in tiles
    pub max_footprint: u32,
    pub _pad: [u32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<Splat>(), 16);
        assert_eq!(std::mem::size_of::<KeyValue>(), 8);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 160);
        assert_eq!(std::mem::size_of::<ProjectedSplat>(), 32);
        assert_eq!(std::mem::size_of::<FrameStats>(), 32);
        assert_eq!(std::mem::size_of::<BinningParams>(), 32);
    }

    #[test]
    fn test_tile_grid_rounds_up() {
        let grid = TileGrid::for_viewport(1920, 1080, 16);
        assert_eq!(grid.tiles_x, 120);
        assert_eq!(grid.tiles_y, 68);
        assert_eq!(grid.num_tiles(), 8160);
        assert_eq!(grid.tile_id(1, 1), 121);
    }

    #[test]
    fn test_zero_tile_size_gives_empty_grid() {
        let camera = CameraUniform::look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            1.0,
            640,
            480,
            0.1,
            100.0,
            0,
        );
        assert_eq!(camera.tiles, [0, 0]);
        assert_eq!(camera.grid().tile_count(), 0);
    }

    #[test]
    fn test_huge_grid_count_does_not_overflow() {
        let grid = TileGrid::for_viewport(u32::MAX, u32::MAX, 1);
        assert_eq!(grid.tile_count(), u32::MAX as u64 * u32::MAX as u64);
        assert_eq!(grid.num_tiles(), u32::MAX);
    }

    #[test]
    fn test_projected_tiles_walk_rect() {
        let p = ProjectedSplat {
            fanout: 6,
            rect: [2, 5, 4, 6],
            ..Default::default()
        };
        let tiles: Vec<_> = p.tiles().collect();
        assert_eq!(tiles, vec![(2, 5), (3, 5), (4, 5), (2, 6), (3, 6), (4, 6)]);
        assert_eq!(ProjectedSplat::default().tiles().count(), 0);
    }

    #[test]
    fn test_cleared_stats_have_no_depth_range() {
        assert_eq!(FrameStats::cleared().depth_range(), None);
    }
}
