//! Device binning pipeline.

use tracing::{debug, info, warn};

use crate::buffers::BinningBuffers;
use crate::gpu::{map_read_blocking, read_buffer_blocking, Binding, ComputeKernel};
use crate::shaders::{key_write_shader, scan_shader, PROJECT_SHADER};
use crate::sort::{BitonicMode, GpuBitonicSorter, GpuRadixSorter};
use crate::timing::{GpuTimer, StageTimings, Stamp};
use crate::{
    BinnedFrame, BinningConfig, BinningError, BinningParams, CameraUniform, Capacity,
    FrameStats, GpuContext, RadixScheme, Result, SortPath, SortStrategy, Splat, TileGrid,
    WORKGROUP_SIZE,
};

struct Kernels {
    project: ComputeKernel,
    scan: ComputeKernel,
    key_write: ComputeKernel,
}

impl Kernels {
    fn new(ctx: &GpuContext, check_bounds: bool) -> Result<Self> {
        use Binding::*;
        Ok(Self {
            project: ComputeKernel::new(
                ctx,
                "Project Splats",
                PROJECT_SHADER,
                &[Uniform, Uniform, StorageRead, Storage, Storage, Storage],
            )?,
            scan: ComputeKernel::new(
                ctx,
                "Offset Scan",
                &scan_shader(),
                &[Uniform, StorageRead, Storage, Storage, Storage],
            )?,
            key_write: ComputeKernel::new(
                ctx,
                "Write Keys",
                &key_write_shader(check_bounds),
                &[
                    Uniform,
                    Uniform,
                    StorageRead,
                    StorageRead,
                    StorageRead,
                    Storage,
                    Storage,
                    Storage,
                ],
            )?,
        })
    }
}

/// Bind groups and sorters tied to one set of buffers.
struct Bound {
    buffers: BinningBuffers,
    project: wgpu::BindGroup,
    scan: wgpu::BindGroup,
    key_write: wgpu::BindGroup,
    radix: GpuRadixSorter,
    bitonic: GpuBitonicSorter,
}

impl Bound {
    fn new(ctx: &GpuContext, kernels: &Kernels, config: &BinningConfig) -> Result<Self> {
        let buffers = BinningBuffers::new(ctx, config.capacity)?;

        let project = kernels.project.bind(
            ctx,
            &[
                buffers.camera.as_entire_binding(),
                buffers.params.as_entire_binding(),
                buffers.splats.as_entire_binding(),
                buffers.projected.as_entire_binding(),
                buffers.tile_counts.as_entire_binding(),
                buffers.stats.as_entire_binding(),
            ],
        );
        let scan = kernels.scan.bind(
            ctx,
            &[
                buffers.scan_params.as_entire_binding(),
                buffers.tile_counts.as_entire_binding(),
                buffers.offsets.as_entire_binding(),
                buffers.scan_status.as_entire_binding(),
                buffers.scan_counter.as_entire_binding(),
            ],
        );
        let key_write = kernels.key_write.bind(
            ctx,
            &[
                buffers.camera.as_entire_binding(),
                buffers.params.as_entire_binding(),
                buffers.projected.as_entire_binding(),
                buffers.offsets.as_entire_binding(),
                buffers.tile_counts.as_entire_binding(),
                buffers.cursors.as_entire_binding(),
                buffers.keys.as_entire_binding(),
                buffers.stats.as_entire_binding(),
            ],
        );

        let scheme = match config.sort {
            SortStrategy::RadixReduceScan => RadixScheme::ReduceScan,
            _ => RadixScheme::Lookback,
        };
        let radix = GpuRadixSorter::with_scheme(
            ctx,
            &buffers.keys,
            config.capacity.max_pairs,
            config.radix_bits,
            scheme,
        )?;
        let bitonic = GpuBitonicSorter::new(ctx, &buffers.keys)?.with_tiles(
            ctx,
            &buffers.offsets,
            &buffers.tile_counts,
        );

        Ok(Self {
            buffers,
            project,
            scan,
            key_write,
            radix,
            bitonic,
        })
    }
}

/// What the last frame left in the device buffers.
#[derive(Debug, Clone, Copy)]
struct FrameInfo {
    grid: TileGrid,
    stats: FrameStats,
    num_splats: u32,
    sort_path: SortPath,
}

/// Bins and sorts splats on the GPU.
///
/// The only host synchronization per frame is the [`FrameStats`] readback
/// between key writing and sorting; its pair count sizes the sort.
pub struct TileBinner {
    ctx: GpuContext,
    config: BinningConfig,
    kernels: Kernels,
    bound: Bound,
    num_splats: u32,
    last_frame: Option<FrameInfo>,
    timer: Option<GpuTimer>,
    last_timings: Option<StageTimings>,
}

impl TileBinner {
    /// Create a binner on the default adapter.
    pub async fn new(config: BinningConfig) -> Result<Self> {
        let ctx = GpuContext::new().await?;
        Self::with_context(ctx, config)
    }

    /// Create a binner on an existing device.
    pub fn with_context(ctx: GpuContext, config: BinningConfig) -> Result<Self> {
        config.validate()?;
        let kernels = Kernels::new(&ctx, config.check_bounds)?;
        let bound = Bound::new(&ctx, &kernels, &config)?;
        let timer = if config.profile_gpu {
            let timer = GpuTimer::new(&ctx);
            if timer.is_none() {
                warn!("GPU profiling requested but the device has no timestamp queries");
            }
            timer
        } else {
            None
        };

        info!(
            "Tile binner ready: {} splats, {} pairs, {} tiles, {}-bit digits",
            config.capacity.max_primitives,
            config.capacity.max_pairs,
            config.capacity.max_tiles,
            config.radix_bits
        );

        Ok(Self {
            ctx,
            config,
            kernels,
            bound,
            num_splats: 0,
            last_frame: None,
            timer,
            last_timings: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn config(&self) -> &BinningConfig {
        &self.config
    }

    pub fn num_splats(&self) -> u32 {
        self.num_splats
    }

    /// GPU stage times of the last frame, when profiling is on and supported.
    pub fn last_timings(&self) -> Option<StageTimings> {
        self.last_timings
    }

    fn stamp(&self, encoder: &mut wgpu::CommandEncoder, at: Stamp) {
        if let Some(timer) = &self.timer {
            timer.stamp(encoder, at);
        }
    }

    /// Replace the splat set. Takes effect at the next [`run_frame`](Self::run_frame).
    pub fn upload_splats(&mut self, splats: &[Splat]) -> Result<()> {
        let capacity = self.config.capacity.max_primitives;
        if splats.len() > capacity as usize {
            return Err(BinningError::TooManyPrimitives {
                count: splats.len(),
                capacity,
            });
        }
        self.bound.buffers.upload_splats(&self.ctx.queue, splats);
        self.num_splats = splats.len() as u32;
        self.last_frame = None;
        Ok(())
    }

    /// Reallocate every buffer for `capacity`, keeping the uploaded splats.
    /// Results of the previous frame are discarded.
    pub fn resize(&mut self, capacity: Capacity) -> Result<()> {
        if self.num_splats > capacity.max_primitives {
            return Err(BinningError::TooManyPrimitives {
                count: self.num_splats as usize,
                capacity: capacity.max_primitives,
            });
        }
        let config = BinningConfig {
            capacity,
            ..self.config.clone()
        };
        config.validate()?;

        let bound = Bound::new(&self.ctx, &self.kernels, &config)?;
        if self.num_splats > 0 {
            let mut encoder = self
                .ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Resize Encoder"),
                });
            encoder.copy_buffer_to_buffer(
                &self.bound.buffers.splats,
                0,
                &bound.buffers.splats,
                0,
                self.num_splats as u64 * std::mem::size_of::<Splat>() as u64,
            );
            self.ctx.queue.submit(Some(encoder.finish()));
        }

        info!(
            "Resized tile binner: {} splats, {} pairs, {} tiles",
            capacity.max_primitives, capacity.max_pairs, capacity.max_tiles
        );
        self.bound = bound;
        self.config = config;
        self.last_frame = None;
        Ok(())
    }

    /// Bin and sort the uploaded splats for `camera`.
    ///
    /// On success the sorted pairs are in [`sorted_keys`](Self::sorted_keys)
    /// and the offset table in [`offsets`](Self::offsets).
    pub fn run_frame(&mut self, camera: &CameraUniform) -> Result<FrameStats> {
        self.last_frame = None;
        self.last_timings = None;
        let capacity = self.config.capacity;
        let grid = self.config.frame_grid(camera)?;
        let num_tiles = grid.num_tiles();
        let layout = grid.key_layout();
        let buffers = &self.bound.buffers;

        let params = BinningParams {
            num_primitives: self.num_splats,
            num_tiles,
            depth_bits: layout.depth_bits,
            max_pairs: capacity.max_pairs,
            max_footprint: self.config.max_footprint,
            _pad: [0; 3],
        };
        buffers.update_camera(&self.ctx.queue, camera);
        buffers.update_params(&self.ctx.queue, &params);
        buffers.reset_stats(&self.ctx.queue);

        let splat_groups = self.num_splats.div_ceil(WORKGROUP_SIZE);
        let tile_groups = num_tiles.div_ceil(WORKGROUP_SIZE);

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Binning Encoder"),
            });
        encoder.clear_buffer(&buffers.tile_counts, 0, None);
        encoder.clear_buffer(&buffers.scan_status, 0, None);
        encoder.clear_buffer(&buffers.scan_counter, 0, None);

        self.stamp(&mut encoder, Stamp::Begin);
        self.kernels
            .project
            .dispatch(&mut encoder, &self.bound.project, &[], splat_groups);
        self.stamp(&mut encoder, Stamp::Projected);
        self.kernels
            .scan
            .dispatch(&mut encoder, &self.bound.scan, &[], tile_groups);
        self.stamp(&mut encoder, Stamp::Scanned);
        if num_tiles > 0 {
            encoder.copy_buffer_to_buffer(
                &buffers.offsets,
                0,
                &buffers.cursors,
                0,
                num_tiles as u64 * 4,
            );
        }
        self.kernels
            .key_write
            .dispatch(&mut encoder, &self.bound.key_write, &[], splat_groups);
        self.stamp(&mut encoder, Stamp::KeysWritten);
        encoder.copy_buffer_to_buffer(
            &buffers.stats,
            0,
            &buffers.stats_staging,
            0,
            std::mem::size_of::<FrameStats>() as u64,
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        let stats = self.read_stats()?;
        debug!(
            "binned {} splats: {} visible, {} pairs, largest tile {}",
            self.num_splats, stats.num_visible, stats.num_pairs, stats.max_tile_count
        );

        if stats.num_pairs > capacity.max_pairs {
            return Err(BinningError::CapacityExceeded {
                required: stats.num_pairs as u64,
                capacity: capacity.max_pairs,
            });
        }
        if stats.overflow > 0 {
            debug_assert_eq!(stats.overflow, 0, "key writer left its tile bucket");
            return Err(BinningError::Inconsistent(format!(
                "{} key writes fell outside their tile bucket",
                stats.overflow
            )));
        }

        let sort_path = self
            .config
            .sort
            .resolve(stats.num_pairs, stats.max_tile_count);
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Sort Encoder"),
            });
        self.stamp(&mut encoder, Stamp::SortBegin);
        match sort_path {
            SortPath::Skipped => {}
            SortPath::Radix | SortPath::RadixReduceScan => self.bound.radix.encode(
                &self.ctx,
                &mut encoder,
                stats.num_pairs,
                layout.key_bits(),
            )?,
            SortPath::Bitonic => self.bound.bitonic.encode(
                &self.ctx,
                &mut encoder,
                BitonicMode::Whole,
                stats.num_pairs,
            )?,
            SortPath::TileBitonic => self.bound.bitonic.encode(
                &self.ctx,
                &mut encoder,
                BitonicMode::PerTile,
                num_tiles,
            )?,
        }
        self.stamp(&mut encoder, Stamp::Sorted);
        if let Some(timer) = &self.timer {
            timer.resolve(&mut encoder);
        }
        self.ctx.queue.submit(Some(encoder.finish()));
        self.ctx.wait_idle();
        debug!("sorted {} pairs with {:?}", stats.num_pairs, sort_path);

        if let Some(timer) = &self.timer {
            let timings = timer.read(&self.ctx)?;
            debug!("GPU stage times: {:?}", timings);
            self.last_timings = Some(timings);
        }

        self.last_frame = Some(FrameInfo {
            grid,
            stats,
            num_splats: self.num_splats,
            sort_path,
        });
        Ok(stats)
    }

    fn read_stats(&self) -> Result<FrameStats> {
        let staging = &self.bound.buffers.stats_staging;
        let slice = staging.slice(..);
        map_read_blocking(&self.ctx, slice)?;
        let stats = {
            let data = slice.get_mapped_range();
            bytemuck::pod_read_unaligned::<FrameStats>(&data)
        };
        staging.unmap();
        Ok(stats)
    }

    /// Sorted pairs of the last frame, `num_pairs` long.
    pub fn sorted_keys(&self) -> &wgpu::Buffer {
        &self.bound.buffers.keys
    }

    /// Offset table of the last frame, one entry per tile.
    pub fn offsets(&self) -> &wgpu::Buffer {
        &self.bound.buffers.offsets
    }

    /// Pairs per tile of the last frame.
    pub fn tile_counts(&self) -> &wgpu::Buffer {
        &self.bound.buffers.tile_counts
    }

    /// Copy the last frame's results to host memory (blocking).
    pub fn read_frame_blocking(&self) -> Result<BinnedFrame> {
        let frame = self.last_frame.ok_or(BinningError::NotInitialized)?;
        let buffers = &self.bound.buffers;
        let num_tiles = frame.grid.num_tiles() as usize;

        Ok(BinnedFrame {
            grid: frame.grid,
            layout: frame.grid.key_layout(),
            projected: read_buffer_blocking(
                &self.ctx,
                &buffers.projected,
                frame.num_splats as usize,
            )?,
            counts: read_buffer_blocking(&self.ctx, &buffers.tile_counts, num_tiles)?,
            offsets: read_buffer_blocking(&self.ctx, &buffers.offsets, num_tiles)?,
            keys: read_buffer_blocking(
                &self.ctx,
                &buffers.keys,
                frame.stats.num_pairs as usize,
            )?,
            stats: frame.stats,
            sort_path: frame.sort_path,
        })
    }
}

/// Synchronous helpers for native callers.
#[cfg(not(target_arch = "wasm32"))]
pub mod sync {
    use super::*;

    /// Create a tile binner on the default adapter, blocking.
    pub fn new_binner(config: BinningConfig) -> Result<TileBinner> {
        pollster::block_on(TileBinner::new(config))
    }
}
