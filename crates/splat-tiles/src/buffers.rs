//! GPU buffer management for the binning pipeline.

use crate::gpu::storage_buffer;
use crate::{
    BinningParams, CameraUniform, Capacity, FrameStats, GpuContext, KeyValue, ProjectedSplat,
    Result, Splat,
};

/// All device buffers one frame touches, sized by a [`Capacity`].
pub struct BinningBuffers {
    /// Splat records
    pub splats: wgpu::Buffer,
    /// Camera uniform
    pub camera: wgpu::Buffer,
    /// Per-frame parameters
    pub params: wgpu::Buffer,
    /// Projector output, one record per splat
    pub projected: wgpu::Buffer,
    /// Pairs per tile
    pub tile_counts: wgpu::Buffer,
    /// Exclusive prefix sum of tile counts
    pub offsets: wgpu::Buffer,
    /// Key writer cursors, seeded from `offsets`
    pub cursors: wgpu::Buffer,
    /// Pair buffer, sorted in place
    pub keys: wgpu::Buffer,
    /// Frame statistics
    pub stats: wgpu::Buffer,
    /// Mappable copy of `stats`
    pub stats_staging: wgpu::Buffer,
    /// Offset scan element count
    pub scan_params: wgpu::Buffer,
    /// Offset scan lookback status, one word per group
    pub scan_status: wgpu::Buffer,
    /// Offset scan group counter
    pub scan_counter: wgpu::Buffer,
    pub capacity: Capacity,
}

#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct ScanParams {
    count: u32,
    _pad: [u32; 3],
}

impl BinningBuffers {
    pub fn new(ctx: &GpuContext, capacity: Capacity) -> Result<Self> {
        let splat_bytes = capacity.max_primitives as u64 * std::mem::size_of::<Splat>() as u64;
        let projected_bytes =
            capacity.max_primitives as u64 * std::mem::size_of::<ProjectedSplat>() as u64;
        let tile_bytes = capacity.max_tiles as u64 * 4;
        let key_bytes = capacity.max_pairs as u64 * std::mem::size_of::<KeyValue>() as u64;
        let scan_groups = (capacity.max_tiles as u64).div_ceil(crate::WORKGROUP_SIZE as u64);

        ctx.check_storage_size("splat buffer", splat_bytes)?;
        ctx.check_storage_size("projected splat buffer", projected_bytes)?;
        ctx.check_storage_size("tile tables", tile_bytes)?;
        ctx.check_storage_size("key buffer", key_bytes)?;

        let copy_src = wgpu::BufferUsages::COPY_SRC;
        let copy_dst = wgpu::BufferUsages::COPY_DST;

        let uniform = |label: &'static str, size: u64| {
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };

        let stats_size = std::mem::size_of::<FrameStats>() as u64;

        Ok(Self {
            splats: storage_buffer(ctx, "Splat Buffer", splat_bytes, copy_src | copy_dst),
            camera: uniform("Camera Buffer", std::mem::size_of::<CameraUniform>() as u64),
            params: uniform("Binning Params Buffer", std::mem::size_of::<BinningParams>() as u64),
            projected: storage_buffer(ctx, "Projected Splat Buffer", projected_bytes, copy_src),
            tile_counts: storage_buffer(ctx, "Tile Count Buffer", tile_bytes, copy_src | copy_dst),
            offsets: storage_buffer(ctx, "Tile Offset Buffer", tile_bytes, copy_src),
            cursors: storage_buffer(ctx, "Tile Cursor Buffer", tile_bytes, copy_dst),
            keys: storage_buffer(ctx, "Key Buffer", key_bytes, copy_src | copy_dst),
            stats: storage_buffer(ctx, "Frame Stats Buffer", stats_size, copy_src | copy_dst),
            stats_staging: ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Frame Stats Staging Buffer"),
                size: stats_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            scan_params: uniform("Scan Params Buffer", std::mem::size_of::<ScanParams>() as u64),
            scan_status: storage_buffer(ctx, "Scan Status Buffer", scan_groups * 4, copy_dst),
            scan_counter: storage_buffer(ctx, "Scan Group Counter", 4, copy_dst),
            capacity,
        })
    }

    /// Upload splat data. The caller checks the count against capacity.
    pub fn upload_splats(&self, queue: &wgpu::Queue, splats: &[Splat]) {
        if !splats.is_empty() {
            queue.write_buffer(&self.splats, 0, bytemuck::cast_slice(splats));
        }
    }

    pub fn update_camera(&self, queue: &wgpu::Queue, camera: &CameraUniform) {
        queue.write_buffer(&self.camera, 0, bytemuck::bytes_of(camera));
    }

    /// Write binning and scan parameters for a frame.
    pub fn update_params(&self, queue: &wgpu::Queue, params: &BinningParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
        let scan = ScanParams {
            count: params.num_tiles,
            _pad: [0; 3],
        };
        queue.write_buffer(&self.scan_params, 0, bytemuck::bytes_of(&scan));
    }

    /// Reset frame statistics to their cleared state.
    pub fn reset_stats(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.stats, 0, bytemuck::bytes_of(&FrameStats::cleared()));
    }
}
