//! GPU sorters for key/value pairs.

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::gpu::{read_buffer_blocking, storage_buffer, Binding, ComputeKernel};
use crate::key::radix_passes;
use crate::sort_shaders::{
    max_passes, radix_shaders, reduce_scan_shaders, BITONIC_SHADER, RADIX_PARTITION,
};
use crate::{
    BinningError, GpuContext, KeyValue, RadixScheme, Result, BITONIC_CAPACITY, MAX_PAIR_CAPACITY,
};

const KV_SIZE: u64 = std::mem::size_of::<KeyValue>() as u64;

#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct RadixParams {
    count: u32,
    shift: u32,
    pass_index: u32,
    num_passes: u32,
}

#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct BitonicParams {
    num_segments: u32,
    _pad: [u32; 3],
}

enum RadixKernels {
    Lookback {
        histogram: ComputeKernel,
        bin_scan: ComputeKernel,
        pass: ComputeKernel,
        histogram_buf: wgpu::Buffer,
        status: wgpu::Buffer,
        counters: wgpu::Buffer,
        histogram_bind: wgpu::BindGroup,
        bin_scan_bind: wgpu::BindGroup,
        /// `[keys -> scratch, scratch -> keys]`
        pass_binds: [wgpu::BindGroup; 2],
    },
    ReduceScan {
        reduce: ComputeKernel,
        group_scan: ComputeKernel,
        scatter: ComputeKernel,
        /// Reads `[keys, scratch]`
        reduce_binds: [wgpu::BindGroup; 2],
        group_scan_bind: wgpu::BindGroup,
        /// `[keys -> scratch, scratch -> keys]`
        scatter_binds: [wgpu::BindGroup; 2],
    },
}

/// Stable LSD radix sort over a key buffer, in place.
///
/// Each digit pass ping-pongs between the caller's buffer and an internal
/// scratch buffer; an odd pass count ends with a copy back.
pub struct GpuRadixSorter {
    radix_bits: u32,
    capacity: u32,
    scheme: RadixScheme,
    keys: wgpu::Buffer,
    scratch: wgpu::Buffer,
    params: wgpu::Buffer,
    params_stride: u64,
    kernels: RadixKernels,
}

impl GpuRadixSorter {
    /// Lookback sorter. `keys` needs `STORAGE | COPY_SRC | COPY_DST` and room
    /// for `capacity` pairs.
    pub fn new(
        ctx: &GpuContext,
        keys: &wgpu::Buffer,
        capacity: u32,
        radix_bits: u32,
    ) -> Result<Self> {
        Self::with_scheme(ctx, keys, capacity, radix_bits, RadixScheme::Lookback)
    }

    pub fn with_scheme(
        ctx: &GpuContext,
        keys: &wgpu::Buffer,
        capacity: u32,
        radix_bits: u32,
        scheme: RadixScheme,
    ) -> Result<Self> {
        if radix_bits != 4 && radix_bits != 8 {
            return Err(BinningError::InvalidConfig(format!(
                "radix_bits must be 4 or 8, got {radix_bits}"
            )));
        }
        if capacity > MAX_PAIR_CAPACITY {
            return Err(BinningError::InvalidConfig(format!(
                "radix capacity {capacity} exceeds {MAX_PAIR_CAPACITY}"
            )));
        }
        let radix = 1u64 << radix_bits;
        let passes = max_passes(radix_bits) as u64;
        let groups = (capacity.max(1) as u64).div_ceil(RADIX_PARTITION as u64);

        let key_bytes = capacity.max(1) as u64 * KV_SIZE;
        ctx.check_storage_size("radix scratch buffer", key_bytes)?;
        let scratch = storage_buffer(
            ctx,
            "Radix Scratch Buffer",
            key_bytes,
            wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        );

        let params_stride = ctx
            .uniform_alignment()
            .max(std::mem::size_of::<RadixParams>() as u64);
        let params = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Radix Params Buffer"),
            size: params_stride * passes,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_binding = wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &params,
            offset: 0,
            size: wgpu::BufferSize::new(std::mem::size_of::<RadixParams>() as u64),
        });

        let kernels = match scheme {
            RadixScheme::Lookback => {
                let status_bytes = groups * radix * 4;
                ctx.check_storage_size("radix status table", status_bytes)?;

                let shaders = radix_shaders(radix_bits);
                let histogram = ComputeKernel::new(
                    ctx,
                    "Radix Histogram",
                    &shaders.histogram,
                    &[Binding::DynamicUniform, Binding::StorageRead, Binding::Storage],
                )?;
                let bin_scan = ComputeKernel::new(
                    ctx,
                    "Radix Bin Scan",
                    &shaders.bin_scan,
                    &[Binding::DynamicUniform, Binding::StorageRead, Binding::Storage],
                )?;
                let pass = ComputeKernel::new(
                    ctx,
                    "Radix Pass",
                    &shaders.pass,
                    &[
                        Binding::DynamicUniform,
                        Binding::StorageRead,
                        Binding::Storage,
                        Binding::StorageRead,
                        Binding::Storage,
                        Binding::Storage,
                    ],
                )?;

                let histogram_buf = storage_buffer(
                    ctx,
                    "Radix Histogram Buffer",
                    passes * radix * 4,
                    wgpu::BufferUsages::COPY_DST,
                );
                let digit_base = storage_buffer(
                    ctx,
                    "Radix Digit Base Buffer",
                    passes * radix * 4,
                    wgpu::BufferUsages::empty(),
                );
                let status = storage_buffer(
                    ctx,
                    "Radix Status Buffer",
                    status_bytes,
                    wgpu::BufferUsages::COPY_DST,
                );
                let counters = storage_buffer(
                    ctx,
                    "Radix Group Counters",
                    passes * 4,
                    wgpu::BufferUsages::COPY_DST,
                );

                let histogram_bind = histogram.bind(
                    ctx,
                    &[
                        params_binding.clone(),
                        keys.as_entire_binding(),
                        histogram_buf.as_entire_binding(),
                    ],
                );
                let bin_scan_bind = bin_scan.bind(
                    ctx,
                    &[
                        params_binding.clone(),
                        histogram_buf.as_entire_binding(),
                        digit_base.as_entire_binding(),
                    ],
                );
                let pass_bind = |src: &wgpu::Buffer, dst: &wgpu::Buffer| {
                    pass.bind(
                        ctx,
                        &[
                            params_binding.clone(),
                            src.as_entire_binding(),
                            dst.as_entire_binding(),
                            digit_base.as_entire_binding(),
                            status.as_entire_binding(),
                            counters.as_entire_binding(),
                        ],
                    )
                };
                let pass_binds = [pass_bind(keys, &scratch), pass_bind(&scratch, keys)];

                RadixKernels::Lookback {
                    histogram,
                    bin_scan,
                    pass,
                    histogram_buf,
                    status,
                    counters,
                    histogram_bind,
                    bin_scan_bind,
                    pass_binds,
                }
            }
            RadixScheme::ReduceScan => {
                let sums_bytes = groups * radix * 4;
                ctx.check_storage_size("radix group sums", sums_bytes)?;

                let shaders = reduce_scan_shaders(radix_bits);
                let reduce = ComputeKernel::new(
                    ctx,
                    "Radix Reduce",
                    &shaders.reduce,
                    &[Binding::DynamicUniform, Binding::StorageRead, Binding::Storage],
                )?;
                let group_scan = ComputeKernel::new(
                    ctx,
                    "Radix Group Scan",
                    &shaders.group_scan,
                    &[Binding::DynamicUniform, Binding::Storage],
                )?;
                let scatter = ComputeKernel::new(
                    ctx,
                    "Radix Scatter",
                    &shaders.scatter,
                    &[
                        Binding::DynamicUniform,
                        Binding::StorageRead,
                        Binding::Storage,
                        Binding::StorageRead,
                    ],
                )?;

                let group_sums = storage_buffer(
                    ctx,
                    "Radix Group Sums",
                    sums_bytes,
                    wgpu::BufferUsages::empty(),
                );

                let reduce_bind = |src: &wgpu::Buffer| {
                    reduce.bind(
                        ctx,
                        &[
                            params_binding.clone(),
                            src.as_entire_binding(),
                            group_sums.as_entire_binding(),
                        ],
                    )
                };
                let scatter_bind = |src: &wgpu::Buffer, dst: &wgpu::Buffer| {
                    scatter.bind(
                        ctx,
                        &[
                            params_binding.clone(),
                            src.as_entire_binding(),
                            dst.as_entire_binding(),
                            group_sums.as_entire_binding(),
                        ],
                    )
                };
                let reduce_binds = [reduce_bind(keys), reduce_bind(&scratch)];
                let group_scan_bind = group_scan.bind(
                    ctx,
                    &[params_binding.clone(), group_sums.as_entire_binding()],
                );
                let scatter_binds = [scatter_bind(keys, &scratch), scatter_bind(&scratch, keys)];

                RadixKernels::ReduceScan {
                    reduce,
                    group_scan,
                    scatter,
                    reduce_binds,
                    group_scan_bind,
                    scatter_binds,
                }
            }
        };

        Ok(Self {
            radix_bits,
            capacity,
            scheme,
            keys: keys.clone(),
            scratch,
            params,
            params_stride,
            kernels,
        })
    }

    pub fn radix_bits(&self) -> u32 {
        self.radix_bits
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn scheme(&self) -> RadixScheme {
        self.scheme
    }

    /// Record a sort of the first `count` pairs by their low `key_bits`
    /// bits. Uniforms are written through the queue, so encode at most one
    /// sort per submission.
    pub fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        count: u32,
        key_bits: u32,
    ) -> Result<()> {
        if count > self.capacity {
            return Err(BinningError::CapacityExceeded {
                required: count as u64,
                capacity: self.capacity,
            });
        }
        if count <= 1 {
            return Ok(());
        }
        let passes = radix_passes(key_bits.min(32), self.radix_bits);
        let groups = count.div_ceil(RADIX_PARTITION);
        debug!(count, passes, groups, scheme = ?self.scheme, "encoding radix sort");

        for pass in 0..passes {
            let params = RadixParams {
                count,
                shift: pass * self.radix_bits,
                pass_index: pass,
                num_passes: passes,
            };
            ctx.queue.write_buffer(
                &self.params,
                pass as u64 * self.params_stride,
                bytemuck::bytes_of(&params),
            );
        }
        let offset_of = |pass: u32| (pass as u64 * self.params_stride) as wgpu::DynamicOffset;

        match &self.kernels {
            RadixKernels::Lookback {
                histogram,
                bin_scan,
                pass: pass_kernel,
                histogram_buf,
                status,
                counters,
                histogram_bind,
                bin_scan_bind,
                pass_binds,
            } => {
                encoder.clear_buffer(histogram_buf, 0, None);
                encoder.clear_buffer(counters, 0, None);
                histogram.dispatch(encoder, histogram_bind, &[0], groups);
                bin_scan.dispatch(encoder, bin_scan_bind, &[0], 1);

                let status_bytes = groups as u64 * (1u64 << self.radix_bits) * 4;
                for pass in 0..passes {
                    encoder.clear_buffer(status, 0, Some(status_bytes));
                    pass_kernel.dispatch(
                        encoder,
                        &pass_binds[(pass % 2) as usize],
                        &[offset_of(pass)],
                        groups,
                    );
                }
            }
            RadixKernels::ReduceScan {
                reduce,
                group_scan,
                scatter,
                reduce_binds,
                group_scan_bind,
                scatter_binds,
            } => {
                for pass in 0..passes {
                    let side = (pass % 2) as usize;
                    let offsets = [offset_of(pass)];
                    reduce.dispatch(encoder, &reduce_binds[side], &offsets, groups);
                    group_scan.dispatch(encoder, group_scan_bind, &offsets, 1);
                    scatter.dispatch(encoder, &scatter_binds[side], &offsets, groups);
                }
            }
        }

        if passes % 2 == 1 {
            encoder.copy_buffer_to_buffer(&self.scratch, 0, &self.keys, 0, count as u64 * KV_SIZE);
        }
        Ok(())
    }

    /// Sort `pairs` on the device with the lookback scheme and read them
    /// back (blocking).
    pub fn sort_blocking(
        ctx: &GpuContext,
        pairs: &[KeyValue],
        key_bits: u32,
        radix_bits: u32,
    ) -> Result<Vec<KeyValue>> {
        Self::sort_blocking_with(ctx, pairs, key_bits, radix_bits, RadixScheme::Lookback)
    }

    /// Sort `pairs` on the device with `scheme` and read them back (blocking).
    pub fn sort_blocking_with(
        ctx: &GpuContext,
        pairs: &[KeyValue],
        key_bits: u32,
        radix_bits: u32,
        scheme: RadixScheme,
    ) -> Result<Vec<KeyValue>> {
        let keys = upload_pairs(ctx, pairs);
        let sorter = Self::with_scheme(ctx, &keys, pairs.len() as u32, radix_bits, scheme)?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Radix Sort Encoder"),
            });
        sorter.encode(ctx, &mut encoder, pairs.len() as u32, key_bits)?;
        ctx.queue.submit(Some(encoder.finish()));
        read_buffer_blocking(ctx, &keys, pairs.len())
    }
}

/// Which segments a bitonic dispatch sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitonicMode {
    /// The first `count` pairs as one segment.
    Whole,
    /// Every tile bucket of the offset table, one workgroup each.
    PerTile,
}

/// Bitonic network for segments of up to [`BITONIC_CAPACITY`] pairs.
pub struct GpuBitonicSorter {
    kernel: ComputeKernel,
    whole_params: wgpu::Buffer,
    whole_counts: wgpu::Buffer,
    whole_bind: wgpu::BindGroup,
    tile_params: wgpu::Buffer,
    tile_bind: Option<wgpu::BindGroup>,
    keys: wgpu::Buffer,
}

impl GpuBitonicSorter {
    pub fn new(ctx: &GpuContext, keys: &wgpu::Buffer) -> Result<Self> {
        let kernel = ComputeKernel::new(
            ctx,
            "Bitonic Sort",
            BITONIC_SHADER,
            &[
                Binding::Uniform,
                Binding::Storage,
                Binding::StorageRead,
                Binding::StorageRead,
            ],
        )?;

        let params = |label| {
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<BitonicParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let whole_params = params("Bitonic Whole Params");
        let tile_params = params("Bitonic Tile Params");

        let whole_offsets = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Bitonic Whole Offsets"),
                contents: bytemuck::bytes_of(&0u32),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let whole_counts = storage_buffer(
            ctx,
            "Bitonic Whole Counts",
            4,
            wgpu::BufferUsages::COPY_DST,
        );
        let whole_bind = kernel.bind(
            ctx,
            &[
                whole_params.as_entire_binding(),
                keys.as_entire_binding(),
                whole_offsets.as_entire_binding(),
                whole_counts.as_entire_binding(),
            ],
        );

        Ok(Self {
            kernel,
            whole_params,
            whole_counts,
            whole_bind,
            tile_params,
            tile_bind: None,
            keys: keys.clone(),
        })
    }

    /// Enable [`BitonicMode::PerTile`] over an offset table and tile counts.
    pub fn with_tiles(
        mut self,
        ctx: &GpuContext,
        offsets: &wgpu::Buffer,
        counts: &wgpu::Buffer,
    ) -> Self {
        self.tile_bind = Some(self.kernel.bind(
            ctx,
            &[
                self.tile_params.as_entire_binding(),
                self.keys.as_entire_binding(),
                offsets.as_entire_binding(),
                counts.as_entire_binding(),
            ],
        ));
        self
    }

    /// Record a sort. `count` is the pair count for [`BitonicMode::Whole`],
    /// the tile count for [`BitonicMode::PerTile`].
    pub fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        mode: BitonicMode,
        count: u32,
    ) -> Result<()> {
        match mode {
            BitonicMode::Whole => {
                if count > BITONIC_CAPACITY {
                    return Err(BinningError::CapacityExceeded {
                        required: count as u64,
                        capacity: BITONIC_CAPACITY,
                    });
                }
                let params = BitonicParams {
                    num_segments: 1,
                    _pad: [0; 3],
                };
                ctx.queue
                    .write_buffer(&self.whole_params, 0, bytemuck::bytes_of(&params));
                ctx.queue
                    .write_buffer(&self.whole_counts, 0, bytemuck::bytes_of(&count));
                self.kernel.dispatch(encoder, &self.whole_bind, &[], 1);
            }
            BitonicMode::PerTile => {
                let bind = self.tile_bind.as_ref().ok_or(BinningError::NotInitialized)?;
                let params = BitonicParams {
                    num_segments: count,
                    _pad: [0; 3],
                };
                ctx.queue
                    .write_buffer(&self.tile_params, 0, bytemuck::bytes_of(&params));
                self.kernel.dispatch(encoder, bind, &[], count);
            }
        }
        Ok(())
    }

    /// Sort up to 512 pairs on the device and read them back (blocking).
    pub fn sort_blocking(ctx: &GpuContext, pairs: &[KeyValue]) -> Result<Vec<KeyValue>> {
        let keys = upload_pairs(ctx, pairs);
        let sorter = Self::new(ctx, &keys)?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Bitonic Sort Encoder"),
            });
        sorter.encode(ctx, &mut encoder, BitonicMode::Whole, pairs.len() as u32)?;
        ctx.queue.submit(Some(encoder.finish()));
        read_buffer_blocking(ctx, &keys, pairs.len())
    }
}

fn upload_pairs(ctx: &GpuContext, pairs: &[KeyValue]) -> wgpu::Buffer {
    let keys = storage_buffer(
        ctx,
        "Sort Keys Buffer",
        pairs.len() as u64 * KV_SIZE,
        wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
    );
    if !pairs.is_empty() {
        ctx.queue.write_buffer(&keys, 0, bytemuck::cast_slice(pairs));
    }
    keys
}
