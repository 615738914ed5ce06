//! GPU device setup, kernel construction and readback.

use std::borrow::Cow;

use crate::{BinningError, Result};

const TIMESTAMP_FEATURES: wgpu::Features = wgpu::Features::TIMESTAMP_QUERY
    .union(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS);

/// GPU context holding device and queue.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Create a new GPU context on the default high-performance adapter.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BinningError::GpuInit("No suitable GPU adapter found".into()))?;

        tracing::info!("Using GPU adapter: {:?}", adapter.get_info());

        // Timestamps are optional; take them when offered.
        let required_features = adapter.features() & TIMESTAMP_FEATURES;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Splat Tiles Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| BinningError::GpuInit(e.to_string()))?;

        Ok(Self { device, queue })
    }

    /// Wrap a device owned by the host application, e.g. a renderer's.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Fail if a storage binding of `bytes` exceeds the device limits.
    pub fn check_storage_size(&self, what: &'static str, bytes: u64) -> Result<()> {
        let limits = self.device.limits();
        let limit = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if bytes > limit {
            return Err(BinningError::Unsupported {
                what,
                required: bytes,
                limit,
            });
        }
        Ok(())
    }

    /// Whether stage timestamps can be written between compute passes.
    pub fn supports_timestamps(&self) -> bool {
        self.device.features().contains(TIMESTAMP_FEATURES)
    }

    /// Alignment for dynamic uniform offsets.
    pub fn uniform_alignment(&self) -> u64 {
        self.device.limits().min_uniform_buffer_offset_alignment as u64
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

/// How a kernel sees one of its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Uniform,
    /// Uniform bound with a per-dispatch offset.
    DynamicUniform,
    Storage,
    StorageRead,
}

impl Binding {
    fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let (ty, has_dynamic_offset) = match self {
            Binding::Uniform => (wgpu::BufferBindingType::Uniform, false),
            Binding::DynamicUniform => (wgpu::BufferBindingType::Uniform, true),
            Binding::Storage => (wgpu::BufferBindingType::Storage { read_only: false }, false),
            Binding::StorageRead => (wgpu::BufferBindingType::Storage { read_only: true }, false),
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset,
                min_binding_size: None,
            },
            count: None,
        }
    }
}

/// A compute pipeline with a single bind group whose bindings are numbered
/// in declaration order.
pub(crate) struct ComputeKernel {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    label: &'static str,
}

impl ComputeKernel {
    pub fn new(
        ctx: &GpuContext,
        label: &'static str,
        source: &str,
        bindings: &[Binding],
    ) -> Result<Self> {
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_owned())),
            });

        let entries: Vec<_> = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| b.layout_entry(i as u32))
            .collect();
        let bind_group_layout =
            ctx.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &entries,
                });

        let pipeline_layout = ctx
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = ctx
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(BinningError::ResourceCreation(format!("{label}: {err}")));
        }

        Ok(Self {
            pipeline,
            bind_group_layout,
            label,
        })
    }

    /// Bind `resources` to bindings `0..n` in order.
    pub fn bind(&self, ctx: &GpuContext, resources: &[wgpu::BindingResource]) -> wgpu::BindGroup {
        let entries: Vec<_> = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: resource.clone(),
            })
            .collect();
        ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }

    /// Record one dispatch of `groups` workgroups in its own compute pass.
    pub fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_group: &wgpu::BindGroup,
        offsets: &[wgpu::DynamicOffset],
        groups: u32,
    ) {
        if groups == 0 {
            return;
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, offsets);
        let (x, y) = dispatch_size(groups);
        pass.dispatch_workgroups(x, y, 1);
    }
}

/// Per-dimension workgroup limit for a default device.
pub(crate) const MAX_GROUPS_PER_DIM: u32 = 65_535;

/// Split a linear workgroup count into a 2D grid. Kernels recover the
/// linear id as `wid.x + wid.y * num_workgroups.x` and discard the excess.
pub(crate) fn dispatch_size(groups: u32) -> (u32, u32) {
    if groups <= MAX_GROUPS_PER_DIM {
        (groups, 1)
    } else {
        (MAX_GROUPS_PER_DIM, groups.div_ceil(MAX_GROUPS_PER_DIM))
    }
}

/// Create a storage buffer of `bytes` (at least 4).
pub(crate) fn storage_buffer(
    ctx: &GpuContext,
    label: &'static str,
    bytes: u64,
    extra: wgpu::BufferUsages,
) -> wgpu::Buffer {
    ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes.max(4),
        usage: wgpu::BufferUsages::STORAGE | extra,
        mapped_at_creation: false,
    })
}

/// Wait for a mapped read of `slice` to finish.
pub(crate) fn map_read_blocking(ctx: &GpuContext, slice: wgpu::BufferSlice<'_>) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    ctx.device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|_| BinningError::Readback("Channel closed".into()))?
        .map_err(|e| BinningError::Readback(e.to_string()))
}

/// Copy the first `len` elements of `src` back to the host (blocking).
pub(crate) fn read_buffer_blocking<T: bytemuck::Pod>(
    ctx: &GpuContext,
    src: &wgpu::Buffer,
    len: usize,
) -> Result<Vec<T>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let size = (len * std::mem::size_of::<T>()) as u64;
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging Buffer"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    ctx.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    map_read_blocking(ctx, slice)?;
    let out = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    staging.unmap();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_size_covers_groups() {
        assert_eq!(dispatch_size(1), (1, 1));
        assert_eq!(dispatch_size(65_535), (65_535, 1));
        let (x, y) = dispatch_size(1 << 22);
        assert!(x <= MAX_GROUPS_PER_DIM && y <= MAX_GROUPS_PER_DIM);
        assert!(x as u64 * y as u64 >= 1 << 22);
    }
}
