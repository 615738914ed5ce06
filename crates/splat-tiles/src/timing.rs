//! GPU timestamp queries around the binning stages.

use std::time::Duration;

use crate::gpu::map_read_blocking;
use crate::{GpuContext, Result};

/// Points in the frame where a timestamp is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum Stamp {
    Begin,
    Projected,
    Scanned,
    KeysWritten,
    SortBegin,
    Sorted,
}

const STAMP_COUNT: u32 = Stamp::Sorted as u32 + 1;

/// GPU time spent in each stage of the last frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    pub project: Duration,
    pub scan: Duration,
    pub key_write: Duration,
    pub sort: Duration,
}

impl StageTimings {
    /// Sum over all stages. Excludes the stats readback between key writing and sorting.
    pub fn total(&self) -> Duration {
        self.project + self.scan + self.key_write + self.sort
    }

    /// Per-stage times from raw ticks of `period` nanoseconds each.
    fn from_ticks(ticks: &[u64], period: f32) -> Self {
        let span = |from: Stamp, to: Stamp| {
            let (a, b) = (ticks[from as usize], ticks[to as usize]);
            // Some drivers reset the counter between submissions.
            let ns = b.saturating_sub(a) as f64 * period as f64;
            Duration::from_nanos(ns as u64)
        };
        Self {
            project: span(Stamp::Begin, Stamp::Projected),
            scan: span(Stamp::Projected, Stamp::Scanned),
            key_write: span(Stamp::Scanned, Stamp::KeysWritten),
            sort: span(Stamp::SortBegin, Stamp::Sorted),
        }
    }
}

/// Timestamp query set with its resolve and readback buffers.
pub(crate) struct GpuTimer {
    queries: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: wgpu::Buffer,
    period: f32,
}

impl GpuTimer {
    /// `None` unless the device can write timestamps between passes.
    pub fn new(ctx: &GpuContext) -> Option<Self> {
        if !ctx.supports_timestamps() {
            return None;
        }
        let bytes = STAMP_COUNT as u64 * std::mem::size_of::<u64>() as u64;
        let queries = ctx.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("Binning Timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: STAMP_COUNT,
        });
        let resolve = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Resolve Buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Readback Buffer"),
            size: bytes,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Some(Self {
            queries,
            resolve,
            readback,
            period: ctx.queue.get_timestamp_period(),
        })
    }

    pub fn stamp(&self, encoder: &mut wgpu::CommandEncoder, at: Stamp) {
        encoder.write_timestamp(&self.queries, at as u32);
    }

    /// Copy every stamp of the frame into the readback buffer. Record after [`Stamp::Sorted`].
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.resolve_query_set(&self.queries, 0..STAMP_COUNT, &self.resolve, 0);
        encoder.copy_buffer_to_buffer(&self.resolve, 0, &self.readback, 0, self.resolve.size());
    }

    /// Read the resolved stamps (blocking).
    pub fn read(&self, ctx: &GpuContext) -> Result<StageTimings> {
        let slice = self.readback.slice(..);
        map_read_blocking(ctx, slice)?;
        let timings = {
            let data = slice.get_mapped_range();
            StageTimings::from_ticks(bytemuck::cast_slice(&data), self.period)
        };
        self.readback.unmap();
        Ok(timings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_become_stage_durations() {
        let ticks = [100, 400, 500, 1_100, 5_000, 7_000];
        let t = StageTimings::from_ticks(&ticks, 2.0);
        assert_eq!(t.project, Duration::from_nanos(600));
        assert_eq!(t.scan, Duration::from_nanos(200));
        assert_eq!(t.key_write, Duration::from_nanos(1_200));
        assert_eq!(t.sort, Duration::from_nanos(4_000));
        assert_eq!(t.total(), Duration::from_nanos(6_000));
    }

    #[test]
    fn test_counter_reset_gives_zero_not_wrap() {
        let ticks = [900, 100, 200, 300, 50, 10];
        let t = StageTimings::from_ticks(&ticks, 1.0);
        assert_eq!(t.project, Duration::ZERO);
        assert_eq!(t.sort, Duration::ZERO);
        assert_eq!(t.scan, Duration::from_nanos(100));
    }
}
