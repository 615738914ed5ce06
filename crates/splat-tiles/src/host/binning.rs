//! Projector and key writer stages on the host.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::Dispatch;
use crate::key::ordered_depth;
use crate::projector::project;
use crate::{CameraUniform, FrameStats, KeyLayout, KeyValue, ProjectedSplat, Splat, WORKGROUP_SIZE};

/// Frame aggregates updated concurrently by the projector and key writer.
#[derive(Debug)]
pub struct AtomicFrameStats {
    pub num_pairs: AtomicU32,
    pub num_visible: AtomicU32,
    pub min_depth: AtomicU32,
    pub max_depth: AtomicU32,
    pub max_tile_count: AtomicU32,
    pub overflow: AtomicU32,
}

impl Default for AtomicFrameStats {
    fn default() -> Self {
        let cleared = FrameStats::cleared();
        Self {
            num_pairs: AtomicU32::new(cleared.num_pairs),
            num_visible: AtomicU32::new(cleared.num_visible),
            min_depth: AtomicU32::new(cleared.min_depth),
            max_depth: AtomicU32::new(cleared.max_depth),
            max_tile_count: AtomicU32::new(cleared.max_tile_count),
            overflow: AtomicU32::new(cleared.overflow),
        }
    }
}

impl AtomicFrameStats {
    pub fn snapshot(&self) -> FrameStats {
        FrameStats {
            num_pairs: self.num_pairs.load(Ordering::Relaxed),
            num_visible: self.num_visible.load(Ordering::Relaxed),
            min_depth: self.min_depth.load(Ordering::Relaxed),
            max_depth: self.max_depth.load(Ordering::Relaxed),
            max_tile_count: self.max_tile_count.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
            _pad: [0; 2],
        }
    }
}

/// Projector output for a whole frame.
#[derive(Debug, Clone)]
pub struct Projection {
    pub projected: Vec<ProjectedSplat>,
    pub counts: Vec<u32>,
    pub stats: FrameStats,
}

/// Project every splat, count pairs per tile and accumulate frame stats.
pub fn project_splats(
    dispatch: &Dispatch,
    splats: &[Splat],
    camera: &CameraUniform,
    layout: &KeyLayout,
    max_footprint: u32,
) -> Projection {
    let grid = camera.grid();
    let counts: Vec<AtomicU32> = (0..grid.num_tiles()).map(|_| AtomicU32::new(0)).collect();
    let stats = AtomicFrameStats::default();
    let mut projected = vec![ProjectedSplat::default(); splats.len()];

    let chunk = WORKGROUP_SIZE as usize;
    let groups: Vec<_> = projected.chunks_mut(chunk).zip(splats.chunks(chunk)).collect();
    dispatch.run_each(groups, |(out, input)| {
        for (slot, splat) in out.iter_mut().zip(input) {
            let p = project(splat, camera, layout, max_footprint);
            *slot = p;
            if !p.is_visible() {
                continue;
            }
            stats.num_pairs.fetch_add(p.fanout, Ordering::Relaxed);
            stats.num_visible.fetch_add(1, Ordering::Relaxed);
            stats.min_depth.fetch_min(ordered_depth(p.depth), Ordering::Relaxed);
            stats.max_depth.fetch_max(ordered_depth(p.depth), Ordering::Relaxed);
            for (x, y) in p.tiles() {
                let old = counts[grid.tile_id(x, y) as usize].fetch_add(1, Ordering::Relaxed);
                stats.max_tile_count.fetch_max(old + 1, Ordering::Relaxed);
            }
        }
    });

    Projection {
        projected,
        counts: counts.into_iter().map(AtomicU32::into_inner).collect(),
        stats: stats.snapshot(),
    }
}

/// Key writer output.
#[derive(Debug, Clone)]
pub struct WrittenKeys {
    pub keys: Vec<KeyValue>,
    /// Slots that fell outside their tile bucket
    pub overflow: u32,
}

/// Scatter one pair per covered tile at `cursor[tile]++`.
///
/// `num_pairs` sizes the output; slots past it are dropped. With
/// `check_bounds`, a slot outside `[offsets[t], offsets[t] + counts[t])` is
/// counted in `overflow` instead of written.
#[allow(clippy::too_many_arguments)]
pub fn write_keys(
    dispatch: &Dispatch,
    projected: &[ProjectedSplat],
    camera: &CameraUniform,
    layout: &KeyLayout,
    offsets: &[u32],
    counts: &[u32],
    num_pairs: u32,
    check_bounds: bool,
) -> WrittenKeys {
    let grid = camera.grid();
    // Running cursors start as a copy; the offset table stays untouched.
    let cursors: Vec<AtomicU32> = offsets.iter().map(|&o| AtomicU32::new(o)).collect();
    let slots: Vec<AtomicU64> = (0..num_pairs).map(|_| AtomicU64::new(0)).collect();
    let overflow = AtomicU32::new(0);

    let chunk = WORKGROUP_SIZE as usize;
    let groups: Vec<_> = projected.chunks(chunk).enumerate().collect();
    dispatch.run_each(groups, |(group, input)| {
        for (i, p) in input.iter().enumerate() {
            let id = (group * chunk + i) as u32;
            for (x, y) in p.tiles() {
                let tile = grid.tile_id(x, y);
                let t = tile as usize;
                let slot = cursors[t].fetch_add(1, Ordering::Relaxed);
                if check_bounds && (slot < offsets[t] || slot >= offsets[t] + counts[t]) {
                    overflow.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let Some(cell) = slots.get(slot as usize) else {
                    continue;
                };
                let kv = KeyValue::new(layout.compose(tile, p.depth_key), id);
                cell.store(((kv.key as u64) << 32) | kv.value as u64, Ordering::Relaxed);
            }
        }
    });

    WrittenKeys {
        keys: slots
            .into_iter()
            .map(|cell| {
                let word = cell.into_inner();
                KeyValue::new((word >> 32) as u32, word as u32)
            })
            .collect(),
        overflow: overflow.into_inner(),
    }
}
