//! WGSL compute shaders for the binning stages.
//!
//! 1. PROJECT_SHADER: project splats, count pairs per tile, accumulate stats
//! 2. SCAN_SHADER: exclusive prefix sum of tile counts (decoupled lookback)
//! 3. KEY_WRITE_SHADER: scatter composite keys at per-tile cursors

use crate::sort_shaders::lookback_source;

/// Pass 1: one invocation per splat.
pub const PROJECT_SHADER: &str = r#"
struct Splat {
    position: vec3<f32>,
    radius: f32,
}

struct Camera {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    viewport: vec2<f32>,
    znear: f32,
    zfar: f32,
    tiles: vec2<u32>,
    tile_size: u32,
    _pad: u32,
}

struct Params {
    num_primitives: u32,
    num_tiles: u32,
    depth_bits: u32,
    max_pairs: u32,
    max_footprint: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct Projected {
    depth: f32,
    depth_key: u32,
    fanout: u32,
    _pad: u32,
    rect: vec4<u32>,
}

struct Stats {
    num_pairs: atomic<u32>,
    num_visible: atomic<u32>,
    min_depth: atomic<u32>,
    max_depth: atomic<u32>,
    max_tile_count: atomic<u32>,
    overflow: atomic<u32>,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> params: Params;
@group(0) @binding(2) var<storage, read> splats: array<Splat>;
@group(0) @binding(3) var<storage, read_write> projected: array<Projected>;
@group(0) @binding(4) var<storage, read_write> tile_counts: array<atomic<u32>>;
@group(0) @binding(5) var<storage, read_write> stats: Stats;

fn is_finite(x: f32) -> bool {
    return (bitcast<u32>(x) & 0x7f800000u) != 0x7f800000u;
}

// Order-preserving f32 -> u32 so depth bounds work with atomicMin/atomicMax
fn ordered_depth(d: f32) -> u32 {
    let bits = bitcast<u32>(d);
    return select(bits | 0x80000000u, ~bits, (bits & 0x80000000u) != 0u);
}

// Inclusive tile range along one axis; x > y means empty.
fn axis_span(center: f32, radius: f32, tile_size: f32, tiles: u32, max_span: u32) -> vec2<i32> {
    let n = f32(tiles);
    // Clamp in float first so the integer conversion never saturates
    var lo = i32(clamp(floor((center - radius) / tile_size), -1.0, n));
    var hi = i32(clamp(floor((center + radius) / tile_size), -1.0, n));
    var mid = i32(clamp(floor(center / tile_size), -1.0, n));

    let count = i32(tiles);
    if (hi < 0 || lo >= count) {
        return vec2<i32>(1, 0);
    }
    lo = max(lo, 0);
    hi = min(hi, count - 1);

    let span = i32(max(max_span, 1u));
    if (hi - lo + 1 > span) {
        mid = clamp(mid, lo, hi);
        let start = min(max(mid - (span - 1) / 2, lo), hi - (span - 1));
        return vec2<i32>(start, start + span - 1);
    }
    return vec2<i32>(lo, hi);
}

@compute @workgroup_size(256)
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) wg_id: vec3<u32>,
    @builtin(num_workgroups) num_wg: vec3<u32>
) {
    let idx = (wg_id.x + wg_id.y * num_wg.x) * 256u + local_id.x;
    if (idx >= params.num_primitives) {
        return;
    }

    // Culled unless proven visible below
    projected[idx] = Projected(0.0, 0u, 0u, 0u, vec4<u32>(0u));

    let splat = splats[idx];
    let view_pos = camera.view * vec4<f32>(splat.position, 1.0);
    let depth = -view_pos.z;
    if (!is_finite(depth) || !is_finite(splat.radius) || splat.radius < 0.0) {
        return;
    }
    if (depth < camera.znear || depth > camera.zfar) {
        return;
    }

    let clip = camera.proj * view_pos;
    if (clip.w <= 0.0) {
        return;
    }
    let ndc = clip.xy / clip.w;
    let px = (ndc.x * 0.5 + 0.5) * camera.viewport.x;
    let py = (0.5 - ndc.y * 0.5) * camera.viewport.y;
    let radius_px = splat.radius * camera.proj[1][1] * 0.5 * camera.viewport.y / depth;
    if (!is_finite(px) || !is_finite(py) || !is_finite(radius_px)) {
        return;
    }

    let tile_size = f32(camera.tile_size);
    let xs = axis_span(px, radius_px, tile_size, camera.tiles.x, params.max_footprint);
    let ys = axis_span(py, radius_px, tile_size, camera.tiles.y, params.max_footprint);
    if (xs.x > xs.y || ys.x > ys.y) {
        return;
    }
    let x0 = u32(xs.x);
    let x1 = u32(xs.y);
    let y0 = u32(ys.x);
    let y1 = u32(ys.y);
    let fanout = (x1 - x0 + 1u) * (y1 - y0 + 1u);

    let depth_max = (1u << params.depth_bits) - 1u;
    let range = camera.zfar - camera.znear;
    var t = 0.0;
    if (range > 0.0) {
        t = clamp((depth - camera.znear) / range, 0.0, 1.0);
    }
    let depth_key = min(u32(t * f32(depth_max)), depth_max);

    projected[idx] = Projected(depth, depth_key, fanout, 0u, vec4<u32>(x0, y0, x1, y1));

    atomicAdd(&stats.num_pairs, fanout);
    atomicAdd(&stats.num_visible, 1u);
    atomicMin(&stats.min_depth, ordered_depth(depth));
    atomicMax(&stats.max_depth, ordered_depth(depth));

    for (var y = y0; y <= y1; y = y + 1u) {
        for (var x = x0; x <= x1; x = x + 1u) {
            let old = atomicAdd(&tile_counts[y * camera.tiles.x + x], 1u);
            atomicMax(&stats.max_tile_count, old + 1u);
        }
    }
}
"#;

/// Pass 2 body; prefixed with the lookback helpers for a single lane.
const SCAN_BODY: &str = r#"
struct ScanParams {
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(0) @binding(0) var<uniform> params: ScanParams;
@group(0) @binding(1) var<storage, read> input: array<u32>;
@group(0) @binding(2) var<storage, read_write> output: array<u32>;
@group(0) @binding(3) var<storage, read_write> status: array<atomic<u32>>;
@group(0) @binding(4) var<storage, read_write> group_counter: atomic<u32>;

var<workgroup> s_group: u32;
var<workgroup> s_scan: array<u32, 256>;
var<workgroup> s_prefix: u32;

@compute @workgroup_size(256)
fn main(@builtin(local_invocation_id) local_id: vec3<u32>) {
    let lid = local_id.x;

    // Logical group index in launch order, not the hardware workgroup id
    if (lid == 0u) {
        s_group = atomicAdd(&group_counter, 1u);
    }
    let group = workgroupUniformLoad(&s_group);
    if (group * 256u >= params.count) {
        return;
    }

    let idx = group * 256u + lid;
    var value = 0u;
    if (idx < params.count) {
        value = input[idx];
    }
    s_scan[lid] = value;
    workgroupBarrier();

    // Inclusive Hillis-Steele scan within the group
    for (var offset = 1u; offset < 256u; offset = offset << 1u) {
        var add = 0u;
        if (lid >= offset) {
            add = s_scan[lid - offset];
        }
        workgroupBarrier();
        s_scan[lid] = s_scan[lid] + add;
        workgroupBarrier();
    }

    if (lid == 0u) {
        s_prefix = resolve(group, 0u, s_scan[255]);
    }
    workgroupBarrier();

    if (idx < params.count) {
        output[idx] = s_prefix + s_scan[lid] - value;
    }
}
"#;

/// Pass 2: exclusive prefix sum over tile counts.
pub fn scan_shader() -> String {
    format!("{}\n{}", lookback_source(1), SCAN_BODY)
}

/// Pass 3 source. `CHECK_BOUNDS` is baked in so release builds carry no
/// bucket check at all.
const KEY_WRITE_BODY: &str = r#"
struct Camera {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    viewport: vec2<f32>,
    znear: f32,
    zfar: f32,
    tiles: vec2<u32>,
    tile_size: u32,
    _pad: u32,
}

struct Params {
    num_primitives: u32,
    num_tiles: u32,
    depth_bits: u32,
    max_pairs: u32,
    max_footprint: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct Projected {
    depth: f32,
    depth_key: u32,
    fanout: u32,
    _pad: u32,
    rect: vec4<u32>,
}

struct KeyValue {
    key: u32,
    value: u32,
}

struct Stats {
    num_pairs: atomic<u32>,
    num_visible: atomic<u32>,
    min_depth: atomic<u32>,
    max_depth: atomic<u32>,
    max_tile_count: atomic<u32>,
    overflow: atomic<u32>,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> params: Params;
@group(0) @binding(2) var<storage, read> projected: array<Projected>;
@group(0) @binding(3) var<storage, read> offsets: array<u32>;
@group(0) @binding(4) var<storage, read> counts: array<u32>;
@group(0) @binding(5) var<storage, read_write> cursors: array<atomic<u32>>;
@group(0) @binding(6) var<storage, read_write> keys: array<KeyValue>;
@group(0) @binding(7) var<storage, read_write> stats: Stats;

@compute @workgroup_size(256)
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) wg_id: vec3<u32>,
    @builtin(num_workgroups) num_wg: vec3<u32>
) {
    let idx = (wg_id.x + wg_id.y * num_wg.x) * 256u + local_id.x;
    if (idx >= params.num_primitives) {
        return;
    }
    let p = projected[idx];
    if (p.fanout == 0u) {
        return;
    }

    for (var y = p.rect.y; y <= p.rect.w; y = y + 1u) {
        for (var x = p.rect.x; x <= p.rect.z; x = x + 1u) {
            let tile = y * camera.tiles.x + x;
            let slot = atomicAdd(&cursors[tile], 1u);
            if (CHECK_BOUNDS && (slot < offsets[tile] || slot >= offsets[tile] + counts[tile])) {
                atomicAdd(&stats.overflow, 1u);
                continue;
            }
            if (slot >= params.max_pairs) {
                continue;
            }
            keys[slot] = KeyValue((tile << params.depth_bits) | p.depth_key, idx);
        }
    }
}
"#;

/// Pass 3: scatter one key per covered tile.
pub fn key_write_shader(check_bounds: bool) -> String {
    format!("const CHECK_BOUNDS: bool = {check_bounds};\n{KEY_WRITE_BODY}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_write_shader_bakes_flag() {
        assert!(key_write_shader(true).starts_with("const CHECK_BOUNDS: bool = true;"));
        assert!(key_write_shader(false).starts_with("const CHECK_BOUNDS: bool = false;"));
    }

    #[test]
    fn test_scan_shader_includes_lookback() {
        let src = scan_shader();
        assert!(src.contains("fn resolve("));
        assert!(src.contains("const LANES: u32 = 1u;"));
    }
}
