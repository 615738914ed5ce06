//! WGSL compute shaders for the global sort.
//!
//! Radix (one pass per digit, least significant first):
//! 1. RADIX_HISTOGRAM: digit counts for every pass in one sweep
//! 2. RADIX_BIN_SCAN: exclusive scan of each pass's histogram
//! 3. RADIX_PASS: local split sort, lookback across groups, stable scatter
//!
//! Reduce-then-scan radix, no waits between workgroups (per digit pass):
//! 1. RADIX_REDUCE: per-group digit counts, stored digit-major
//! 2. RADIX_GROUP_SCAN: one workgroup scans all group counts in place
//! 3. RADIX_SCATTER: local split sort, then scatter to the scanned bases
//!
//! Bitonic: BITONIC_SHADER sorts segments of up to 512 pairs in shared memory.
//!
//! Radix templates carry `{RADIX_BITS}`, `{RADIX}` and `{MAX_PASSES}`
//! placeholders filled in by [`radix_shaders`].

/// Elements per radix workgroup, one per invocation.
pub const RADIX_PARTITION: u32 = 256;

/// Status words are `flag << 30 | value`; `lanes` words per group.
pub fn lookback_source(lanes: u32) -> String {
    LOOKBACK.replace("{LANES}", &lanes.to_string())
}

const LOOKBACK: &str = r#"
const LANES: u32 = {LANES}u;
const FLAG_LOCAL: u32 = 0x40000000u;
const FLAG_FINAL: u32 = 0x80000000u;
const FLAG_MASK: u32 = 0xc0000000u;
const VALUE_MASK: u32 = 0x3fffffffu;

// Publish `count` for (group, lane) and return the sum over earlier groups.
// Expects a `status: array<atomic<u32>>` storage binding.
fn resolve(group: u32, lane: u32, count: u32) -> u32 {
    let slot = group * LANES + lane;
    if (group == 0u) {
        atomicStore(&status[slot], FLAG_FINAL | count);
        return 0u;
    }
    atomicStore(&status[slot], FLAG_LOCAL | count);

    var prefix = 0u;
    var prev = group;
    loop {
        prev = prev - 1u;
        var word = atomicLoad(&status[prev * LANES + lane]);
        while ((word & FLAG_MASK) == 0u) {
            word = atomicLoad(&status[prev * LANES + lane]);
        }
        prefix = prefix + (word & VALUE_MASK);
        if ((word & FLAG_FINAL) != 0u || prev == 0u) {
            break;
        }
    }

    atomicStore(&status[slot], FLAG_FINAL | (prefix + count));
    return prefix;
}
"#;

const RADIX_COMMON: &str = r#"
const RADIX_BITS: u32 = {RADIX_BITS}u;
const RADIX: u32 = {RADIX}u;
const RADIX_MASK: u32 = {RADIX}u - 1u;
const MAX_PASSES: u32 = {MAX_PASSES}u;
const HIST_SIZE: u32 = {MAX_PASSES}u * {RADIX}u;

struct RadixParams {
    count: u32,
    shift: u32,
    pass_index: u32,
    num_passes: u32,
}

struct KeyValue {
    key: u32,
    value: u32,
}
"#;

/// Pass 1: per-pass digit histograms over the whole input.
const RADIX_HISTOGRAM: &str = r#"
@group(0) @binding(0) var<uniform> params: RadixParams;
@group(0) @binding(1) var<storage, read> keys: array<KeyValue>;
@group(0) @binding(2) var<storage, read_write> histogram: array<atomic<u32>>;

var<workgroup> s_hist: array<atomic<u32>, HIST_SIZE>;

@compute @workgroup_size(256)
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) wg_id: vec3<u32>,
    @builtin(num_workgroups) num_wg: vec3<u32>
) {
    let lid = local_id.x;
    for (var i = lid; i < HIST_SIZE; i = i + 256u) {
        atomicStore(&s_hist[i], 0u);
    }
    workgroupBarrier();

    let idx = (wg_id.x + wg_id.y * num_wg.x) * 256u + lid;
    if (idx < params.count) {
        let key = keys[idx].key;
        for (var p = 0u; p < params.num_passes; p = p + 1u) {
            let digit = (key >> (p * RADIX_BITS)) & RADIX_MASK;
            atomicAdd(&s_hist[p * RADIX + digit], 1u);
        }
    }
    workgroupBarrier();

    for (var i = lid; i < HIST_SIZE; i = i + 256u) {
        let c = atomicLoad(&s_hist[i]);
        if (c > 0u) {
            atomicAdd(&histogram[i], c);
        }
    }
}
"#;

/// Pass 2: one invocation per pass turns counts into digit bases.
const RADIX_BIN_SCAN: &str = r#"
@group(0) @binding(0) var<uniform> params: RadixParams;
@group(0) @binding(1) var<storage, read> histogram: array<u32>;
@group(0) @binding(2) var<storage, read_write> digit_base: array<u32>;

@compute @workgroup_size({MAX_PASSES})
fn main(@builtin(local_invocation_id) local_id: vec3<u32>) {
    let p = local_id.x;
    if (p >= params.num_passes) {
        return;
    }
    var acc = 0u;
    for (var d = 0u; d < RADIX; d = d + 1u) {
        let c = histogram[p * RADIX + d];
        digit_base[p * RADIX + d] = acc;
        acc = acc + c;
    }
}
"#;

/// Stable per-group split sort shared by both radix variants.
const LOCAL_SORT: &str = r#"
var<workgroup> s_key: array<u32, 256>;
var<workgroup> s_val: array<u32, 256>;
var<workgroup> s_scan: array<u32, 256>;
var<workgroup> s_count: array<atomic<u32>, RADIX>;
var<workgroup> s_local_start: array<u32, RADIX>;

// Digit counts of the group's first `n_valid` elements, and where each
// digit's run starts once the group is sorted.
fn count_digits(lid: u32, key: u32, n_valid: u32) {
    for (var i = lid; i < RADIX; i = i + 256u) {
        atomicStore(&s_count[i], 0u);
    }
    workgroupBarrier();
    if (lid < n_valid) {
        atomicAdd(&s_count[(key >> params.shift) & RADIX_MASK], 1u);
    }
    workgroupBarrier();
    for (var d = lid; d < RADIX; d = d + 256u) {
        var start = 0u;
        for (var e = 0u; e < d; e = e + 1u) {
            start = start + atomicLoad(&s_count[e]);
        }
        s_local_start[d] = start;
    }
    workgroupBarrier();
}

// Stable sort of the group by the current digit, one bit split at a time.
// Returns the element that lands at `lid`.
fn local_sort(lid: u32, kv: KeyValue) -> KeyValue {
    var key = kv.key;
    var val = kv.value;
    for (var bit = 0u; bit < RADIX_BITS; bit = bit + 1u) {
        let b = (((key >> params.shift) & RADIX_MASK) >> bit) & 1u;
        s_scan[lid] = 1u - b;
        workgroupBarrier();
        for (var offset = 1u; offset < 256u; offset = offset << 1u) {
            var add = 0u;
            if (lid >= offset) {
                add = s_scan[lid - offset];
            }
            workgroupBarrier();
            s_scan[lid] = s_scan[lid] + add;
            workgroupBarrier();
        }
        let zeros_incl = s_scan[lid];
        let total_zeros = s_scan[255];
        var dst = total_zeros + lid - zeros_incl;
        if (b == 0u) {
            dst = zeros_incl - 1u;
        }
        s_key[dst] = key;
        s_val[dst] = val;
        workgroupBarrier();
        key = s_key[lid];
        val = s_val[lid];
        workgroupBarrier();
    }
    return KeyValue(key, val);
}
"#;

/// Pass 3: one digit. Groups claim logical indices from `counters` so
/// lookback only ever waits on groups that already started.
const RADIX_PASS: &str = r#"
@group(0) @binding(0) var<uniform> params: RadixParams;
@group(0) @binding(1) var<storage, read> keys_in: array<KeyValue>;
@group(0) @binding(2) var<storage, read_write> keys_out: array<KeyValue>;
@group(0) @binding(3) var<storage, read> digit_base: array<u32>;
@group(0) @binding(4) var<storage, read_write> status: array<atomic<u32>>;
@group(0) @binding(5) var<storage, read_write> counters: array<atomic<u32>>;

var<workgroup> s_group: u32;
var<workgroup> s_prefix: array<u32, RADIX>;

@compute @workgroup_size(256)
fn main(@builtin(local_invocation_id) local_id: vec3<u32>) {
    let lid = local_id.x;
    if (lid == 0u) {
        s_group = atomicAdd(&counters[params.pass_index], 1u);
    }
    let group = workgroupUniformLoad(&s_group);
    if (group * 256u >= params.count) {
        return;
    }
    let n_valid = min(256u, params.count - group * 256u);

    // Padding sorts to the end: all-ones digit, and it follows every valid
    // element in input order
    var kv = KeyValue(0xffffffffu, 0u);
    if (lid < n_valid) {
        kv = keys_in[group * 256u + lid];
    }

    count_digits(lid, kv.key, n_valid);
    kv = local_sort(lid, kv);

    for (var d = lid; d < RADIX; d = d + 256u) {
        s_prefix[d] = resolve(group, d, atomicLoad(&s_count[d]));
    }
    workgroupBarrier();

    if (lid < n_valid) {
        let d = (kv.key >> params.shift) & RADIX_MASK;
        let dst = digit_base[params.pass_index * RADIX + d] + s_prefix[d] + (lid - s_local_start[d]);
        keys_out[dst] = kv;
    }
}
"#;

/// Reduce-scan pass 1: digit counts of each group. `group_sums` is
/// digit-major, `[digit * num_groups + group]`, so its exclusive scan is
/// the scatter base of every (digit, group).
const RADIX_REDUCE: &str = r#"
@group(0) @binding(0) var<uniform> params: RadixParams;
@group(0) @binding(1) var<storage, read> keys_in: array<KeyValue>;
@group(0) @binding(2) var<storage, read_write> group_sums: array<u32>;

var<workgroup> s_hist: array<atomic<u32>, RADIX>;

@compute @workgroup_size(256)
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) wg_id: vec3<u32>,
    @builtin(num_workgroups) num_wg: vec3<u32>
) {
    let lid = local_id.x;
    let group = wg_id.x + wg_id.y * num_wg.x;
    let num_groups = (params.count + 255u) / 256u;
    if (group >= num_groups) {
        return;
    }
    for (var i = lid; i < RADIX; i = i + 256u) {
        atomicStore(&s_hist[i], 0u);
    }
    workgroupBarrier();

    let idx = group * 256u + lid;
    if (idx < params.count) {
        atomicAdd(&s_hist[(keys_in[idx].key >> params.shift) & RADIX_MASK], 1u);
    }
    workgroupBarrier();

    for (var d = lid; d < RADIX; d = d + 256u) {
        group_sums[d * num_groups + group] = atomicLoad(&s_hist[d]);
    }
}
"#;

/// Reduce-scan pass 2: a single workgroup turns `group_sums` into an
/// exclusive prefix sum. Each invocation owns one contiguous chunk.
const RADIX_GROUP_SCAN: &str = r#"
@group(0) @binding(0) var<uniform> params: RadixParams;
@group(0) @binding(1) var<storage, read_write> group_sums: array<u32>;

var<workgroup> s_sums: array<u32, 256>;

@compute @workgroup_size(256)
fn main(@builtin(local_invocation_id) local_id: vec3<u32>) {
    let lid = local_id.x;
    let total = ((params.count + 255u) / 256u) * RADIX;
    let chunk = (total + 255u) / 256u;
    let start = min(lid * chunk, total);
    let end = min(start + chunk, total);

    var sum = 0u;
    for (var i = start; i < end; i = i + 1u) {
        sum = sum + group_sums[i];
    }
    s_sums[lid] = sum;
    workgroupBarrier();

    for (var offset = 1u; offset < 256u; offset = offset << 1u) {
        var add = 0u;
        if (lid >= offset) {
            add = s_sums[lid - offset];
        }
        workgroupBarrier();
        s_sums[lid] = s_sums[lid] + add;
        workgroupBarrier();
    }

    var acc = s_sums[lid] - sum;
    for (var i = start; i < end; i = i + 1u) {
        let c = group_sums[i];
        group_sums[i] = acc;
        acc = acc + c;
    }
}
"#;

/// Reduce-scan pass 3: stable scatter to the scanned (digit, group) bases.
const RADIX_SCATTER: &str = r#"
@group(0) @binding(0) var<uniform> params: RadixParams;
@group(0) @binding(1) var<storage, read> keys_in: array<KeyValue>;
@group(0) @binding(2) var<storage, read_write> keys_out: array<KeyValue>;
@group(0) @binding(3) var<storage, read> group_sums: array<u32>;

@compute @workgroup_size(256)
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) wg_id: vec3<u32>,
    @builtin(num_workgroups) num_wg: vec3<u32>
) {
    let lid = local_id.x;
    let group = wg_id.x + wg_id.y * num_wg.x;
    let num_groups = (params.count + 255u) / 256u;
    if (group >= num_groups) {
        return;
    }
    let n_valid = min(256u, params.count - group * 256u);

    var kv = KeyValue(0xffffffffu, 0u);
    if (lid < n_valid) {
        kv = keys_in[group * 256u + lid];
    }

    count_digits(lid, kv.key, n_valid);
    kv = local_sort(lid, kv);

    if (lid < n_valid) {
        let d = (kv.key >> params.shift) & RADIX_MASK;
        keys_out[group_sums[d * num_groups + group] + (lid - s_local_start[d])] = kv;
    }
}
"#;

/// Sources for one radix width.
pub struct RadixShaders {
    pub histogram: String,
    pub bin_scan: String,
    pub pass: String,
}

/// Sources for the reduce-then-scan radix variant.
pub struct ReduceScanShaders {
    pub reduce: String,
    pub group_scan: String,
    pub scatter: String,
}

/// Maximum passes for a digit width: every 32-bit key fits.
pub fn max_passes(radix_bits: u32) -> u32 {
    32u32.div_ceil(radix_bits)
}

fn fill_radix(radix_bits: u32, parts: &[&str]) -> String {
    let radix = 1u32 << radix_bits;
    let mut source = RADIX_COMMON.to_string();
    for part in parts {
        source.push('\n');
        source.push_str(part);
    }
    source
        .replace("{RADIX_BITS}", &radix_bits.to_string())
        .replace("{RADIX}", &radix.to_string())
        .replace("{MAX_PASSES}", &max_passes(radix_bits).to_string())
}

pub fn radix_shaders(radix_bits: u32) -> RadixShaders {
    let radix = 1u32 << radix_bits;
    RadixShaders {
        histogram: fill_radix(radix_bits, &[RADIX_HISTOGRAM]),
        bin_scan: fill_radix(radix_bits, &[RADIX_BIN_SCAN]),
        pass: format!(
            "{}\n{}",
            lookback_source(radix),
            fill_radix(radix_bits, &[LOCAL_SORT, RADIX_PASS])
        ),
    }
}

pub fn reduce_scan_shaders(radix_bits: u32) -> ReduceScanShaders {
    ReduceScanShaders {
        reduce: fill_radix(radix_bits, &[RADIX_REDUCE]),
        group_scan: fill_radix(radix_bits, &[RADIX_GROUP_SCAN]),
        scatter: fill_radix(radix_bits, &[LOCAL_SORT, RADIX_SCATTER]),
    }
}

/// Sorts each segment `[offsets[s], offsets[s] + counts[s])` of up to 512
/// pairs by (key, position), one workgroup per segment.
pub const BITONIC_SHADER: &str = r#"
struct BitonicParams {
    num_segments: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct KeyValue {
    key: u32,
    value: u32,
}

@group(0) @binding(0) var<uniform> params: BitonicParams;
@group(0) @binding(1) var<storage, read_write> keys: array<KeyValue>;
@group(0) @binding(2) var<storage, read> offsets: array<u32>;
@group(0) @binding(3) var<storage, read> counts: array<u32>;

const CAPACITY: u32 = 512u;
const SENTINEL: u32 = 0xffffffffu;

var<workgroup> s_base: u32;
var<workgroup> s_n: u32;
var<workgroup> s_keys: array<u32, 512>;
var<workgroup> s_idx: array<u32, 512>;
var<workgroup> s_vals: array<u32, 512>;

// Original position breaks ties, which makes the network stable
fn before(a: u32, b: u32) -> bool {
    return s_keys[a] < s_keys[b] || (s_keys[a] == s_keys[b] && s_idx[a] < s_idx[b]);
}

@compute @workgroup_size(256)
fn main(
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(workgroup_id) wg_id: vec3<u32>,
    @builtin(num_workgroups) num_wg: vec3<u32>
) {
    let lid = local_id.x;
    let segment = wg_id.x + wg_id.y * num_wg.x;
    if (segment >= params.num_segments) {
        return;
    }
    if (lid == 0u) {
        s_base = offsets[segment];
        s_n = counts[segment];
    }
    let base = workgroupUniformLoad(&s_base);
    let n = workgroupUniformLoad(&s_n);
    if (n <= 1u || n > CAPACITY) {
        return;
    }

    var size = 1u;
    while (size < n) {
        size = size << 1u;
    }

    for (var i = lid; i < size; i = i + 256u) {
        if (i < n) {
            let kv = keys[base + i];
            s_keys[i] = kv.key;
            s_vals[i] = kv.value;
            s_idx[i] = i;
        } else {
            s_keys[i] = SENTINEL;
            s_vals[i] = 0u;
            s_idx[i] = SENTINEL;
        }
    }
    workgroupBarrier();

    for (var k = 2u; k <= size; k = k << 1u) {
        for (var j = k >> 1u; j > 0u; j = j >> 1u) {
            if (lid < size / 2u) {
                let i = (lid / j) * 2u * j + lid % j;
                let l = i + j;
                let ascending = (i & k) == 0u;
                if (before(l, i) == ascending) {
                    let tk = s_keys[i];
                    let tv = s_vals[i];
                    let ti = s_idx[i];
                    s_keys[i] = s_keys[l];
                    s_vals[i] = s_vals[l];
                    s_idx[i] = s_idx[l];
                    s_keys[l] = tk;
                    s_vals[l] = tv;
                    s_idx[l] = ti;
                }
            }
            workgroupBarrier();
        }
    }

    for (var i = lid; i < n; i = i + 256u) {
        keys[base + i] = KeyValue(s_keys[i], s_vals[i]);
    }
}
"#;
