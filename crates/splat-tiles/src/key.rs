//! Composite sort keys.
//!
//! A key is a single `u32`: the tile id in the high bits and a quantized
//! view depth in the low bits, so raw integer order is tile-major,
//! depth-minor.

use serde::{Deserialize, Serialize};

/// Upper bound on tile id bits; leaves at least 12 bits of depth.
pub const MAX_TILE_BITS: u32 = 20;

/// Upper bound on depth bits; an `f32` in `[0, 1]` carries no more.
pub const MAX_DEPTH_BITS: u32 = 24;

/// Bit split of a composite key for a given tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLayout {
    pub tile_bits: u32,
    pub depth_bits: u32,
}

impl KeyLayout {
    /// Layout for a grid of `num_tiles` tiles.
    pub fn for_tiles(num_tiles: u32) -> Self {
        let tile_bits = bits_for(num_tiles).min(MAX_TILE_BITS);
        Self {
            tile_bits,
            depth_bits: (32 - tile_bits).min(MAX_DEPTH_BITS),
        }
    }

    /// Significant low bits of every key. The sorter ignores the rest.
    pub fn key_bits(&self) -> u32 {
        self.tile_bits + self.depth_bits
    }

    /// Largest quantized depth.
    pub fn depth_max(&self) -> u32 {
        (1u32 << self.depth_bits) - 1
    }

    /// Quantize a view depth linearly over `[znear, zfar]`.
    pub fn quantize_depth(&self, depth: f32, znear: f32, zfar: f32) -> u32 {
        let range = zfar - znear;
        let t = if range > 0.0 {
            ((depth - znear) / range).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let max = self.depth_max();
        ((t * max as f32) as u32).min(max)
    }

    pub fn compose(&self, tile: u32, depth_key: u32) -> u32 {
        (tile << self.depth_bits) | (depth_key & self.depth_max())
    }

    pub fn tile_of(&self, key: u32) -> u32 {
        key >> self.depth_bits
    }

    pub fn depth_of(&self, key: u32) -> u32 {
        key & self.depth_max()
    }
}

/// Number of bits needed to index `n` distinct values.
pub fn bits_for(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}

/// Radix passes needed to sort `key_bits` bits with `radix_bits`-wide digits.
pub fn radix_passes(key_bits: u32, radix_bits: u32) -> u32 {
    key_bits.div_ceil(radix_bits).max(1)
}

/// Map an `f32` to a `u32` with the same ordering, so depth bounds can be
/// tracked with integer atomic min/max.
pub fn ordered_depth(depth: f32) -> u32 {
    let bits = depth.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Inverse of [`ordered_depth`].
pub fn depth_from_ordered(ordered: u32) -> f32 {
    let bits = if ordered & 0x8000_0000 != 0 {
        ordered & 0x7FFF_FFFF
    } else {
        !ordered
    };
    f32::from_bits(bits)
}
