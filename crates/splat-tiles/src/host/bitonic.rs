//! Bitonic sorting network over a single workgroup's worth of pairs.

use super::Dispatch;
use crate::{BinningError, KeyValue, Result, BITONIC_CAPACITY};

/// Sort one segment of at most [`BITONIC_CAPACITY`] pairs.
///
/// Pads to the next power of two with sentinels and runs the full network.
/// Ties are broken by original position, so the result equals a stable sort.
pub fn sort_segment(segment: &mut [KeyValue]) -> Result<()> {
    let n = segment.len();
    if n > BITONIC_CAPACITY as usize {
        return Err(BinningError::CapacityExceeded {
            required: n as u64,
            capacity: BITONIC_CAPACITY,
        });
    }
    if n <= 1 {
        return Ok(());
    }

    let padded = n.next_power_of_two();
    // (key, original position); sentinels sort after every real element.
    let mut lanes: Vec<(u32, u32)> = (0..padded)
        .map(|i| match segment.get(i) {
            Some(kv) => (kv.key, i as u32),
            None => (u32::MAX, u32::MAX),
        })
        .collect();

    let mut k = 2;
    while k <= padded {
        let mut j = k / 2;
        while j > 0 {
            // One step: each "thread" t owns the pair (i, i + j).
            for t in 0..padded / 2 {
                let i = (t / j) * 2 * j + (t % j);
                let l = i + j;
                let ascending = i & k == 0;
                if (lanes[i] > lanes[l]) == ascending {
                    lanes.swap(i, l);
                }
            }
            j /= 2;
        }
        k *= 2;
    }

    let original: Vec<KeyValue> = segment.to_vec();
    for (slot, &(_, from)) in segment.iter_mut().zip(&lanes) {
        *slot = original[from as usize];
    }
    Ok(())
}

/// Sort every tile bucket independently, one workgroup per tile.
pub fn sort_tiles(
    dispatch: &Dispatch,
    keys: &mut [KeyValue],
    offsets: &[u32],
    counts: &[u32],
) -> Result<()> {
    if let Some(&largest) = counts.iter().max() {
        if largest > BITONIC_CAPACITY {
            return Err(BinningError::CapacityExceeded {
                required: largest as u64,
                capacity: BITONIC_CAPACITY,
            });
        }
    }

    let mut segments = Vec::with_capacity(counts.len());
    let mut rest = keys;
    let mut cursor = 0usize;
    for (&offset, &count) in offsets.iter().zip(counts) {
        let skip = offset as usize - cursor;
        let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
        let (segment, tail) = tail.split_at_mut(count as usize);
        rest = tail;
        cursor = offset as usize + count as usize;
        if count > 1 {
            segments.push(segment);
        }
    }

    // Every segment holds at most BITONIC_CAPACITY pairs, checked above.
    dispatch.run_each(segments, |segment| {
        let sorted = sort_segment(segment);
        debug_assert!(sorted.is_ok(), "tile segment above bitonic capacity");
    });
    Ok(())
}
