//! Invariant checks over a binned frame.
//!
//! Used by the tests and the CLI `verify` command against both the host and
//! the device pipeline.

use crate::{BinnedFrame, BinningError, KeyValue, Result};

fn fail<T>(msg: String) -> Result<T> {
    Err(BinningError::Inconsistent(msg))
}

/// Every fanout is counted exactly once per tile and every pair was written.
pub fn check_conservation(frame: &BinnedFrame) -> Result<()> {
    let fanouts: u64 = frame.projected.iter().map(|p| p.fanout as u64).sum();
    let counted: u64 = frame.counts.iter().map(|&c| c as u64).sum();
    if fanouts != counted {
        return fail(format!("fanout sum {fanouts} != tile count sum {counted}"));
    }
    if counted != frame.stats.num_pairs as u64 {
        return fail(format!(
            "tile count sum {counted} != reported pairs {}",
            frame.stats.num_pairs
        ));
    }
    if frame.keys.len() as u64 != counted {
        return fail(format!(
            "{} keys for {counted} pairs",
            frame.keys.len()
        ));
    }
    Ok(())
}

/// `offsets` is the exact exclusive prefix sum of `counts` and ends at `total`.
pub fn check_offsets(counts: &[u32], offsets: &[u32], total: u32) -> Result<()> {
    if counts.len() != offsets.len() {
        return fail(format!(
            "{} offsets for {} tiles",
            offsets.len(),
            counts.len()
        ));
    }
    let mut expected = 0u32;
    for (t, (&c, &o)) in counts.iter().zip(offsets).enumerate() {
        if o != expected {
            return fail(format!("offset[{t}] = {o}, expected {expected}"));
        }
        expected += c;
    }
    if expected != total {
        return fail(format!("offsets end at {expected}, expected {total}"));
    }
    Ok(())
}

/// Each tile's slice holds exactly the splats whose footprint covers it.
pub fn check_buckets(frame: &BinnedFrame) -> Result<()> {
    let mut expected: Vec<Vec<u32>> = vec![Vec::new(); frame.counts.len()];
    for (id, p) in frame.projected.iter().enumerate() {
        for (x, y) in p.tiles() {
            let t = frame.grid.tile_id(x, y) as usize;
            match expected.get_mut(t) {
                Some(ids) => ids.push(id as u32),
                None => return fail(format!("splat {id} covers tile {t} outside the grid")),
            }
        }
    }

    for (t, mut want) in expected.into_iter().enumerate() {
        let slice = frame.tile(t as u32);
        if slice.len() != want.len() {
            return fail(format!(
                "tile {t} holds {} pairs, footprints cover it {} times",
                slice.len(),
                want.len()
            ));
        }
        for kv in slice {
            if frame.layout.tile_of(kv.key) != t as u32 {
                return fail(format!("key {:#x} in bucket of tile {t}", kv.key));
            }
            let depth_key = frame
                .projected
                .get(kv.value as usize)
                .map(|p| p.depth_key);
            if depth_key != Some(frame.layout.depth_of(kv.key)) {
                return fail(format!(
                    "key {:#x} does not match splat {}",
                    kv.key, kv.value
                ));
            }
        }
        let mut got: Vec<u32> = slice.iter().map(|kv| kv.value).collect();
        got.sort_unstable();
        want.sort_unstable();
        if got != want {
            return fail(format!("tile {t} holds the wrong splats"));
        }
    }
    Ok(())
}

/// Each tile's slice is in non-decreasing key order.
pub fn check_sorted(frame: &BinnedFrame) -> Result<()> {
    for t in 0..frame.counts.len() as u32 {
        if let Some(i) = frame.tile(t).windows(2).position(|w| w[0].key > w[1].key) {
            return fail(format!("tile {t} out of order at position {i}"));
        }
    }
    Ok(())
}

/// All of the above plus a clean bound check.
pub fn check_frame(frame: &BinnedFrame) -> Result<()> {
    if frame.stats.overflow != 0 {
        return fail(format!(
            "{} key writes left their bucket",
            frame.stats.overflow
        ));
    }
    check_conservation(frame)?;
    check_offsets(&frame.counts, &frame.offsets, frame.stats.num_pairs)?;
    check_buckets(frame)?;
    check_sorted(frame)
}

/// `sorted` equals a stable sort of `input` by key.
pub fn check_stable_sort(input: &[KeyValue], sorted: &[KeyValue]) -> Result<()> {
    let mut expected = input.to_vec();
    expected.sort_by_key(|kv| kv.key);
    if let Some(i) = expected.iter().zip(sorted).position(|(a, b)| a != b) {
        return fail(format!(
            "first mismatch at {i}: expected {:?}, got {:?}",
            expected[i], sorted[i]
        ));
    }
    if expected.len() != sorted.len() {
        return fail(format!(
            "sorted {} pairs from {}",
            sorted.len(),
            expected.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_offsets() {
        assert!(check_offsets(&[3, 0, 2, 1], &[0, 3, 3, 5], 6).is_ok());
        assert!(check_offsets(&[3, 0, 2, 1], &[0, 3, 4, 5], 6).is_err());
        assert!(check_offsets(&[3, 0, 2, 1], &[0, 3, 3, 5], 7).is_err());
        assert!(check_offsets(&[], &[], 0).is_ok());
    }

    #[test]
    fn test_check_stable_sort() {
        let input = [KeyValue::new(2, 0), KeyValue::new(1, 1), KeyValue::new(2, 2)];
        let good = [KeyValue::new(1, 1), KeyValue::new(2, 0), KeyValue::new(2, 2)];
        let unstable = [KeyValue::new(1, 1), KeyValue::new(2, 2), KeyValue::new(2, 0)];
        assert!(check_stable_sort(&input, &good).is_ok());
        assert!(check_stable_sort(&input, &unstable).is_err());
        assert!(check_stable_sort(&input, &good[..2]).is_err());
    }
}
