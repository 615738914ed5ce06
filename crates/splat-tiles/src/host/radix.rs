//! LSD radix sort with one decoupled-lookback pass per digit.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::lookback::{GroupCounter, StatusTable};
use super::Dispatch;
use crate::key::radix_passes;
use crate::{KeyValue, RadixScheme};

/// Elements per host workgroup. Larger than the GPU's to amortize lookback.
pub const HOST_PARTITION: usize = 4096;

fn pack(kv: KeyValue) -> u64 {
    ((kv.key as u64) << 32) | kv.value as u64
}

fn unpack(word: u64) -> KeyValue {
    KeyValue {
        key: (word >> 32) as u32,
        value: word as u32,
    }
}

/// Stable radix sort of key/value pairs on the host.
#[derive(Debug, Clone)]
pub struct HostRadixSorter {
    radix_bits: u32,
    partition: usize,
    scheme: RadixScheme,
    dispatch: Dispatch,
}

impl HostRadixSorter {
    pub fn new(dispatch: Dispatch, radix_bits: u32) -> Self {
        Self {
            radix_bits: radix_bits.clamp(1, 16),
            partition: HOST_PARTITION,
            scheme: RadixScheme::Lookback,
            dispatch,
        }
    }

    pub fn with_partition(mut self, partition: usize) -> Self {
        self.partition = partition.max(1);
        self
    }

    pub fn with_scheme(mut self, scheme: RadixScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn radix_bits(&self) -> u32 {
        self.radix_bits
    }

    pub fn scheme(&self) -> RadixScheme {
        self.scheme
    }

    /// Sort `pairs` by the low `key_bits` bits of their keys. Higher key bits
    /// must be zero.
    pub fn sort(&self, pairs: &mut [KeyValue], key_bits: u32) {
        let n = pairs.len();
        if n <= 1 {
            return;
        }
        let passes = radix_passes(key_bits.min(32), self.radix_bits) as usize;

        let mut src: Vec<AtomicU64> = pairs.iter().map(|&kv| AtomicU64::new(pack(kv))).collect();
        let mut dst: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();

        match self.scheme {
            RadixScheme::Lookback => self.lookback_passes(pairs, &mut src, &mut dst, passes),
            RadixScheme::ReduceScan => self.reduce_scan_passes(&mut src, &mut dst, passes),
        }

        for (slot, word) in pairs.iter_mut().zip(src) {
            *slot = unpack(word.into_inner());
        }
    }

    /// One kernel per digit; digit prefixes chain across groups through the
    /// status table. Leaves the result in `src`.
    fn lookback_passes(
        &self,
        pairs: &[KeyValue],
        src: &mut Vec<AtomicU64>,
        dst: &mut Vec<AtomicU64>,
        passes: usize,
    ) {
        let n = pairs.len();
        let radix = 1usize << self.radix_bits;
        let mask = (radix - 1) as u32;
        let num_groups = n.div_ceil(self.partition);

        let digit_base = self.global_digit_bases(pairs, passes);
        let mut table = StatusTable::new(num_groups, radix);
        let mut counter = GroupCounter::new();

        for pass in 0..passes {
            let shift = pass as u32 * self.radix_bits;
            let bases = &digit_base[pass * radix..(pass + 1) * radix];
            table.clear();
            counter.reset();

            let (input, output, table, counter) = (&*src, &*dst, &table, &counter);
            self.dispatch.run(num_groups as u32, |_| {
                let group = counter.claim() as usize;
                let start = group * self.partition;
                let end = (start + self.partition).min(n);
                let digit_of = |word: u64| ((unpack(word).key >> shift) & mask) as usize;

                // Local histogram; the scatter below walks the group in input
                // order, which keeps equal digits stable.
                let local: Vec<u64> = input[start..end]
                    .iter()
                    .map(|w| w.load(Ordering::Relaxed))
                    .collect();
                let mut counts = vec![0u32; radix];
                for &word in &local {
                    counts[digit_of(word)] += 1;
                }

                let group_prefix = table.resolve(group, &counts);

                let mut rank = vec![0u32; radix];
                for &word in &local {
                    let d = digit_of(word);
                    let dst_index = bases[d] + group_prefix[d] + rank[d];
                    rank[d] += 1;
                    output[dst_index as usize].store(word, Ordering::Relaxed);
                }
                debug_assert_eq!(rank, counts);
            });

            std::mem::swap(src, dst);
        }
    }

    /// Three kernels per digit: group counts (digit-major), one sequential
    /// scan over them, then the scatter. No group waits on another. Leaves
    /// the result in `src`.
    fn reduce_scan_passes(
        &self,
        src: &mut Vec<AtomicU64>,
        dst: &mut Vec<AtomicU64>,
        passes: usize,
    ) {
        let n = src.len();
        let radix = 1usize << self.radix_bits;
        let mask = (radix - 1) as u32;
        let num_groups = n.div_ceil(self.partition);

        for pass in 0..passes {
            let shift = pass as u32 * self.radix_bits;
            let digit_of = |word: u64| ((unpack(word).key >> shift) & mask) as usize;
            let group_range = |group: usize| {
                let start = group * self.partition;
                start..(start + self.partition).min(n)
            };

            let sums: Vec<AtomicU32> = (0..radix * num_groups).map(|_| AtomicU32::new(0)).collect();
            let input = &*src;
            self.dispatch.run(num_groups as u32, |group| {
                let group = group as usize;
                let mut counts = vec![0u32; radix];
                for word in &input[group_range(group)] {
                    counts[digit_of(word.load(Ordering::Relaxed))] += 1;
                }
                for (d, &c) in counts.iter().enumerate() {
                    sums[d * num_groups + group].store(c, Ordering::Relaxed);
                }
            });

            let mut bases: Vec<u32> = sums.into_iter().map(AtomicU32::into_inner).collect();
            let mut acc = 0u32;
            for base in bases.iter_mut() {
                let c = *base;
                *base = acc;
                acc += c;
            }
            debug_assert_eq!(acc as usize, n);

            let (bases, output) = (&bases, &*dst);
            self.dispatch.run(num_groups as u32, |group| {
                let group = group as usize;
                let mut cursor: Vec<u32> =
                    (0..radix).map(|d| bases[d * num_groups + group]).collect();
                for word in &input[group_range(group)] {
                    let word = word.load(Ordering::Relaxed);
                    let d = digit_of(word);
                    output[cursor[d] as usize].store(word, Ordering::Relaxed);
                    cursor[d] += 1;
                }
            });

            std::mem::swap(src, dst);
        }
    }

    /// Exclusive digit offsets for every pass, from one histogram sweep.
    fn global_digit_bases(&self, pairs: &[KeyValue], passes: usize) -> Vec<u32> {
        let radix = 1usize << self.radix_bits;
        let mask = (radix - 1) as u32;
        let histogram: Vec<AtomicU32> = (0..passes * radix).map(|_| AtomicU32::new(0)).collect();

        let chunks: Vec<&[KeyValue]> = pairs.chunks(self.partition).collect();
        self.dispatch.run_each(chunks, |chunk| {
            let mut local = vec![0u32; passes * radix];
            for kv in chunk {
                for pass in 0..passes {
                    let d = (kv.key >> (pass as u32 * self.radix_bits)) & mask;
                    local[pass * radix + d as usize] += 1;
                }
            }
            for (bin, &c) in histogram.iter().zip(&local) {
                if c > 0 {
                    bin.fetch_add(c, Ordering::Relaxed);
                }
            }
        });

        let mut bases: Vec<u32> = histogram.into_iter().map(AtomicU32::into_inner).collect();
        for pass_bins in bases.chunks_mut(radix) {
            let mut acc = 0;
            for bin in pass_bins {
                let c = *bin;
                *bin = acc;
                acc += c;
            }
        }
        bases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LaunchOrder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_pairs(n: usize, key_bits: u32, seed: u64) -> Vec<KeyValue> {
        let mut rng = StdRng::seed_from_u64(seed);
        let max = if key_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << key_bits) - 1
        };
        (0..n)
            .map(|i| KeyValue::new(rng.random_range(0..=max), i as u32))
            .collect()
    }

    fn reference(pairs: &[KeyValue]) -> Vec<KeyValue> {
        let mut expected = pairs.to_vec();
        expected.sort_by_key(|kv| kv.key);
        expected
    }

    #[test]
    fn test_sorts_full_width_keys_4bit() {
        let mut pairs = random_pairs(10_000, 32, 1);
        let expected = reference(&pairs);
        HostRadixSorter::new(Dispatch::new(4), 4)
            .with_partition(256)
            .sort(&mut pairs, 32);
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_sorts_partial_key_width_8bit() {
        let mut pairs = random_pairs(5_000, 13, 2);
        let expected = reference(&pairs);
        HostRadixSorter::new(Dispatch::new(4), 8)
            .with_partition(300)
            .sort(&mut pairs, 13);
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_is_stable_with_duplicates() {
        let mut pairs: Vec<KeyValue> = (0..3000).map(|i| KeyValue::new(i % 7, i)).collect();
        let expected = reference(&pairs);
        HostRadixSorter::new(Dispatch::new(3).with_order(LaunchOrder::Reversed), 4)
            .with_partition(128)
            .sort(&mut pairs, 3);
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_sorted_input_is_unchanged() {
        let mut pairs = reference(&random_pairs(4000, 20, 3));
        let before = pairs.clone();
        HostRadixSorter::new(Dispatch::new(2), 8)
            .with_partition(256)
            .sort(&mut pairs, 20);
        assert_eq!(pairs, before);
    }

    #[test]
    fn test_reduce_scan_matches_lookback() {
        let pairs = random_pairs(20_000, 24, 5);
        let dispatch = Dispatch::new(4).with_order(LaunchOrder::Reversed);
        let mut lookback = pairs.clone();
        HostRadixSorter::new(dispatch.clone(), 8)
            .with_partition(256)
            .sort(&mut lookback, 24);
        let mut reduce_scan = pairs.clone();
        HostRadixSorter::new(dispatch, 8)
            .with_partition(256)
            .with_scheme(RadixScheme::ReduceScan)
            .sort(&mut reduce_scan, 24);
        assert_eq!(reduce_scan, lookback);
        assert_eq!(reduce_scan, reference(&pairs));
    }

    #[test]
    fn test_reduce_scan_is_stable_with_partial_group() {
        let mut pairs: Vec<KeyValue> = (0..1000).map(|i| KeyValue::new((i * 7) % 5, i)).collect();
        let expected = reference(&pairs);
        HostRadixSorter::new(Dispatch::new(3), 4)
            .with_partition(300)
            .with_scheme(RadixScheme::ReduceScan)
            .sort(&mut pairs, 3);
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_shuffled_launch_order_converges() {
        let mut pairs = random_pairs(50_000, 32, 4);
        let expected = reference(&pairs);
        let dispatch = Dispatch::new(8).with_order(LaunchOrder::Shuffled(99));
        HostRadixSorter::new(dispatch, 8)
            .with_partition(256)
            .sort(&mut pairs, 32);
        assert_eq!(pairs, expected);
    }
}
