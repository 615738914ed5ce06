//! Exclusive prefix sum with decoupled lookback.

use std::sync::atomic::{AtomicU32, Ordering};

use super::lookback::{GroupCounter, StatusTable};
use super::Dispatch;
use crate::WORKGROUP_SIZE;

/// Exclusive prefix sum of `input`, returning the offsets and the total.
///
/// Works for any length. The total must stay below `2^30`.
pub fn exclusive_scan(dispatch: &Dispatch, input: &[u32]) -> (Vec<u32>, u32) {
    exclusive_scan_with_partition(dispatch, input, WORKGROUP_SIZE as usize)
}

/// [`exclusive_scan`] with an explicit number of elements per group.
pub fn exclusive_scan_with_partition(
    dispatch: &Dispatch,
    input: &[u32],
    partition: usize,
) -> (Vec<u32>, u32) {
    if input.is_empty() {
        return (Vec::new(), 0);
    }
    let partition = partition.max(1);
    let num_groups = input.len().div_ceil(partition);
    let table = StatusTable::new(num_groups, 1);
    let counter = GroupCounter::new();
    let output: Vec<AtomicU32> = (0..input.len()).map(|_| AtomicU32::new(0)).collect();

    dispatch.run(num_groups as u32, |_| {
        let group = counter.claim() as usize;
        let start = group * partition;
        let end = (start + partition).min(input.len());
        let chunk = &input[start..end];

        let aggregate: u32 = chunk.iter().sum();
        let mut running = table.resolve(group, &[aggregate])[0];
        for (slot, &v) in output[start..end].iter().zip(chunk) {
            slot.store(running, Ordering::Relaxed);
            running += v;
        }
    });

    let offsets: Vec<u32> = output.into_iter().map(AtomicU32::into_inner).collect();
    let total = offsets[offsets.len() - 1] + input[input.len() - 1];
    (offsets, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LaunchOrder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn reference(input: &[u32]) -> Vec<u32> {
        input
            .iter()
            .scan(0u32, |acc, &v| {
                let out = *acc;
                *acc += v;
                Some(out)
            })
            .collect()
    }

    #[test]
    fn test_scan_small_example() {
        let (offsets, total) = exclusive_scan(&Dispatch::new(1), &[3, 0, 2, 1]);
        assert_eq!(offsets, vec![0, 3, 3, 5]);
        assert_eq!(total, 6);
    }

    #[test]
    fn test_scan_empty_and_single() {
        assert_eq!(exclusive_scan(&Dispatch::new(2), &[]), (vec![], 0));
        assert_eq!(exclusive_scan(&Dispatch::new(2), &[7]), (vec![0], 7));
    }

    #[test]
    fn test_scan_many_groups_non_power_of_two() {
        let mut rng = StdRng::seed_from_u64(11);
        let input: Vec<u32> = (0..100_003).map(|_| rng.random_range(0..64)).collect();
        for order in [LaunchOrder::InOrder, LaunchOrder::Shuffled(5)] {
            let dispatch = Dispatch::new(8).with_order(order);
            let (offsets, total) = exclusive_scan_with_partition(&dispatch, &input, 97);
            assert_eq!(offsets, reference(&input));
            assert_eq!(total, input.iter().sum::<u32>());
        }
    }
}
