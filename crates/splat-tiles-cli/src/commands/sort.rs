//! Sort command implementation.
//!
//! Sorts random pairs and compares against `slice::sort_by_key`.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::ValueEnum;
use splat_tiles::host::{bitonic, Dispatch, HostRadixSorter};
use splat_tiles::{verify, GpuBitonicSorter, GpuContext, GpuRadixSorter, RadixScheme};
use tracing::info;

use crate::config::Config;
use crate::scene::random_pairs;

/// Sorter to exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKind {
    /// Decoupled-lookback radix sort
    Radix,
    /// Reduce-then-scan radix sort, no waits between workgroups
    RadixReduceScan,
    Bitonic,
}

impl SortKind {
    fn radix_scheme(self) -> RadixScheme {
        match self {
            SortKind::RadixReduceScan => RadixScheme::ReduceScan,
            SortKind::Radix | SortKind::Bitonic => RadixScheme::Lookback,
        }
    }
}

pub fn execute(
    config: &Config,
    count: u32,
    key_bits: u32,
    kind: SortKind,
    host: bool,
) -> Result<()> {
    let input = random_pairs(count, key_bits, config.scene.seed);
    let radix_bits = config.binning.radix_bits;
    info!("Sorting {} pairs with {:?} ({} key bits)", count, kind, key_bits);

    let start = Instant::now();
    let sorted = if host {
        let mut pairs = input.clone();
        match kind {
            SortKind::Radix | SortKind::RadixReduceScan => {
                let dispatch = Dispatch::new(config.binning.worker_count());
                HostRadixSorter::new(dispatch, radix_bits)
                    .with_scheme(kind.radix_scheme())
                    .sort(&mut pairs, key_bits);
            }
            SortKind::Bitonic => bitonic::sort_segment(&mut pairs)?,
        }
        pairs
    } else {
        let ctx = pollster::block_on(GpuContext::new()).context("No GPU available, try --host")?;
        match kind {
            SortKind::Radix | SortKind::RadixReduceScan => GpuRadixSorter::sort_blocking_with(
                &ctx,
                &input,
                key_bits,
                radix_bits,
                kind.radix_scheme(),
            )?,
            SortKind::Bitonic => GpuBitonicSorter::sort_blocking(&ctx, &input)?,
        }
    };
    let elapsed = start.elapsed();

    verify::check_stable_sort(&input, &sorted).context("Sorted output does not match")?;
    println!(
        "✅ Sorted {} pairs on the {} in {:.2?}",
        count,
        if host { "host" } else { "device" },
        elapsed
    );
    Ok(())
}
