//! Bench command implementation.
//!
//! Bins a synthetic scene under an orbiting camera and reports frame times.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use splat_tiles::host::HostBinner;
use splat_tiles::{FrameStats, StageTimings, TileBinner};
use tracing::{debug, info, warn};

use super::{device_frame, host_frame};
use crate::config::Config;
use crate::scene::{orbit_camera, random_splats};

/// Run `frames` frames on the device, or on CPU threads with `host`.
pub fn execute(config: &Config, frames: u32, host: bool) -> Result<()> {
    let splats = random_splats(&config.scene);
    info!("Generated {} splats", splats.len());

    let mut binning = config.binning.clone();
    if splats.len() > binning.capacity.max_primitives as usize {
        binning.capacity.max_primitives = splats.len() as u32;
    }

    let mut timings = Vec::with_capacity(frames as usize);
    let mut stages = Vec::new();
    let mut last = FrameStats::default();

    if host {
        let mut binner = HostBinner::new(binning)?;
        for frame in 0..frames {
            let camera = orbit_camera(&config.scene, binner.config().tile_size, frame);
            let start = Instant::now();
            let result = host_frame(&mut binner, &splats, &camera)?;
            timings.push(start.elapsed());
            last = result.stats;
            debug!("frame {}: {:?} via {:?}", frame, result.stats, result.sort_path);
        }
    } else {
        let mut binner = pollster::block_on(TileBinner::new(binning))
            .context("Failed to create device binner")?;
        binner.upload_splats(&splats)?;
        for frame in 0..frames {
            let camera = orbit_camera(&config.scene, binner.config().tile_size, frame);
            let start = Instant::now();
            last = device_frame(&mut binner, &camera)?;
            timings.push(start.elapsed());
            stages.extend(binner.last_timings());
            debug!("frame {}: {:?}", frame, last);
        }
        if binner.config().profile_gpu && stages.is_empty() {
            warn!("No GPU stage timings recorded; the device lacks timestamp queries");
        }
    }

    report(&timings, &last, host);
    report_stages(&stages);
    Ok(())
}

fn report(timings: &[Duration], last: &FrameStats, host: bool) {
    if timings.is_empty() {
        println!("No frames run");
        return;
    }
    let ms = |d: &Duration| d.as_secs_f64() * 1000.0;
    let total: f64 = timings.iter().map(ms).sum();
    let min = timings.iter().map(ms).fold(f64::INFINITY, f64::min);
    let max = timings.iter().map(ms).fold(0.0, f64::max);

    println!("📊 Tile Binning Benchmark ({})", if host { "host" } else { "device" });
    println!("{:─<50}", "");
    println!("Frames:           {}", timings.len());
    println!("Mean frame:       {:.3} ms", total / timings.len() as f64);
    println!("Min / max:        {:.3} / {:.3} ms", min, max);
    println!("Visible splats:   {}", last.num_visible);
    println!("Pairs:            {}", last.num_pairs);
    println!("Largest tile:     {}", last.max_tile_count);
    if let Some((near, far)) = last.depth_range() {
        println!("Depth range:      {:.3} .. {:.3}", near, far);
    }
}

fn report_stages(stages: &[StageTimings]) {
    if stages.is_empty() {
        return;
    }
    let mean = |f: fn(&StageTimings) -> Duration| {
        stages.iter().map(|t| f(t).as_secs_f64() * 1000.0).sum::<f64>() / stages.len() as f64
    };

    println!();
    println!("GPU stage times (mean of {} frames)", stages.len());
    println!("{:─<50}", "");
    println!("Project:          {:.3} ms", mean(|t| t.project));
    println!("Offset scan:      {:.3} ms", mean(|t| t.scan));
    println!("Key write:        {:.3} ms", mean(|t| t.key_write));
    println!("Sort:             {:.3} ms", mean(|t| t.sort));
    println!("Total:            {:.3} ms", mean(StageTimings::total));
}
