//! CLI command implementations.

pub mod bench;
pub mod config;
pub mod sort;
pub mod verify;

use anyhow::Result;
use splat_tiles::host::HostBinner;
use splat_tiles::{BinnedFrame, BinningError, CameraUniform, FrameStats, Splat, TileBinner};
use tracing::warn;

/// Run one device frame, growing the pair capacity once if it overflows.
pub fn device_frame(binner: &mut TileBinner, camera: &CameraUniform) -> Result<FrameStats> {
    match binner.run_frame(camera) {
        Err(BinningError::CapacityExceeded { required, capacity }) => {
            warn!(
                "Pair capacity {} too small for {} pairs, resizing",
                capacity, required
            );
            let grown = binner.config().capacity.grown_to(required);
            binner.resize(grown)?;
            Ok(binner.run_frame(camera)?)
        }
        other => Ok(other?),
    }
}

/// Run one host frame, growing the pair capacity once if it overflows.
pub fn host_frame(
    binner: &mut HostBinner,
    splats: &[Splat],
    camera: &CameraUniform,
) -> Result<BinnedFrame> {
    match binner.run_frame(splats, camera) {
        Err(BinningError::CapacityExceeded { required, capacity }) => {
            warn!(
                "Pair capacity {} too small for {} pairs, resizing",
                capacity, required
            );
            let grown = binner.config().capacity.grown_to(required);
            binner.resize(grown)?;
            Ok(binner.run_frame(splats, camera)?)
        }
        other => Ok(other?),
    }
}
