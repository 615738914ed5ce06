//! Error types for tile binning and sorting.

use thiserror::Error;

/// Errors that can occur while binning and sorting splats.
#[derive(Error, Debug)]
pub enum BinningError {
    /// Failed to initialize GPU device.
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    /// Failed to create GPU resources.
    #[error("GPU resource creation failed: {0}")]
    ResourceCreation(String),

    /// The device cannot hold the requested buffers.
    #[error("device limit exceeded for {what}: {required} > {limit}")]
    Unsupported {
        what: &'static str,
        required: u64,
        limit: u64,
    },

    /// Failed to read back data from GPU.
    #[error("GPU readback failed: {0}")]
    Readback(String),

    /// More (tile, splat) pairs than the key buffers can hold.
    ///
    /// Recoverable: call `resize` with a larger capacity and rerun the frame.
    #[error("pair capacity exceeded: {required} pairs > capacity {capacity}")]
    CapacityExceeded { required: u64, capacity: u32 },

    /// More splats than the primitive buffer can hold.
    #[error("too many splats: {count} > capacity {capacity}")]
    TooManyPrimitives { count: usize, capacity: u32 },

    /// The camera's tile grid is larger than the reserved tile tables.
    #[error("tile grid of {tiles} tiles exceeds capacity {capacity}")]
    TooManyTiles { tiles: u64, capacity: u32 },

    /// Rejected configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A binned or sorted buffer violates an invariant.
    #[error("Inconsistent output: {0}")]
    Inconsistent(String),

    /// Binner not initialized.
    #[error("Binner not initialized")]
    NotInitialized,
}
