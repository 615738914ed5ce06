//! CPU execution of the binning pipeline.
//!
//! Kernels run as workgroups on scoped threads through [`Dispatch`];
//! cross-group communication uses atomics only, exactly as on the device.

mod binning;
pub mod bitonic;
mod dispatch;
pub mod lookback;
mod pipeline;
mod radix;
mod scan;

pub use binning::{project_splats, write_keys, AtomicFrameStats, Projection, WrittenKeys};
pub use dispatch::{Dispatch, LaunchOrder};
pub use pipeline::HostBinner;
pub use radix::{HostRadixSorter, HOST_PARTITION};
pub use scan::{exclusive_scan, exclusive_scan_with_partition};
