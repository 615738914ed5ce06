//! Host binning pipeline.

use tracing::debug;

use super::{
    bitonic, exclusive_scan, project_splats, write_keys, Dispatch, HostRadixSorter, Projection,
};
use crate::{
    BinnedFrame, BinningConfig, BinningError, CameraUniform, Capacity, KeyValue, Result,
    SortPath, Splat,
};

/// Runs projector, offset scan, key writer and sort on CPU threads.
#[derive(Debug, Clone)]
pub struct HostBinner {
    config: BinningConfig,
    dispatch: Dispatch,
}

impl HostBinner {
    pub fn new(config: BinningConfig) -> Result<Self> {
        config.validate()?;
        let dispatch = Dispatch::new(config.worker_count());
        Ok(Self { config, dispatch })
    }

    /// Replace the worker pool, e.g. to permute the launch order.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn config(&self) -> &BinningConfig {
        &self.config
    }

    /// Change the reserved capacity.
    pub fn resize(&mut self, capacity: Capacity) -> Result<()> {
        let config = BinningConfig {
            capacity,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Bin and sort one frame.
    pub fn run_frame(&self, splats: &[Splat], camera: &CameraUniform) -> Result<BinnedFrame> {
        let capacity = self.config.capacity;
        if splats.len() > capacity.max_primitives as usize {
            return Err(BinningError::TooManyPrimitives {
                count: splats.len(),
                capacity: capacity.max_primitives,
            });
        }
        let grid = self.config.frame_grid(camera)?;
        let layout = grid.key_layout();

        let projection = project_splats(
            &self.dispatch,
            splats,
            camera,
            &layout,
            self.config.max_footprint,
        );
        debug!(
            "projected {} splats: {} visible, {} pairs",
            splats.len(),
            projection.stats.num_visible,
            projection.stats.num_pairs
        );
        self.run_projected(projection, camera)
    }

    /// Offset table, key writer and sort for a projection made with `camera`.
    pub fn run_projected(
        &self,
        projection: Projection,
        camera: &CameraUniform,
    ) -> Result<BinnedFrame> {
        let capacity = self.config.capacity;
        let grid = self.config.frame_grid(camera)?;
        let layout = grid.key_layout();
        if projection.counts.len() != grid.num_tiles() as usize {
            return Err(BinningError::Inconsistent(format!(
                "projection has {} tile counts for a {}-tile grid",
                projection.counts.len(),
                grid.num_tiles()
            )));
        }

        let mut stats = projection.stats;
        if stats.num_pairs > capacity.max_pairs {
            return Err(BinningError::CapacityExceeded {
                required: stats.num_pairs as u64,
                capacity: capacity.max_pairs,
            });
        }

        let (offsets, total) = exclusive_scan(&self.dispatch, &projection.counts);
        if total != stats.num_pairs {
            return Err(BinningError::Inconsistent(format!(
                "tile counts sum to {} but the projector reported {} pairs",
                total, stats.num_pairs
            )));
        }

        let written = write_keys(
            &self.dispatch,
            &projection.projected,
            camera,
            &layout,
            &offsets,
            &projection.counts,
            total,
            self.config.check_bounds,
        );
        stats.overflow = written.overflow;
        if written.overflow > 0 {
            debug_assert_eq!(written.overflow, 0, "key writer left its tile bucket");
            return Err(BinningError::Inconsistent(format!(
                "{} key writes fell outside their tile bucket",
                written.overflow
            )));
        }

        let mut keys = written.keys;
        let sort_path = self.config.sort.resolve(total, stats.max_tile_count);
        self.sort(
            &mut keys,
            &offsets,
            &projection.counts,
            layout.key_bits(),
            sort_path,
        )?;
        debug!("sorted {} pairs with {:?}", total, sort_path);

        Ok(BinnedFrame {
            grid,
            layout,
            projected: projection.projected,
            counts: projection.counts,
            offsets,
            keys,
            stats,
            sort_path,
        })
    }

    /// Sort `keys` along `path`.
    pub fn sort(
        &self,
        keys: &mut [KeyValue],
        offsets: &[u32],
        counts: &[u32],
        key_bits: u32,
        path: SortPath,
    ) -> Result<()> {
        match path {
            SortPath::Skipped => Ok(()),
            SortPath::Bitonic => bitonic::sort_segment(keys),
            SortPath::TileBitonic => bitonic::sort_tiles(&self.dispatch, keys, offsets, counts),
            SortPath::Radix | SortPath::RadixReduceScan => {
                let scheme = path.radix_scheme().unwrap_or_default();
                HostRadixSorter::new(self.dispatch.clone(), self.config.radix_bits)
                    .with_scheme(scheme)
                    .sort(keys, key_bits);
                Ok(())
            }
        }
    }
}
