//! Workgroup emulation on OS threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Order in which physical workgroup ids are handed to workers.
///
/// Kernels that need ordering claim logical indices from their own counter,
/// so every order must produce the same result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaunchOrder {
    #[default]
    InOrder,
    Reversed,
    /// Seeded random permutation.
    Shuffled(u64),
}

/// Runs a kernel once per workgroup on a pool of scoped threads.
#[derive(Debug, Clone)]
pub struct Dispatch {
    workers: usize,
    order: LaunchOrder,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        )
    }
}

impl Dispatch {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            order: LaunchOrder::InOrder,
        }
    }

    pub fn with_order(mut self, order: LaunchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn order(&self) -> LaunchOrder {
        self.order
    }

    /// Physical workgroup ids in launch order.
    pub fn launch_sequence(&self, num_groups: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = (0..num_groups).collect();
        match self.order {
            LaunchOrder::InOrder => {}
            LaunchOrder::Reversed => ids.reverse(),
            LaunchOrder::Shuffled(seed) => ids.shuffle(&mut StdRng::seed_from_u64(seed)),
        }
        ids
    }

    /// Run `kernel(workgroup_id)` for every id in `0..num_groups`.
    ///
    /// Returns once every group has finished, like a dispatch followed by a
    /// pipeline barrier.
    pub fn run<F>(&self, num_groups: u32, kernel: F)
    where
        F: Fn(u32) + Sync,
    {
        if num_groups == 0 {
            return;
        }
        let launches = self.launch_sequence(num_groups);
        let workers = self.workers.min(launches.len());
        if workers == 1 {
            launches.into_iter().for_each(kernel);
            return;
        }

        let next = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&group) = launches.get(i) else {
                        break;
                    };
                    kernel(group);
                });
            }
        });
    }

    /// Run `kernel` over owned work items, typically disjoint `&mut` chunks.
    pub fn run_each<T, F>(&self, items: Vec<T>, kernel: F)
    where
        T: Send,
        F: Fn(T) + Sync,
    {
        let workers = self.workers.min(items.len());
        if workers <= 1 {
            items.into_iter().for_each(kernel);
            return;
        }

        let queue = Mutex::new(items.into_iter());
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let item = match queue.lock() {
                        Ok(mut it) => it.next(),
                        Err(poisoned) => poisoned.into_inner().next(),
                    };
                    let Some(item) = item else {
                        break;
                    };
                    kernel(item);
                });
            }
        });
    }
}
