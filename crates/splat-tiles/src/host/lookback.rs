//! Decoupled lookback state shared by the scan and the radix sort.
//!
//! Each (group, lane) owns one status word packing a 2-bit flag and a 30-bit
//! value. A group publishes its local count as `Local`, walks its
//! predecessors summing `Local` values until it meets a `Final` one, then
//! publishes its own inclusive prefix as `Final`. Group 0 publishes `Final`
//! immediately and every group waits only on lower indices, so the walk
//! always terminates as long as indices are claimed in launch order.

use std::sync::atomic::{AtomicU32, Ordering};

pub const FLAG_SHIFT: u32 = 30;
pub const VALUE_MASK: u32 = (1 << FLAG_SHIFT) - 1;
pub const FLAG_LOCAL: u32 = 1 << FLAG_SHIFT;
pub const FLAG_FINAL: u32 = 2 << FLAG_SHIFT;

#[cfg(test)]
const SPIN_LIMIT: u64 = 50_000_000;

/// Decoded status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Empty,
    /// The group's own count only.
    Local(u32),
    /// Inclusive prefix over all groups up to and including this one.
    Final(u32),
}

impl Status {
    pub fn pack(self) -> u32 {
        match self {
            Status::Empty => 0,
            Status::Local(v) => {
                debug_assert!(v <= VALUE_MASK, "status value {v} overflows");
                FLAG_LOCAL | (v & VALUE_MASK)
            }
            Status::Final(v) => {
                debug_assert!(v <= VALUE_MASK, "status value {v} overflows");
                FLAG_FINAL | (v & VALUE_MASK)
            }
        }
    }

    pub fn unpack(word: u32) -> Self {
        let value = word & VALUE_MASK;
        match word >> FLAG_SHIFT {
            0 => Status::Empty,
            1 => Status::Local(value),
            _ => Status::Final(value),
        }
    }
}

/// Source of logical group indices, claimed in launch order.
#[derive(Debug, Default)]
pub struct GroupCounter(AtomicU32);

impl GroupCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    pub fn reset(&mut self) {
        *self.0.get_mut() = 0;
    }
}

/// Status words for `groups * lanes` slots.
#[derive(Debug)]
pub struct StatusTable {
    words: Vec<AtomicU32>,
    lanes: usize,
}

impl StatusTable {
    pub fn new(groups: usize, lanes: usize) -> Self {
        Self {
            words: (0..groups * lanes).map(|_| AtomicU32::new(0)).collect(),
            lanes,
        }
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Reset every slot to `Empty` between passes.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w.get_mut() = 0);
    }

    pub fn publish(&self, group: usize, lane: usize, status: Status) {
        self.words[group * self.lanes + lane].store(status.pack(), Ordering::Release);
    }

    pub fn load(&self, group: usize, lane: usize) -> Status {
        Status::unpack(self.words[group * self.lanes + lane].load(Ordering::Acquire))
    }

    /// Spin until `group` has published something for `lane`.
    fn wait(&self, group: usize, lane: usize) -> Status {
        let mut spins: u64 = 0;
        loop {
            let status = self.load(group, lane);
            if status != Status::Empty {
                return status;
            }
            spins += 1;
            #[cfg(test)]
            if spins > SPIN_LIMIT {
                panic!("lookback stalled waiting on group {group} lane {lane}");
            }
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Exclusive prefix of `lane` over all groups before `group`.
    pub fn look_back(&self, group: usize, lane: usize) -> u32 {
        let mut prefix = 0u32;
        let mut j = group;
        while j > 0 {
            j -= 1;
            match self.wait(j, lane) {
                Status::Local(v) => prefix += v,
                Status::Final(v) => {
                    prefix += v;
                    break;
                }
                Status::Empty => unreachable!("wait returned an empty status"),
            }
        }
        prefix
    }

    /// Publish `counts` for `group`, resolve each lane's exclusive prefix and
    /// publish the inclusive results.
    pub fn resolve(&self, group: usize, counts: &[u32]) -> Vec<u32> {
        debug_assert_eq!(counts.len(), self.lanes);
        if group == 0 {
            for (lane, &c) in counts.iter().enumerate() {
                self.publish(0, lane, Status::Final(c));
            }
            return vec![0; counts.len()];
        }

        for (lane, &c) in counts.iter().enumerate() {
            self.publish(group, lane, Status::Local(c));
        }
        counts
            .iter()
            .enumerate()
            .map(|(lane, &c)| {
                let prefix = self.look_back(group, lane);
                self.publish(group, lane, Status::Final(prefix + c));
                prefix
            })
            .collect()
    }
}
