//! Lamport clock used to order concurrent writes

use serde::Serialize;

use super::ReplicaId;

/// Logical timestamp of a write.
///
/// Ordered by counter, then by replica id, so any two stamps issued by
/// different replicas compare unequal and every replica picks the same
/// winner for a contested field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Stamp {
    pub counter: u64,
    pub replica: ReplicaId,
}

/// Per-replica Lamport clock
#[derive(Debug, Clone)]
pub struct LamportClock {
    counter: u64,
    replica: ReplicaId,
}

impl LamportClock {
    pub fn new(replica: ReplicaId) -> Self {
        Self { counter: 0, replica }
    }

    /// Issue a stamp for a local write
    pub fn tick(&mut self) -> Stamp {
        self.counter += 1;
        Stamp {
            counter: self.counter,
            replica: self.replica,
        }
    }

    /// Advance past a stamp seen on a remote write
    pub fn observe(&mut self, stamp: Stamp) {
        self.counter = self.counter.max(stamp.counter);
    }
}
