//! Logical clocks
//!
//! Three clocks drive the CRDT merge rules: a per-replica sequence clock
//! (`Local`), a Lamport clock used for last-writer-wins arbitration
//! (`Lamport`), and a version vector (`Global`) recording the highest
//! sequence number observed from every replica.

use serde::{Deserialize, Serialize};
use std::cmp;
use std::collections::BTreeMap;

/// Identifies one participant. Must be positive; replica id 0 is reserved
/// for baseline provenance (base entries and base text).
pub type ReplicaId = u32;

/// A per-replica sequence timestamp: `(replica_id, seq)`.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct Local {
    pub replica_id: ReplicaId,
    pub seq: u64,
}

impl Local {
    pub const DEFAULT: Local = Local {
        replica_id: 0,
        seq: 0,
    };

    pub fn new(replica_id: ReplicaId) -> Self {
        Self { replica_id, seq: 0 }
    }

    /// Advance the clock and return the new timestamp.
    pub fn tick(&mut self) -> Local {
        self.seq += 1;
        *self
    }

    /// Fold a remote timestamp from this replica back into the clock, so
    /// locally generated timestamps never collide with replayed history.
    pub fn observe(&mut self, timestamp: Local) {
        if timestamp.replica_id == self.replica_id {
            self.seq = cmp::max(self.seq, timestamp.seq);
        }
    }
}

/// A Lamport timestamp. Total order by `(value, replica_id)` makes every
/// last-writer-wins decision deterministic across replicas.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct Lamport {
    pub value: u64,
    pub replica_id: ReplicaId,
}

impl Lamport {
    pub fn new(replica_id: ReplicaId) -> Self {
        Self {
            value: 0,
            replica_id,
        }
    }

    /// Advance the clock and return the new timestamp.
    pub fn tick(&mut self) -> Lamport {
        self.value += 1;
        *self
    }

    pub fn observe(&mut self, timestamp: Lamport) {
        self.value = cmp::max(self.value, timestamp.value);
    }
}

/// A version vector: the highest sequence number observed from each replica.
///
/// No total order is defined; only happened-before / concurrent comparisons
/// via [`Global::dominates`] and [`Global::changed_since`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Global(BTreeMap<ReplicaId, u64>);

impl Global {
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest observed sequence number for `replica_id`, or 0.
    pub fn get(&self, replica_id: ReplicaId) -> u64 {
        self.0.get(&replica_id).copied().unwrap_or(0)
    }

    pub fn observe(&mut self, timestamp: Local) {
        let seq = self.0.entry(timestamp.replica_id).or_insert(0);
        *seq = cmp::max(*seq, timestamp.seq);
    }

    /// True if `timestamp` has already been folded into this vector.
    pub fn observed(&self, timestamp: Local) -> bool {
        self.get(timestamp.replica_id) >= timestamp.seq
    }

    /// Component-wise maximum.
    pub fn merge(&mut self, other: &Global) {
        for (replica_id, seq) in &other.0 {
            let entry = self.0.entry(*replica_id).or_insert(0);
            *entry = cmp::max(*entry, *seq);
        }
    }

    /// True iff every component of `self` is >= the corresponding component
    /// of `other`.
    pub fn dominates(&self, other: &Global) -> bool {
        other
            .0
            .iter()
            .all(|(replica_id, seq)| self.get(*replica_id) >= *seq)
    }

    /// True iff some component of `self` exceeds the corresponding component
    /// of `other`.
    pub fn changed_since(&self, other: &Global) -> bool {
        self.0
            .iter()
            .any(|(replica_id, seq)| *seq > other.get(*replica_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_tick_is_monotonic() {
        let mut clock = Local::new(1);
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
        assert_eq!(a, Local { replica_id: 1, seq: 1 });
    }

    #[test]
    fn test_local_observe_ignores_other_replicas() {
        let mut clock = Local::new(1);
        clock.observe(Local { replica_id: 2, seq: 10 });
        assert_eq!(clock.tick().seq, 1);

        clock.observe(Local { replica_id: 1, seq: 10 });
        assert_eq!(clock.tick().seq, 11);
    }

    #[test]
    fn test_lamport_order_breaks_ties_by_replica() {
        let a = Lamport { value: 3, replica_id: 1 };
        let b = Lamport { value: 3, replica_id: 2 };
        let c = Lamport { value: 4, replica_id: 1 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_global_observe_and_dominates() {
        let mut a = Global::new();
        a.observe(Local { replica_id: 1, seq: 3 });
        a.observe(Local { replica_id: 2, seq: 1 });

        let mut b = Global::new();
        b.observe(Local { replica_id: 1, seq: 2 });

        assert!(a.dominates(&b));
        assert!(!b.dominates(&a));
        assert!(a.changed_since(&b));
        assert!(!b.changed_since(&a));
    }

    #[test]
    fn test_global_merge_is_component_wise_max() {
        let mut a = Global::new();
        a.observe(Local { replica_id: 1, seq: 5 });
        let mut b = Global::new();
        b.observe(Local { replica_id: 1, seq: 3 });
        b.observe(Local { replica_id: 2, seq: 7 });

        a.merge(&b);
        assert_eq!(a.get(1), 5);
        assert_eq!(a.get(2), 7);
        assert!(a.dominates(&b));
    }

    #[test]
    fn test_concurrent_vectors_do_not_dominate_each_other() {
        let mut a = Global::new();
        a.observe(Local { replica_id: 1, seq: 1 });
        let mut b = Global::new();
        b.observe(Local { replica_id: 2, seq: 1 });

        assert!(!a.dominates(&b));
        assert!(!b.dominates(&a));
    }
}
