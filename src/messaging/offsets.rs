use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Offset Tracker
// ============================================================================
//
// Messages are processed concurrently, but a Kafka commit acknowledges every
// offset below it. The tracker computes, per partition, the highest offset
// that is safe to commit: the lowest offset still in flight, or one past the
// highest completed offset when nothing is in flight.
//
// An offset that is not completed yet (persistence still failing) pins the
// partition's watermark. Revoking a partition drops its bookkeeping; a later
// assignment starts again from the first offset it receives.
//
// ============================================================================

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    highest_completed: Option<i64>,
    /// Next offset to consume; everything below it is acknowledged.
    committed: i64,
}

#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a received message. Must be called in delivery order.
    pub fn begin(&mut self, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry(partition)
            .or_insert_with(|| PartitionOffsets {
                committed: offset,
                ..PartitionOffsets::default()
            });

        // Delivery restarted below the watermark (rebalance or seek): earlier
        // bookkeeping no longer describes this partition.
        if offset < state.committed {
            tracing::debug!(
                partition,
                offset,
                committed = state.committed,
                "Offset rewound, resetting partition tracking"
            );
            *state = PartitionOffsets {
                committed: offset,
                ..PartitionOffsets::default()
            };
        }

        state.in_flight.insert(offset);
    }

    /// Mark a message as acknowledged. Returns the new commit position when
    /// the partition's watermark advanced.
    pub fn complete(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&partition)?;
        if !state.in_flight.remove(&offset) {
            return None;
        }

        state.highest_completed = state.highest_completed.max(Some(offset));

        let candidate = match state.in_flight.first() {
            Some(&lowest_pending) => lowest_pending,
            None => state.highest_completed.map_or(state.committed, |o| o + 1),
        };

        if candidate > state.committed {
            state.committed = candidate;
            Some(candidate)
        } else {
            None
        }
    }

    /// Whether the message is still awaiting acknowledgement.
    pub fn is_pending(&self, partition: i32, offset: i64) -> bool {
        self.partitions
            .get(&partition)
            .is_some_and(|state| state.in_flight.contains(&offset))
    }

    /// Forget a partition this consumer no longer owns. Returns its last
    /// commit position so the caller can commit it before handing it over.
    pub fn revoke(&mut self, partition: i32) -> Option<i64> {
        let state = self.partitions.remove(&partition)?;
        if !state.in_flight.is_empty() {
            tracing::debug!(
                partition,
                pending = state.in_flight.len(),
                committed = state.committed,
                "Partition revoked with unacknowledged messages"
            );
        }
        Some(state.committed)
    }

    /// Current commit position of every tracked partition.
    pub fn watermarks(&self) -> Vec<(i32, i64)> {
        let mut marks: Vec<_> = self
            .partitions
            .iter()
            .map(|(&partition, state)| (partition, state.committed))
            .collect();
        marks.sort_unstable();
        marks
    }

    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|p| p.in_flight.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_completion_advances_each_time() {
        let mut tracker = OffsetTracker::new();
        tracker.begin(0, 10);
        tracker.begin(0, 11);

        assert_eq!(tracker.complete(0, 10), Some(11));
        assert_eq!(tracker.complete(0, 11), Some(12));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_out_of_order_completion_waits_for_gap() {
        let mut tracker = OffsetTracker::new();
        for offset in 5..=7 {
            tracker.begin(0, offset);
        }

        assert_eq!(tracker.complete(0, 7), None);
        assert_eq!(tracker.complete(0, 6), None);
        assert_eq!(tracker.complete(0, 5), Some(8));
    }

    #[test]
    fn test_unfinished_offset_pins_watermark() {
        let mut tracker = OffsetTracker::new();
        for offset in 0..4 {
            tracker.begin(0, offset);
        }

        assert_eq!(tracker.complete(0, 0), Some(1));
        // Offset 1 failed and is never completed.
        assert_eq!(tracker.complete(0, 2), None);
        assert_eq!(tracker.complete(0, 3), None);

        assert_eq!(tracker.watermarks(), vec![(0, 1)]);
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.begin(0, 100);
        tracker.begin(1, 7);

        assert_eq!(tracker.complete(1, 7), Some(8));
        assert_eq!(tracker.watermarks(), vec![(0, 100), (1, 8)]);
    }

    #[test]
    fn test_rewind_resets_partition() {
        let mut tracker = OffsetTracker::new();
        tracker.begin(0, 20);
        tracker.begin(0, 21);
        assert_eq!(tracker.complete(0, 20), Some(21));

        // Partition reassigned and redelivered from 15.
        tracker.begin(0, 15);
        assert_eq!(tracker.complete(0, 15), Some(16));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_revoked_partition_does_not_block_reassignment() {
        let mut tracker = OffsetTracker::new();
        tracker.begin(0, 1);
        tracker.begin(1, 5);

        // Offset 1 never acknowledged before partition 0 moved away.
        assert_eq!(tracker.revoke(0), Some(1));
        assert_eq!(tracker.watermarks(), vec![(1, 5)]);
        assert!(!tracker.is_pending(0, 1));

        tracker.begin(0, 100);
        assert_eq!(tracker.complete(0, 100), Some(101));
        tracker.begin(0, 101);
        assert_eq!(tracker.complete(0, 101), Some(102));
        assert_eq!(tracker.watermarks(), vec![(0, 102), (1, 5)]);
    }

    #[test]
    fn test_late_completion_after_revoke_is_ignored() {
        let mut tracker = OffsetTracker::new();
        tracker.begin(0, 7);
        tracker.revoke(0);

        assert_eq!(tracker.complete(0, 7), None);
        assert!(tracker.watermarks().is_empty());
        assert_eq!(tracker.revoke(0), None);
    }

    #[test]
    fn test_pending_until_completed() {
        let mut tracker = OffsetTracker::new();
        tracker.begin(2, 40);

        assert!(tracker.is_pending(2, 40));
        tracker.complete(2, 40);
        assert!(!tracker.is_pending(2, 40));
    }

    #[test]
    fn test_unknown_offsets_are_ignored() {
        let mut tracker = OffsetTracker::new();
        assert_eq!(tracker.complete(3, 1), None);

        tracker.begin(0, 1);
        assert_eq!(tracker.complete(0, 2), None);
        assert_eq!(tracker.complete(0, 1), Some(2));
        assert_eq!(tracker.complete(0, 1), None);
    }
}
