//! Pure slot distribution calculations.
//!
//! All functions in this module are pure, side-effect free, and fully testable.
//! They compute how slots should be distributed across master nodes.

use crate::crd::SlotRangeStatus;

/// Total number of hash slots in a Redis cluster.
pub const TOTAL_SLOTS: u16 = 16384;

/// A contiguous range of hash slots [start, end] inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Start of the slot range (inclusive).
    pub start: u16,
    /// End of the slot range (inclusive).
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range.
    ///
    /// # Panics
    /// Debug-only assertions check that start <= end and end < TOTAL_SLOTS.
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end, "start ({}) must be <= end ({})", start, end);
        debug_assert!(
            end < TOTAL_SLOTS,
            "end ({}) must be < TOTAL_SLOTS ({})",
            end,
            TOTAL_SLOTS
        );
        Self { start, end }
    }

    /// Get the number of slots in this range.
    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    /// Check if this range contains a specific slot.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Calculate ideal slot distribution for N masters.
///
/// Distributes remainder slots to earlier nodes (nodes 0..remainder get one extra slot).
///
/// # Examples
///
/// ```
/// use redis_operator::slots::distribution::{calculate_distribution, SlotRange};
///
/// let dist = calculate_distribution(3);
/// assert_eq!(dist[0], SlotRange::new(0, 5461));      // 5462 slots
/// assert_eq!(dist[1], SlotRange::new(5462, 10922)); // 5461 slots
/// assert_eq!(dist[2], SlotRange::new(10923, 16383)); // 5461 slots
/// ```
pub fn calculate_distribution(master_count: u16) -> Vec<SlotRange> {
    if master_count == 0 {
        return Vec::new();
    }

    let slots_per_master = TOTAL_SLOTS / master_count;
    let remainder = TOTAL_SLOTS % master_count;

    let mut ranges = Vec::with_capacity(master_count as usize);
    let mut start: u16 = 0;

    for i in 0..master_count {
        let extra = if i < remainder { 1 } else { 0 };
        let count = slots_per_master + extra;
        // More masters than slots leaves the tail with nothing to own.
        if count == 0 {
            break;
        }
        let end = start + count - 1;

        ranges.push(SlotRange::new(start, end));
        start = end.saturating_add(1);
    }

    ranges
}

/// Determine which master index owns a given slot.
///
/// This is the inverse of `calculate_distribution`.
///
/// # Examples
///
/// ```
/// use redis_operator::slots::distribution::slot_owner;
///
/// assert_eq!(slot_owner(0, 3), 0);
/// assert_eq!(slot_owner(5461, 3), 0);
/// assert_eq!(slot_owner(5462, 3), 1);
/// assert_eq!(slot_owner(16383, 3), 2);
/// ```
pub fn slot_owner(slot: u16, master_count: u16) -> u16 {
    if master_count == 0 {
        return 0;
    }

    let slots_per_master = TOTAL_SLOTS / master_count;
    let remainder = TOTAL_SLOTS % master_count;
    let boundary = remainder * (slots_per_master + 1);

    if slot < boundary {
        slot / (slots_per_master + 1)
    } else {
        remainder + (slot - boundary) / slots_per_master
    }
}

/// Slot ranges indexed by master ordinal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotAssignment {
    ranges: Vec<SlotRange>,
}

impl SlotAssignment {
    /// Compute the assignment for `masters` from scratch.
    pub fn for_masters(masters: u16) -> Self {
        Self {
            ranges: calculate_distribution(masters),
        }
    }

    /// Rebuild an assignment recorded in status. Entries are ordered by
    /// ordinal; malformed entries yield `None`.
    pub fn from_status(recorded: &[SlotRangeStatus]) -> Option<Self> {
        let mut sorted: Vec<&SlotRangeStatus> = recorded.iter().collect();
        sorted.sort_by_key(|r| r.ordinal);

        let mut ranges = Vec::with_capacity(sorted.len());
        for (expected, entry) in sorted.into_iter().enumerate() {
            let ordinal = usize::try_from(entry.ordinal).ok()?;
            let start = u16::try_from(entry.start).ok()?;
            let end = u16::try_from(entry.end).ok()?;
            if ordinal != expected || start > end || end >= TOTAL_SLOTS {
                return None;
            }
            ranges.push(SlotRange { start, end });
        }
        Some(Self { ranges })
    }

    /// Ranges in ordinal order.
    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }

    /// Range owned by a master ordinal.
    pub fn range(&self, ordinal: usize) -> Option<&SlotRange> {
        self.ranges.get(ordinal)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Ordinal owning `slot`, if any.
    pub fn owner(&self, slot: u16) -> Option<u16> {
        self.ranges
            .iter()
            .position(|r| r.contains(slot))
            .and_then(|idx| u16::try_from(idx).ok())
    }

    /// Number of slots covered by the assignment.
    pub fn covered_slots(&self) -> u32 {
        self.ranges.iter().map(|r| u32::from(r.count())).sum()
    }

    /// Whether the assignment partitions every slot exactly once.
    pub fn is_full_coverage(&self) -> bool {
        let mut next: u32 = 0;
        for range in &self.ranges {
            if u32::from(range.start) != next {
                return false;
            }
            next = u32::from(range.end) + 1;
        }
        next == u32::from(TOTAL_SLOTS)
    }

    /// Status representation.
    pub fn to_status(&self) -> Vec<SlotRangeStatus> {
        self.ranges
            .iter()
            .enumerate()
            .map(|(ordinal, r)| SlotRangeStatus {
                ordinal: i32::try_from(ordinal).unwrap_or(i32::MAX),
                start: i32::from(r.start),
                end: i32::from(r.end),
            })
            .collect()
    }

    /// One `<ordinal> <start>-<end>` line per master, for the cluster ConfigMap.
    pub fn render(&self) -> String {
        self.ranges
            .iter()
            .enumerate()
            .map(|(ordinal, r)| format!("{} {}-{}\n", ordinal, r.start, r.end))
            .collect()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range_count() {
        assert_eq!(SlotRange::new(0, 5461).count(), 5462);
        assert_eq!(SlotRange::new(100, 100).count(), 1);
        assert_eq!(SlotRange::new(0, 16383).count(), 16384);
    }

    #[test]
    fn test_slot_range_display() {
        assert_eq!(format!("{}", SlotRange::new(0, 5461)), "0-5461");
        assert_eq!(format!("{}", SlotRange::new(100, 100)), "100");
    }

    #[test]
    fn test_calculate_distribution_zero_masters() {
        assert!(calculate_distribution(0).is_empty());
    }

    #[test]
    fn test_calculate_distribution_one_master() {
        let dist = calculate_distribution(1);
        assert_eq!(dist, vec![SlotRange::new(0, 16383)]);
    }

    #[test]
    fn test_calculate_distribution_three_masters() {
        let dist = calculate_distribution(3);
        assert_eq!(dist.len(), 3);
        assert_eq!(dist[0], SlotRange::new(0, 5461));
        assert_eq!(dist[1], SlotRange::new(5462, 10922));
        assert_eq!(dist[2], SlotRange::new(10923, 16383));
    }

    #[test]
    fn test_distribution_covers_all_slots() {
        for master_count in 1..=20 {
            let assignment = SlotAssignment::for_masters(master_count);
            assert_eq!(assignment.covered_slots(), u32::from(TOTAL_SLOTS));
            assert!(
                assignment.is_full_coverage(),
                "master_count={} should cover all slots",
                master_count
            );
        }
    }

    #[test]
    fn test_slot_owner_is_inverse_of_distribution() {
        for master_count in 1..=10 {
            let dist = calculate_distribution(master_count);
            for (idx, range) in dist.iter().enumerate() {
                for slot in range.start..=range.end {
                    assert_eq!(slot_owner(slot, master_count), idx as u16);
                }
            }
        }
    }

    #[test]
    fn test_assignment_owner_matches_slot_owner() {
        let assignment = SlotAssignment::for_masters(7);
        for slot in [0u16, 2340, 2341, 9000, 16383] {
            assert_eq!(assignment.owner(slot), Some(slot_owner(slot, 7)));
        }
    }

    #[test]
    fn test_status_roundtrip_and_rejects_gaps() {
        let assignment = SlotAssignment::for_masters(3);
        let status = assignment.to_status();
        assert_eq!(status[2].ordinal, 2);
        assert_eq!(status[2].start, 10923);
        assert_eq!(SlotAssignment::from_status(&status), Some(assignment));

        let broken = vec![SlotRangeStatus {
            ordinal: 1,
            start: 0,
            end: 10,
        }];
        assert!(SlotAssignment::from_status(&broken).is_none());
    }

    #[test]
    fn test_partial_assignment_is_not_full_coverage() {
        let partial = SlotAssignment::from_status(&[SlotRangeStatus {
            ordinal: 0,
            start: 0,
            end: 8191,
        }])
        .unwrap();
        assert!(!partial.is_full_coverage());
        assert_eq!(partial.owner(9000), None);
    }

    #[test]
    fn test_render() {
        let rendered = SlotAssignment::for_masters(2).render();
        assert_eq!(rendered, "0 0-8191\n1 8192-16383\n");
    }
}
