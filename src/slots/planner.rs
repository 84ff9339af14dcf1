//! Slot migration planning - computes what needs to change, no I/O.
//!
//! When `masters` changes, the new assignment is computed from scratch and
//! compared against the one recorded in status. The resulting plan lists
//! which ranges change owner. The operator only reports the plan; moving
//! keys is left to an operator or an external migration tool.

use super::distribution::{SlotAssignment, TOTAL_SLOTS};

/// A contiguous run of slots changing owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMove {
    /// First slot (inclusive).
    pub start: u16,
    /// Last slot (inclusive).
    pub end: u16,
    /// Ordinal that owned the run in the previous assignment, if any.
    pub from: Option<u16>,
    /// Ordinal owning the run in the new assignment, if any.
    pub to: Option<u16>,
}

impl SlotMove {
    /// Number of slots moving.
    pub fn count(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }
}

impl std::fmt::Display for SlotMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let owner = |o: Option<u16>| o.map_or_else(|| "none".to_string(), |o| o.to_string());
        write!(
            f,
            "{}-{}: {} -> {}",
            self.start,
            self.end,
            owner(self.from),
            owner(self.to)
        )
    }
}

/// Ownership changes between two assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    pub moves: Vec<SlotMove>,
}

impl MigrationPlan {
    /// Compare a recorded assignment with a freshly computed one.
    ///
    /// An empty previous assignment is an initial assignment and produces
    /// no moves.
    pub fn between(previous: &SlotAssignment, next: &SlotAssignment) -> Self {
        if previous.is_empty() || previous == next {
            return Self::default();
        }

        // Every range boundary in either assignment starts a segment with a
        // single owner on both sides.
        let mut boundaries: Vec<u32> = previous
            .ranges()
            .iter()
            .chain(next.ranges().iter())
            .flat_map(|r| [u32::from(r.start), u32::from(r.end) + 1])
            .chain([0, u32::from(TOTAL_SLOTS)])
            .filter(|b| *b <= u32::from(TOTAL_SLOTS))
            .collect();
        boundaries.sort_unstable();
        boundaries.dedup();

        let mut moves: Vec<SlotMove> = Vec::new();
        for window in boundaries.windows(2) {
            let [lo, hi] = window else { continue };
            let (Ok(start), Ok(end)) = (u16::try_from(*lo), u16::try_from(*hi - 1)) else {
                continue;
            };
            let from = previous.owner(start);
            let to = next.owner(start);
            if from == to {
                continue;
            }
            match moves.last_mut() {
                Some(last) if last.from == from && last.to == to && last.end + 1 == start => {
                    last.end = end;
                }
                _ => moves.push(SlotMove {
                    start,
                    end,
                    from,
                    to,
                }),
            }
        }

        Self { moves }
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Total slots changing owner.
    pub fn slots_moved(&self) -> u32 {
        self.moves.iter().map(SlotMove::count).sum()
    }

    /// Human-readable summary for a status condition.
    pub fn summary(&self) -> String {
        let moves: Vec<String> = self.moves.iter().map(ToString::to_string).collect();
        format!("{} slots change owner: {}", self.slots_moved(), moves.join(", "))
    }
}
