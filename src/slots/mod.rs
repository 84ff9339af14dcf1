//! Pure slot management logic for Redis clusters.
//!
//! - [`distribution`]: slot partitioning by master ordinal
//! - [`planner`]: ownership changes between two assignments

pub mod distribution;
pub mod planner;

pub use distribution::{SlotAssignment, SlotRange, TOTAL_SLOTS, calculate_distribution, slot_owner};
pub use planner::{MigrationPlan, SlotMove};
