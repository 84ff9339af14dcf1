//! Controller module for redis-operator.
//!
//! One generic reconcile driver serves all four topology kinds. Each kind
//! plugs in through [`topology::TopologyKind`]; the driver owns the
//! lifecycle, retries, and status.

pub mod backoff;
pub mod common;
pub mod context;
pub mod error;
pub mod pass;
pub mod reconciler;
pub mod state_machine;
pub mod status;
pub mod topology;

pub use error::{Error, ErrorClass, Result};
pub use topology::TopologyKind;
