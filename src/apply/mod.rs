//! Conflict-safe apply engine.
//!
//! - [`store`]: the [`ChildStore`] seam and its errors
//! - [`diff`]: subset comparison and merge patches
//! - [`engine`]: the retrying create/patch/prune loop
//! - [`kube_store`] and [`memory`]: live and in-process stores

pub mod diff;
pub mod engine;
pub mod kube_store;
pub mod memory;
pub mod store;

pub use engine::{AppliedChild, AppliedResult, ApplyError, ApplyOutcome, MAX_APPLY_ATTEMPTS, apply, apply_all};
pub use kube_store::KubeStore;
pub use memory::MemoryStore;
pub use store::{ChildStore, StoreError};
