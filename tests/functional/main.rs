// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for full reconcile passes.
//!
//! These tests drive synthesis, the apply engine, and status aggregation
//! against the in-memory child store WITHOUT requiring a live Kubernetes
//! cluster. StatefulSet readiness and competing writers are simulated on
//! the store.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_cluster_three_by_one
//! ```
//!
//! ## Test Categories
//!
//! - **Apply tests**: idempotence, conflict retries, ownership, pruning
//! - **Scenario tests**: multi-pass lifecycles for each topology kind

mod apply_tests;
mod harness;
mod scenario_tests;

pub use harness::*;
