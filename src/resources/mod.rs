//! Resource generation module.
//!
//! Contains utilities for generating the Kubernetes children of every
//! topology kind.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | One per role, stable pod identity |
//! | Service | One per role, headless for cluster roles |
//! | ConfigMap | Runtime config for replica, sentinel, and cluster roles |

pub mod child_set;
pub mod common;
pub mod configmap;
pub mod services;
pub mod statefulset;

// Re-export commonly used items
pub use child_set::{ChildKey, ChildKind, ChildResource, ChildResourceSet};
pub use common::{PARENT_UID_LABEL, ParentRef};
