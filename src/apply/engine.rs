//! Conflict-safe apply of a desired child set.
//!
//! Per child: create if missing, merge-patch the fields that differ, leave it
//! alone if nothing differs. Every patch carries the baseline
//! resourceVersion; on conflict the object is re-read and the patch
//! recomputed, up to [`MAX_APPLY_ATTEMPTS`] times.

use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::apply::diff::merge_patch_for;
use crate::apply::store::{ChildStore, StoreError, resource_version};
use crate::resources::{ChildKey, ChildResource, ChildResourceSet, PARENT_UID_LABEL};

/// Attempts per child before giving up on a conflicting write.
pub const MAX_APPLY_ATTEMPTS: u32 = 5;

/// Errors from an apply.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Every attempt hit a concurrent write
    #[error("{key} still conflicting after {attempts} attempts")]
    ConflictExhausted { key: ChildKey, attempts: u32 },

    /// The name is taken by a child of another parent
    #[error("{key} is owned by another object (parent uid {owner})")]
    OwnedElsewhere { key: ChildKey, owner: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to one child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    /// Patched after `attempts` tries (1 when there was no conflict).
    Patched { attempts: u32 },
    Unchanged,
    /// Pruned: owned but no longer desired.
    Deleted,
}

impl ApplyOutcome {
    pub fn is_write(&self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged)
    }
}

/// One child after apply.
#[derive(Clone, Debug)]
pub struct AppliedChild {
    pub key: ChildKey,
    pub outcome: ApplyOutcome,
    /// Object as last seen in the store; `None` once deleted.
    pub object: Option<Value>,
}

/// Result of applying a whole child set.
#[derive(Clone, Debug, Default)]
pub struct AppliedResult {
    pub children: Vec<AppliedChild>,
}

impl AppliedResult {
    /// Number of writes performed, counting retries once.
    pub fn writes(&self) -> usize {
        self.children.iter().filter(|c| c.outcome.is_write()).count()
    }

    /// Conflicting attempts absorbed by retries.
    pub fn conflict_retries(&self) -> u32 {
        self.children
            .iter()
            .map(|c| match c.outcome {
                ApplyOutcome::Patched { attempts } => attempts.saturating_sub(1),
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, key: &ChildKey) -> Option<ApplyOutcome> {
        self.children.iter().find(|c| &c.key == key).map(|c| c.outcome)
    }

    pub fn object(&self, key: &ChildKey) -> Option<&Value> {
        self.children
            .iter()
            .find(|c| &c.key == key)
            .and_then(|c| c.object.as_ref())
    }
}

/// Drive the store toward `desired`. `actual` holds the parent's children as
/// listed at the start of the pass and is used as the write baseline.
///
/// Children in `actual` that `desired` no longer names are deleted. Fails
/// with the first child error; see [`apply_all`] for the partial result.
pub async fn apply<S>(
    store: &S,
    desired: &ChildResourceSet,
    actual: &[Value],
) -> Result<AppliedResult, ApplyError>
where
    S: ChildStore + ?Sized,
{
    match apply_all(store, desired, actual).await {
        (applied, None) => Ok(applied),
        (_, Some(error)) => Err(error),
    }
}

/// Like [`apply`], but every child is attempted and pruning always runs.
///
/// Children negotiate their writes independently, so one child exhausting
/// its conflict retries does not hold back its siblings. Returns what was
/// applied together with the first error, in desired-set order.
pub async fn apply_all<S>(
    store: &S,
    desired: &ChildResourceSet,
    actual: &[Value],
) -> (AppliedResult, Option<ApplyError>)
where
    S: ChildStore + ?Sized,
{
    let attempts = join_all(desired.iter().map(|child| {
        let baseline = actual
            .iter()
            .find(|obj| ChildKey::of(obj).as_ref() == Some(&child.key))
            .cloned();
        apply_one(store, desired, child, baseline)
    }))
    .await;

    let mut result = AppliedResult::default();
    let mut first_error = None;
    for attempt in attempts {
        match attempt {
            Ok(child) => result.children.push(child),
            Err(e) => {
                warn!(error = %e, "Child not applied");
                first_error.get_or_insert(e);
            }
        }
    }

    for object in actual {
        let Some(key) = ChildKey::of(object) else {
            continue;
        };
        if desired.contains(&key) || !desired.owns(object) {
            continue;
        }
        info!(child = %key, "Pruning child no longer desired");
        match store.delete(&key).await {
            Ok(()) => result.children.push(AppliedChild {
                key,
                outcome: ApplyOutcome::Deleted,
                object: None,
            }),
            Err(e) => {
                warn!(child = %key, error = %e, "Prune failed");
                first_error.get_or_insert(e.into());
            }
        }
    }

    (result, first_error)
}

async fn apply_one<S>(
    store: &S,
    desired: &ChildResourceSet,
    child: &ChildResource,
    baseline: Option<Value>,
) -> Result<AppliedChild, ApplyError>
where
    S: ChildStore + ?Sized,
{
    let key = &child.key;
    let mut current = baseline;

    for attempt in 1..=MAX_APPLY_ATTEMPTS {
        let Some(live) = current.take() else {
            match store.create(key, &child.manifest).await {
                Ok(object) => {
                    debug!(child = %key, "Created child");
                    return Ok(applied(key, ApplyOutcome::Created, object));
                }
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(child = %key, attempt, "Create raced, re-reading");
                    current = store.get(key).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        };

        check_owner(desired, key, &live)?;

        let Some(patch) = merge_patch_for(&child.manifest, &live) else {
            return Ok(applied(key, ApplyOutcome::Unchanged, live));
        };
        let version = resource_version(&live).unwrap_or_default().to_string();

        match store.patch(key, &patch, &version).await {
            Ok(object) => {
                debug!(child = %key, attempt, "Patched child");
                return Ok(applied(key, ApplyOutcome::Patched { attempts: attempt }, object));
            }
            Err(StoreError::Conflict(_)) => {
                debug!(child = %key, attempt, "Write conflicted, re-reading");
                current = store.get(key).await?;
            }
            Err(StoreError::NotFound(_)) => {
                // Deleted underneath us; the next attempt recreates it
                current = None;
            }
            Err(e) => return Err(e.into()),
        }
    }

    warn!(child = %key, attempts = MAX_APPLY_ATTEMPTS, "Giving up on conflicting child");
    Err(ApplyError::ConflictExhausted {
        key: key.clone(),
        attempts: MAX_APPLY_ATTEMPTS,
    })
}

fn applied(key: &ChildKey, outcome: ApplyOutcome, object: Value) -> AppliedChild {
    AppliedChild {
        key: key.clone(),
        outcome,
        object: Some(object),
    }
}

/// A live object labelled for a different parent is never adopted.
fn check_owner(desired: &ChildResourceSet, key: &ChildKey, live: &Value) -> Result<(), ApplyError> {
    let owner = live
        .pointer("/metadata/labels")
        .and_then(|labels| labels.get(PARENT_UID_LABEL))
        .and_then(Value::as_str);
    match owner {
        Some(uid) if !uid.is_empty() && uid != desired.parent_uid() => {
            Err(ApplyError::OwnedElsewhere {
                key: key.clone(),
                owner: uid.to_string(),
            })
        }
        _ => Ok(()),
    }
}
