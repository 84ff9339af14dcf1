//! One reconcile pass, independent of the Kubernetes client.
//!
//! A pass resolves extras, synthesizes the desired children, applies them
//! through a [`ChildStore`], and aggregates the next status. The driver in
//! `reconciler` only adds finalizers, status writes, events and metrics on
//! top, so everything here runs against [`crate::apply::MemoryStore`] in
//! tests.

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, warn};

use crate::apply::{AppliedResult, ChildStore, apply_all};
use crate::controller::error::{Error, Result};
use crate::controller::status::{PassOutcome, PhaseChange, Readiness, aggregate};
use crate::controller::topology::TopologyKind;
use crate::crd::{TopologyPhase, TopologyStatus};
use crate::sentinel::TopologyLookup;
use crate::signals::SignalCache;

/// Everything a pass produced.
#[derive(Debug)]
pub struct PassReport {
    /// Status to write back.
    pub status: TopologyStatus,
    /// Phase changes, oldest first.
    pub changes: Vec<PhaseChange>,
    /// Apply result, or the error that stopped the pass.
    pub result: Result<AppliedResult>,
}

impl PassReport {
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

/// Run one pass for `obj`, bounded by `deadline`.
///
/// Errors never escape: they end up in `report.result` and in the status
/// conditions, so the caller can always write status before deciding how
/// to requeue.
pub async fn run_pass<K>(
    obj: &K,
    store: &dyn ChildStore,
    lookup: &dyn TopologyLookup,
    signals: &SignalCache,
    deadline: Duration,
) -> PassReport
where
    K: TopologyKind,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    // A rejected generation stays rejected; nothing is written until it moves
    if let Some(previous) = obj.status()
        && previous.phase == TopologyPhase::Invalid
        && previous.observed_generation == obj.meta().generation
    {
        debug!(name = %name, namespace = %namespace, "Generation already rejected, skipping");
        let generation = previous.observed_generation.unwrap_or_default();
        return PassReport {
            status: previous.clone(),
            changes: Vec::new(),
            result: Err(Error::InvalidSpec(format!(
                "generation {generation} was rejected; waiting for a spec change"
            ))),
        };
    }

    let (extra, result) = match tokio::time::timeout(deadline, synthesize_and_apply(obj, store, lookup)).await {
        Ok(done) => done,
        Err(_) => {
            warn!(name = %name, namespace = %namespace, ?deadline, "Pass exceeded its deadline");
            (None, Err(Error::DeadlineExceeded(deadline)))
        }
    };

    let outcome = match &result {
        Ok(applied) => PassOutcome::Applied(Readiness::from_applied(applied)),
        Err(e) => PassOutcome::failed(e),
    };
    let health = signals.get(&namespace, &name);
    let (mut status, changes) = aggregate(
        obj.status(),
        obj.meta().generation,
        &outcome,
        health.as_ref(),
    );
    obj.extend_status(extra.as_ref(), result.as_ref().ok(), &mut status);

    PassReport {
        status,
        changes,
        result,
    }
}

async fn synthesize_and_apply<K>(
    obj: &K,
    store: &dyn ChildStore,
    lookup: &dyn TopologyLookup,
) -> (Option<K::Extra>, Result<AppliedResult>)
where
    K: TopologyKind,
{
    let extra = match obj.allocate_extra(lookup).await {
        Ok(extra) => extra,
        Err(e) => return (None, Err(e)),
    };
    let result = apply_children(obj, &extra, store).await;
    (Some(extra), result)
}

async fn apply_children<K>(obj: &K, extra: &K::Extra, store: &dyn ChildStore) -> Result<AppliedResult>
where
    K: TopologyKind,
{
    let desired = obj.synthesize(extra)?;
    let parent = obj.parent();
    if parent.uid.is_empty() {
        return Err(Error::MissingField("metadata.uid".to_string()));
    }

    let actual = store.list_all_owned(&parent.namespace, &parent.uid).await?;
    debug!(
        name = %parent.name,
        desired = desired.len(),
        actual = actual.len(),
        "Applying children"
    );
    match apply_all(store, &desired, &actual).await {
        (applied, None) => Ok(applied),
        (applied, Some(e)) => {
            warn!(
                name = %parent.name,
                writes = applied.writes(),
                error = %e,
                "Some children were not applied"
            );
            Err(e.into())
        }
    }
}
