//! Reconcile driver shared by every topology kind.
//!
//! Handles the object lifecycle around a pass: the finalizer and deletion
//! sweep, the pass deadline, status write-back, events, metrics, and the
//! requeue decision.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, Resource, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::apply::KubeStore;
use crate::apply::diff::merge_diff;
use crate::controller::common::{FINALIZER, add_finalizer, remove_finalizer, sweep_children};
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::{Error, ErrorClass};
use crate::controller::pass::run_pass;
use crate::controller::status::{PhaseChange, Readiness};
use crate::controller::topology::TopologyKind;
use crate::crd::{TopologyPhase, TopologyStatus};
use crate::sentinel::KubeLookup;

/// Backoff key of one object.
fn object_key<K: TopologyKind>(obj: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Requeue interval after a successful pass.
pub fn requeue_after(phase: TopologyPhase, resync: Duration, not_ready: Duration) -> Duration {
    match phase {
        TopologyPhase::Ready => resync,
        _ => not_ready,
    }
}

/// Reconcile one topology object.
pub async fn reconcile<K>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error>
where
    K: TopologyKind,
{
    let start_time = Instant::now();
    let kind = K::kind(&()).to_string();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);

    debug!(kind = %kind, name = %name, namespace = %namespace, "Reconciling");

    if obj.meta().deletion_timestamp.is_some() {
        return handle_deletion(&*obj, &ctx, &api).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(kind = %kind, name = %name, "Adding finalizer");
        add_finalizer(&api, &name, FINALIZER).await?;
    }

    let store = KubeStore::new(ctx.client.clone());
    let lookup = KubeLookup::new(ctx.client.clone());
    let report = run_pass(
        &*obj,
        &store,
        &lookup,
        &ctx.signals,
        ctx.config.reconcile_deadline(),
    )
    .await;

    write_status(&api, &name, obj.status(), &report.status).await?;
    publish_phase_changes(&*obj, &ctx, &report.changes).await;

    if let Some(ref health_state) = ctx.health_state {
        let metrics = &health_state.metrics;
        metrics.record_reconcile(
            &kind,
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        for change in &report.changes {
            metrics.record_phase_change(&kind, Some(change.from.as_str()), change.to.as_str());
        }
        if let Ok(applied) = &report.result {
            metrics.record_apply(
                &kind,
                &namespace,
                &name,
                u64::try_from(applied.writes()).unwrap_or(u64::MAX),
                u64::from(applied.conflict_retries()),
            );
        }
        let ready: i32 = report.status.ready_replicas.values().sum();
        let desired = match &report.result {
            Ok(applied) => Readiness::from_applied(applied).desired(),
            Err(_) => ready,
        };
        metrics.set_replicas(&kind, &namespace, &name, i64::from(desired), i64::from(ready));
    }

    match report.result {
        Ok(_) => {
            ctx.backoff.reset(&object_key(&*obj));
            if let Some(ref health_state) = ctx.health_state {
                health_state.touch();
            }
            let phase = report.status.phase;
            let after = requeue_after(
                phase,
                ctx.config.resync(),
                ctx.config.not_ready_requeue(),
            );
            debug!(kind = %kind, name = %name, phase = %phase, ?after, "Pass complete");
            Ok(Action::requeue(after))
        }
        Err(e) => {
            ctx.publish_warning_event(&*obj, e.reason(), "Reconciling", Some(e.to_string()))
                .await;
            Err(e)
        }
    }
}

/// Error policy: backoff for retryable classes, wait for a change otherwise.
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: TopologyKind,
{
    let kind = K::kind(&());
    let name = obj.name_any();
    let class = error.class();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&kind, class.as_str());
    }

    if error.is_not_found() {
        debug!(kind = %kind, name = %name, "Object not found (likely deleted)");
        return Action::await_change();
    }

    match class {
        ErrorClass::InvalidSpec | ErrorClass::Unrecoverable => {
            error!(kind = %kind, name = %name, class = %class, error = %error, "Waiting for a spec change");
            Action::await_change()
        }
        ErrorClass::PendingDependency | ErrorClass::ConflictExhausted | ErrorClass::Transient => {
            let delay = ctx.backoff.next_delay(&object_key(&*obj), class);
            warn!(kind = %kind, name = %name, class = %class, error = %error, ?delay, "Retrying");
            Action::requeue(delay)
        }
    }
}

/// Merge patch taking the stored status to `next`, `None` when unchanged.
///
/// Keys that disappeared (a pruned role's ready count, a cleared slot
/// assignment) are sent as `null`; a plain merge would leave them behind.
pub fn status_patch(
    previous: Option<&TopologyStatus>,
    next: &TopologyStatus,
) -> Result<Option<Value>, Error> {
    let next_value = serde_json::to_value(next)?;
    let diff = match previous {
        Some(previous) => merge_diff(&serde_json::to_value(previous)?, &next_value),
        None => Some(next_value),
    };
    Ok(diff.map(|status| json!({ "status": status })))
}

/// Patch status only when it changed.
async fn write_status<K>(
    api: &Api<K>,
    name: &str,
    previous: Option<&TopologyStatus>,
    next: &TopologyStatus,
) -> Result<(), Error>
where
    K: TopologyKind,
{
    let Some(patch) = status_patch(previous, next)? else {
        debug!(name = %name, "Status unchanged");
        return Ok(());
    };

    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    api.patch_status(name, &params, &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn publish_phase_changes<K>(obj: &K, ctx: &Context, changes: &[PhaseChange])
where
    K: TopologyKind,
{
    for change in changes {
        info!(
            kind = %K::kind(&()),
            name = %obj.name_any(),
            from = %change.from,
            to = %change.to,
            event = %change.event,
            "Phase transition"
        );
        let note = Some(format!(
            "{} -> {}: {}",
            change.from, change.to, change.description
        ));
        match change.to {
            TopologyPhase::Degraded | TopologyPhase::Failed | TopologyPhase::Invalid => {
                ctx.publish_warning_event(obj, change.to.as_str(), "PhaseTransition", note)
                    .await;
            }
            _ => {
                ctx.publish_normal_event(obj, change.to.as_str(), "PhaseTransition", note)
                    .await;
            }
        }
    }
}

/// Sweep children, then release the finalizer.
async fn handle_deletion<K>(obj: &K, ctx: &Context, api: &Api<K>) -> Result<Action, Error>
where
    K: TopologyKind,
{
    let name = obj.name_any();
    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let uid = obj.uid().unwrap_or_default();
    info!(kind = %K::kind(&()), name = %name, "Handling deletion");

    let store = KubeStore::new(ctx.client.clone());
    let deleted = sweep_children(&store, &namespace, &uid).await?;
    ctx.publish_normal_event(
        obj,
        "Deleting",
        "SweepChildren",
        Some(format!("Deleted {deleted} children")),
    )
    .await;

    remove_finalizer(api, &name, FINALIZER).await?;
    ctx.backoff.reset(&object_key(obj));
    Ok(Action::await_change())
}
