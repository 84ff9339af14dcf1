//! redis-operator library crate
//!
//! This module exports the controllers, CRD definitions, resource
//! generators, and the apply engine.

pub mod apply;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod sentinel;
pub mod signals;
pub mod slots;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::TopologyKind;
use controller::context::Context;
use controller::reconciler::{error_policy, reconcile};
use crd::{RedisCluster, RedisInstance, RedisMasterReplica, RedisSentinel};
use signals::{SignalCache, run_poller};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Controller for one topology kind, owning its StatefulSets, Services and
/// ConfigMaps.
///
/// StatefulSets are watched in full since readiness is read from their
/// status; Services and ConfigMaps only through metadata.
fn topology_controller<K>(
    client: &Client,
    namespace: Option<&str>,
    config: &OperatorConfig,
) -> Controller<K>
where
    K: TopologyKind,
{
    let watcher_config = default_watcher_config();
    let (reader, stream) =
        create_filtered_stream(scoped_api::<K>(client.clone(), namespace), watcher_config.clone());

    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);

    Controller::for_stream(stream, reader)
        .with_config(
            ControllerConfig::default()
                .concurrency(config.concurrency)
                .debounce(config.debounce()),
        )
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config).touched_objects())
}

/// Sentinel groups in `sentinels` that reference the RedisMasterReplica
/// `namespace/name`.
pub fn sentinels_referencing(
    namespace: Option<&str>,
    name: &str,
    sentinels: &[Arc<RedisSentinel>],
) -> Vec<ObjectRef<RedisSentinel>> {
    sentinels
        .iter()
        .filter(|s| s.namespace().as_deref() == namespace)
        .filter(|s| {
            s.spec
                .master_replica_ref
                .as_ref()
                .is_some_and(|r| r.name == name)
        })
        .map(|s| ObjectRef::from_obj(s.as_ref()))
        .collect()
}

/// Run a controller until its stream ends.
async fn drive<K>(controller: Controller<K>, ctx: Arc<Context>)
where
    K: TopologyKind,
{
    let kind = K::kind(&()).to_string();
    info!(kind = %kind, "Starting controller");

    controller
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events for children of a deleted object still
                    // trigger reconciles; those are not errors.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!(kind = %kind, "Controller stream ended unexpectedly");
}

/// Run the controllers of all four topology kinds.
///
/// Namespace scoping comes from `config.watch_namespace`. When a metrics
/// collector URL is configured, its health signals are polled in the
/// background and feed the Ready/Degraded decision.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controllers(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: OperatorConfig,
) {
    let namespace = config.watch_namespace.clone();
    let namespace = namespace.as_deref();
    info!(
        "Starting controllers for Redis topologies (scope: {})",
        namespace.unwrap_or("cluster-wide")
    );

    let signals = Arc::new(SignalCache::new());
    if let Some(url) = config.metrics_collector_url.clone() {
        info!(url = %url, "Polling health signals from the metrics collector");
        tokio::spawn(run_poller(
            signals.clone(),
            url,
            config.signal_poll_interval(),
        ));
    }

    // Mark as ready once we start the controllers
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(
        client.clone(),
        health_state,
        signals,
        config.clone(),
    ));

    let instances = topology_controller::<RedisInstance>(&client, namespace, &config);
    let master_replicas = topology_controller::<RedisMasterReplica>(&client, namespace, &config);
    let clusters = topology_controller::<RedisCluster>(&client, namespace, &config);

    // Referencing sentinels wait on their RedisMasterReplica; requeue them
    // whenever it changes, status included.
    let sentinels = topology_controller::<RedisSentinel>(&client, namespace, &config);
    let sentinel_store = sentinels.store();
    let sentinels = sentinels.watches(
        scoped_api::<RedisMasterReplica>(client.clone(), namespace),
        default_watcher_config(),
        move |mr: RedisMasterReplica| {
            sentinels_referencing(
                mr.namespace().as_deref(),
                &mr.name_any(),
                &sentinel_store.state(),
            )
        },
    );

    futures::join!(
        drive(instances, ctx.clone()),
        drive(master_replicas, ctx.clone()),
        drive(sentinels, ctx.clone()),
        drive(clusters, ctx),
    );
}
