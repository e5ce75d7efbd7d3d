//! redis-operator library crate
//!
//! This module exports the controller, CRD definitions, and resource
//! generators for managing highly-available Redis clusters.

pub mod client;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Config as RuntimeConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::{Context, ControllerConfig};
use controller::reconciler::{error_policy, reconcile};
use crd::RedisCluster;

/// Annotation selecting which controller instance manages a cluster.
pub const ANNOTATION_SCOPE: &str = "redis.kun/scope";

/// Annotation value claiming a cluster for the cluster-wide controller.
pub const ANNOTATION_CLUSTER_SCOPED: &str = "cluster-scoped";

/// Whether this controller instance manages the given object.
///
/// Clusters annotated `redis.kun/scope: cluster-scoped` belong to the
/// cluster-wide controller; everything else belongs to namespace-scoped
/// controllers.
pub fn should_manage(meta: &ObjectMeta, cluster_scoped: bool) -> bool {
    match meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_SCOPE))
    {
        Some(value) => cluster_scoped && value == ANNOTATION_CLUSTER_SCOPED,
        None => !cluster_scoped,
    }
}

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

/// Create the default watcher configuration for the controller.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for the primary resource.
///
/// The reflector keeps an in-memory cache, the backoff retries watch
/// errors, and the generation predicate drops status-only updates so a
/// reconcile writing status does not retrigger itself.
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

/// Run the operator controller (cluster-wide).
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    config: ControllerConfig,
) {
    run_controller_scoped(client, health_state, config, None).await
}

/// Run the operator controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that
/// namespace; when `None`, watches cluster-wide.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    mut config: ControllerConfig,
    namespace: Option<&str>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    config.cluster_scoped = namespace.is_none();
    info!(
        scope = %scope_msg,
        max_concurrent = config.max_concurrent_reconciles,
        reconcile_time_secs = config.reconcile_time.as_secs(),
        "Starting controller for RedisCluster resources"
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), health_state, config));

    // Set up APIs for the controller (namespaced or cluster-wide)
    let clusters: Api<RedisCluster> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);
    let pdbs: Api<PodDisruptionBudget> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();

    // Create filtered stream with standard optimizations (reflector,
    // backoff, generation predicate)
    let (reader, resource_stream) = create_filtered_stream(clusters, watcher_config.clone());

    // Keep the full watcher for StatefulSets (the checker reads
    // status.readyReplicas); owned Services, ConfigMaps, and PDBs only
    // need existence signals, so metadata watchers keep memory down.
    Controller::for_stream(resource_stream, reader)
        .with_config(RuntimeConfig::default().concurrency(config.max_concurrent_reconciles as u16))
        .owns(statefulsets, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(pdbs, watcher_config).touched_objects())
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| {
            let ctx = ctx.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled: {}", obj.name);
                    }
                    Err(e) => {
                        // NotFound errors are expected after a deletion when
                        // related watch events still reference the removed
                        // object; that is the point to drop its cache entry
                        // and metric series.
                        let deleted_ref = match &e {
                            kube::runtime::controller::Error::ObjectNotFound(obj_ref) => {
                                Some(obj_ref.clone())
                            }
                            kube::runtime::controller::Error::ReconcilerFailed(err, obj_ref)
                                if err.is_not_found() =>
                            {
                                Some(obj_ref.clone())
                            }
                            _ => None,
                        };
                        match deleted_ref {
                            Some(obj_ref) => {
                                debug!("Object no longer exists (likely deleted): {:?}", e);
                                let namespace = obj_ref.namespace.clone().unwrap_or_default();
                                ctx.meta_cache.evict(&namespace, &obj_ref.name);
                                ctx.delete_cluster_metric(&namespace, &obj_ref.name);
                            }
                            None => {
                                error!("Reconciliation error: {:?}", e);
                            }
                        }
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
