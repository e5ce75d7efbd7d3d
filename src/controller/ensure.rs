//! Convergence of dependent objects.
//!
//! For each object derived from a RedisCluster: create it when absent,
//! and for the stateful workloads update it when a material field drifted.
//! The material surface is deliberately small (replica count, main
//! container resources, exporter presence); diffing whole objects against
//! platform-defaulted fields would cause reconcile storms.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, ResourceRequirements, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{RedisCluster, ResourceRequirementsSpec};
use crate::resources::common::{
    OPERATOR_NAME, parse_quantity, redis_name, sentinel_name, standard_labels,
};
use crate::resources::statefulset::EXPORTER_CONTAINER_NAME;
use crate::resources::{configmaps, pdb, services, statefulset};

/// Ensure every dependent object exists and matches the declared spec.
///
/// Order matters: services and config bundles first (the workloads mount
/// them), the redis workload next, sentinel last.
pub async fn ensure_resources(ctx: &Context, rc: &RedisCluster) -> Result<()> {
    let namespace = rc.namespace().unwrap_or_else(|| "default".to_string());
    let labels = standard_labels(rc);

    ensure_services(ctx, rc, &namespace, &labels).await?;
    ensure_config_maps(ctx, rc, &namespace, &labels).await?;
    ensure_redis_statefulset(ctx, rc, &namespace, &labels).await?;
    ensure_sentinel_statefulset(ctx, rc, &namespace, &labels).await?;

    Ok(())
}

async fn ensure_services(
    ctx: &Context,
    rc: &RedisCluster,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);

    create_if_not_exists(&api, &services::generate_redis_service(rc, labels)).await?;
    create_if_not_exists(&api, &services::generate_sentinel_service(rc, labels)).await?;
    create_if_not_exists(&api, &services::generate_sentinel_headless_service(rc, labels)).await?;
    Ok(())
}

async fn ensure_config_maps(
    ctx: &Context,
    rc: &RedisCluster,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);

    // Sentinel rewrites its own copy of the seed config; leave the
    // ConfigMap alone once it exists.
    create_if_not_exists(&api, &configmaps::generate_sentinel_config_map(rc, labels)).await?;

    // Scripts are regenerated every reconcile so fixes roll out.
    apply(&api, &configmaps::generate_sentinel_readiness_config_map(rc, labels)).await?;

    if !rc.spec.shutdown_config_map.is_empty() {
        // A user-supplied shutdown script must exist before the workload
        // mounts it.
        api.get(&rc.spec.shutdown_config_map).await?;
    } else {
        apply(&api, &configmaps::generate_redis_shutdown_config_map(rc, labels)).await?;
    }
    Ok(())
}

async fn ensure_redis_statefulset(
    ctx: &Context,
    rc: &RedisCluster,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    let pdb_api: Api<PodDisruptionBudget> = Api::namespaced(ctx.client.clone(), namespace);
    create_if_not_exists(&pdb_api, &pdb::generate_redis_pod_disruption_budget(rc, labels)).await?;

    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    let name = redis_name(rc);
    let desired = statefulset::generate_redis_statefulset(rc, labels);

    match get_opt(&api, &name).await? {
        None => {
            info!(name = %name, "creating redis statefulset");
            api.create(&PostParams::default(), &desired).await?;
        }
        Some(current) => {
            if should_update_workload(&rc.spec.resources, &current, rc.spec.size)
                || exporter_changed(rc, &current)
            {
                info!(name = %name, "updating redis statefulset");
                replace_with_resource_version(&api, &name, desired, &current).await?;
            }
        }
    }
    Ok(())
}

async fn ensure_sentinel_statefulset(
    ctx: &Context,
    rc: &RedisCluster,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    let pdb_api: Api<PodDisruptionBudget> = Api::namespaced(ctx.client.clone(), namespace);
    create_if_not_exists(&pdb_api, &pdb::generate_sentinel_pod_disruption_budget(rc, labels))
        .await?;

    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    let name = sentinel_name(rc);
    let desired = statefulset::generate_sentinel_statefulset(rc, labels);

    match get_opt(&api, &name).await? {
        None => {
            info!(name = %name, "creating sentinel statefulset");
            api.create(&PostParams::default(), &desired).await?;
        }
        Some(current) => {
            if should_update_workload(&rc.spec.sentinel.resources, &current, rc.spec.sentinel.replicas)
            {
                info!(name = %name, "updating sentinel statefulset");
                replace_with_resource_version(&api, &name, desired, &current).await?;
            }
        }
    }
    Ok(())
}

/// Replace an object carrying over the live resource version, so the
/// write fails cleanly on a concurrent modification.
async fn replace_with_resource_version(
    api: &Api<StatefulSet>,
    name: &str,
    mut desired: StatefulSet,
    current: &StatefulSet,
) -> Result<()> {
    desired.metadata.resource_version = current.metadata.resource_version.clone();
    api.replace(name, &PostParams::default(), &desired).await?;
    Ok(())
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(Error::Kube(e)),
    }
}

async fn create_if_not_exists<K>(api: &Api<K>, desired: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = desired.meta().name.clone().unwrap_or_default();
    if get_opt(api, &name).await?.is_none() {
        debug!(name = %name, "creating dependent object");
        api.create(&PostParams::default(), desired).await?;
    }
    Ok(())
}

async fn apply<K>(api: &Api<K>, desired: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = desired.meta().name.clone().unwrap_or_default();
    api.patch(
        &name,
        &PatchParams::apply(OPERATOR_NAME).force(),
        &Patch::Apply(desired),
    )
    .await?;
    Ok(())
}

/// Material diff for a stateful workload: replica count and the main
/// container's resource quantities.
fn should_update_workload(
    expected: &ResourceRequirementsSpec,
    current: &StatefulSet,
    expected_replicas: i32,
) -> bool {
    let spec = match &current.spec {
        Some(spec) => spec,
        None => return true,
    };
    if spec.replicas != Some(expected_replicas) {
        return true;
    }

    let container_resources = spec
        .template
        .spec
        .as_ref()
        .and_then(|pod| pod.containers.first())
        .and_then(|c| c.resources.as_ref());
    resources_differ(expected, container_resources)
}

fn resources_differ(
    expected: &ResourceRequirementsSpec,
    current: Option<&ResourceRequirements>,
) -> bool {
    let quantity = |list: Option<&BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>>,
                    key: &str| {
        list.and_then(|l| l.get(key)).and_then(|q| parse_quantity(&q.0))
    };

    let requests = current.and_then(|r| r.requests.as_ref());
    let limits = current.and_then(|r| r.limits.as_ref());

    parse_quantity(&expected.requests.cpu) != quantity(requests, "cpu")
        || parse_quantity(&expected.requests.memory) != quantity(requests, "memory")
        || parse_quantity(&expected.limits.cpu) != quantity(limits, "cpu")
        || parse_quantity(&expected.limits.memory) != quantity(limits, "memory")
}

/// An exporter sidecar must appear or disappear with `exporter.enabled`.
fn exporter_changed(rc: &RedisCluster, current: &StatefulSet) -> bool {
    let has_exporter = current
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|pod| {
            pod.containers
                .iter()
                .any(|c| c.name == EXPORTER_CONTAINER_NAME)
        })
        .unwrap_or(false);
    rc.spec.exporter.enabled != has_exporter
}
