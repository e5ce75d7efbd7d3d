//! PodDisruptionBudget generation for redis clusters.
//!
//! One PDB per workload keeps at least two pods of each component
//! available during voluntary disruptions, enough for replication to keep
//! a promotion candidate and for sentinel to keep a quorum majority.

use std::collections::BTreeMap;

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::RedisCluster;
use crate::resources::common::{
    REDIS_ROLE_NAME, SENTINEL_ROLE_NAME, merge_labels, owner_reference, redis_name,
    selector_labels, sentinel_name,
};

const MIN_AVAILABLE: i32 = 2;

/// Generate the PDB for the redis replicas.
pub fn generate_redis_pod_disruption_budget(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> PodDisruptionBudget {
    generate(rc, redis_name(rc), REDIS_ROLE_NAME, labels)
}

/// Generate the PDB for the sentinels.
pub fn generate_sentinel_pod_disruption_budget(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> PodDisruptionBudget {
    generate(rc, sentinel_name(rc), SENTINEL_ROLE_NAME, labels)
}

fn generate(
    rc: &RedisCluster,
    name: String,
    role: &str,
    labels: &BTreeMap<String, String>,
) -> PodDisruptionBudget {
    let labels = merge_labels(labels.clone(), selector_labels(role, &rc.name_any()));

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: rc.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(MIN_AVAILABLE)),
            selector: Some(LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
