//! Common resource generation utilities.
//!
//! Naming, labels, owner references, and quantity handling shared by all
//! dependent-object generators.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::{RedisCluster, ResourceRequirementsSpec};

/// Operator identity used in labels and the event reporter.
pub const OPERATOR_NAME: &str = "redis-operator";

/// Part-of label value shared by every dependent object.
pub const APP_LABEL: &str = "redis-cluster";

/// Component label value for redis objects.
pub const REDIS_ROLE_NAME: &str = "redis";

/// Component label value for sentinel objects.
pub const SENTINEL_ROLE_NAME: &str = "sentinel";

/// Topology key for the default anti-affinity rule.
pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// File name of the sentinel configuration inside its ConfigMap.
pub const SENTINEL_CONFIG_FILE_NAME: &str = "sentinel.conf";

const BASE_NAME: &str = "redis";

fn generate_name(type_name: &str, meta_name: &str) -> String {
    format!("{}{}-{}", BASE_NAME, type_name, meta_name)
}

/// Name of the redis StatefulSet and headless service.
pub fn redis_name(rc: &RedisCluster) -> String {
    generate_name("-cluster", &rc.name_any())
}

/// Name of the sentinel StatefulSet, service, and seed ConfigMap.
pub fn sentinel_name(rc: &RedisCluster) -> String {
    generate_name("-sentinel", &rc.name_any())
}

/// Name of the sentinel headless service.
pub fn sentinel_headless_name(rc: &RedisCluster) -> String {
    generate_name("-sentinel-headless", &rc.name_any())
}

/// Name of the sentinel readiness-script ConfigMap.
pub fn sentinel_readiness_name(rc: &RedisCluster) -> String {
    generate_name("-sentinel-readiness", &rc.name_any())
}

/// Name of the generated shutdown-script ConfigMap.
pub fn redis_shutdown_name(rc: &RedisCluster) -> String {
    generate_name("r-s", &rc.name_any())
}

/// Name of the shutdown ConfigMap actually mounted: the user-supplied one
/// when set, the generated one otherwise.
pub fn redis_shutdown_config_map_name(rc: &RedisCluster) -> String {
    if !rc.spec.shutdown_config_map.is_empty() {
        rc.spec.shutdown_config_map.clone()
    } else {
        redis_shutdown_name(rc)
    }
}

/// Labels shared by every object the operator derives from a cluster.
pub fn standard_labels(rc: &RedisCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        OPERATOR_NAME.to_string(),
    );
    // User labels on the declared object propagate to dependents.
    for (key, value) in rc.labels() {
        labels.insert(key.clone(), value.clone());
    }
    labels
}

/// Selector labels identifying a component's pods.
pub fn selector_labels(role: &str, cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        APP_LABEL.to_string(),
    );
    labels.insert("app.kubernetes.io/component".to_string(), role.to_string());
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        cluster_name.to_string(),
    );
    labels
}

/// Selector labels rendered as a list-params label selector string.
pub fn selector_string(role: &str, cluster_name: &str) -> String {
    selector_labels(role, cluster_name)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Merge label maps; later maps win on conflicts.
pub fn merge_labels(
    base: BTreeMap<String, String>,
    extra: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base;
    merged.extend(extra);
    merged
}

/// Controller owner reference so dependents are garbage collected with the
/// RedisCluster.
pub fn owner_reference(rc: &RedisCluster) -> OwnerReference {
    OwnerReference {
        api_version: "redis.kun/v1beta1".to_string(),
        kind: "RedisCluster".to_string(),
        name: rc.name_any(),
        uid: rc.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Build k8s resource requirements from the spec's quantity strings,
/// skipping empty values.
pub fn generate_resource_requirements(spec: &ResourceRequirementsSpec) -> ResourceRequirements {
    ResourceRequirements {
        requests: generate_resource_list(&spec.requests.cpu, &spec.requests.memory),
        limits: generate_resource_list(&spec.limits.cpu, &spec.limits.memory),
        ..Default::default()
    }
}

fn generate_resource_list(cpu: &str, memory: &str) -> Option<BTreeMap<String, Quantity>> {
    let mut list = BTreeMap::new();
    if !cpu.is_empty() {
        list.insert("cpu".to_string(), Quantity(cpu.to_string()));
    }
    if !memory.is_empty() {
        list.insert("memory".to_string(), Quantity(memory.to_string()));
    }
    if list.is_empty() { None } else { Some(list) }
}

/// Parse a Kubernetes quantity string into a canonical numeric value.
///
/// Understands the decimal SI suffixes (k, M, G, T, P, E), the binary
/// suffixes (Ki..Ei), and the milli suffix used for CPU. Comparing parsed
/// values avoids false diffs between e.g. "1000m" and "1".
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    if quantity.is_empty() {
        return None;
    }

    let suffixes: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0_f64.powi(4)),
        ("Pi", 1024.0_f64.powi(5)),
        ("Ei", 1024.0_f64.powi(6)),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    for (suffix, mul) in suffixes {
        if let Some(digits) = quantity.strip_suffix(suffix) {
            return digits.parse::<f64>().ok().map(|n| n * mul);
        }
    }
    quantity.parse::<f64>().ok()
}

/// Compare two quantity strings by value.
pub fn quantities_equal(a: &str, b: &str) -> bool {
    match (parse_quantity(a), parse_quantity(b)) {
        (Some(a), Some(b)) => a == b,
        (None, None) => true,
        _ => false,
    }
}
