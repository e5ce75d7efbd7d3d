//! Service generation for redis clusters.
//!
//! Three services per cluster:
//! - **Redis headless service**: per-pod DNS for the replicas.
//! - **Sentinel service**: cluster-routable ClusterIP clients use for
//!   master discovery.
//! - **Sentinel headless service**: per-pod DNS backing the sentinel
//!   StatefulSet identity.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::RedisCluster;
use crate::resources::common::{
    REDIS_ROLE_NAME, SENTINEL_ROLE_NAME, merge_labels, owner_reference, redis_name,
    selector_labels, sentinel_headless_name, sentinel_name,
};

/// Redis data port.
const REDIS_PORT: i32 = 6379;
/// Sentinel port.
const SENTINEL_PORT: i32 = 26379;

/// Generate the headless service for the redis replicas.
pub fn generate_redis_service(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> Service {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(REDIS_ROLE_NAME, &rc.name_any()),
    );

    Service {
        metadata: ObjectMeta {
            name: Some(redis_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("redis".to_string()),
                port: REDIS_PORT,
                target_port: Some(IntOrString::Int(REDIS_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the routable sentinel service.
pub fn generate_sentinel_service(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> Service {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(SENTINEL_ROLE_NAME, &rc.name_any()),
    );

    Service {
        metadata: ObjectMeta {
            name: Some(sentinel_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("sentinel".to_string()),
                port: SENTINEL_PORT,
                target_port: Some(IntOrString::Int(SENTINEL_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the headless service backing the sentinel StatefulSet.
pub fn generate_sentinel_headless_service(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> Service {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(SENTINEL_ROLE_NAME, &rc.name_any()),
    );

    Service {
        metadata: ObjectMeta {
            name: Some(sentinel_headless_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("sentinel".to_string()),
                port: SENTINEL_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RedisClusterSpec;
    use crate::resources::common::standard_labels;

    fn test_cluster(name: &str) -> RedisCluster {
        RedisCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("test-uid".to_string()),
                ..Default::default()
            },
            spec: RedisClusterSpec::default(),
            status: None,
        }
    }

    #[test]
    fn test_redis_service_is_headless() {
        let rc = test_cluster("c1");
        let svc = generate_redis_service(&rc, &standard_labels(&rc));

        assert_eq!(svc.metadata.name, Some("redis-cluster-c1".to_string()));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 6379);
    }

    #[test]
    fn test_sentinel_service_is_routable() {
        let rc = test_cluster("c1");
        let svc = generate_sentinel_service(&rc, &standard_labels(&rc));

        assert_eq!(svc.metadata.name, Some("redis-sentinel-c1".to_string()));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, None);
        assert_eq!(spec.ports.unwrap()[0].port, 26379);
    }

    #[test]
    fn test_sentinel_headless_service() {
        let rc = test_cluster("c1");
        let svc = generate_sentinel_headless_service(&rc, &standard_labels(&rc));

        assert_eq!(
            svc.metadata.name,
            Some("redis-sentinel-headless-c1".to_string())
        );
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
    }

    #[test]
    fn test_service_selector_targets_component() {
        let rc = test_cluster("c1");
        let svc = generate_sentinel_service(&rc, &standard_labels(&rc));

        let selector = svc.spec.unwrap().selector.unwrap();
        assert_eq!(
            selector.get("app.kubernetes.io/component"),
            Some(&"sentinel".to_string())
        );
        assert_eq!(
            selector.get("app.kubernetes.io/name"),
            Some(&"c1".to_string())
        );
    }

    #[test]
    fn test_services_carry_owner_reference() {
        let rc = test_cluster("c1");
        let svc = generate_redis_service(&rc, &standard_labels(&rc));

        let refs = svc.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "RedisCluster");
    }
}
