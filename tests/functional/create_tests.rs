//! Scenario S1: creating a fresh cluster produces the full dependent
//! object set with the declared shape.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use redis_operator::crd::ConditionType;
use redis_operator::controller::cluster_cache::{MetaMap, State};
use redis_operator::resources::common::standard_labels;
use redis_operator::resources::{configmaps, pdb, services, statefulset};

use crate::fixtures::{s1_spec, validated_cluster};

#[test]
fn test_create_scenario_generates_all_objects() {
    let rc = validated_cluster("c1", 1, s1_spec());
    let labels = standard_labels(&rc);

    // Redis workload: 3 replicas behind its own headless service.
    let redis_sts = statefulset::generate_redis_statefulset(&rc, &labels);
    let redis_spec = redis_sts.spec.as_ref().unwrap();
    assert_eq!(redis_sts.metadata.name.as_deref(), Some("redis-cluster-c1"));
    assert_eq!(redis_spec.replicas, Some(3));
    assert_eq!(redis_spec.service_name.as_deref(), Some("redis-cluster-c1"));

    // Sentinel workload: 3 replicas behind the sentinel headless service.
    let sentinel_sts = statefulset::generate_sentinel_statefulset(&rc, &labels);
    let sentinel_spec = sentinel_sts.spec.as_ref().unwrap();
    assert_eq!(
        sentinel_sts.metadata.name.as_deref(),
        Some("redis-sentinel-c1")
    );
    assert_eq!(sentinel_spec.replicas, Some(3));
    assert_eq!(
        sentinel_spec.service_name.as_deref(),
        Some("redis-sentinel-headless-c1")
    );

    // Services.
    let redis_svc = services::generate_redis_service(&rc, &labels);
    assert_eq!(
        redis_svc.spec.as_ref().unwrap().cluster_ip.as_deref(),
        Some("None")
    );
    let sentinel_svc = services::generate_sentinel_service(&rc, &labels);
    assert!(sentinel_svc.spec.as_ref().unwrap().cluster_ip.is_none());
    let headless = services::generate_sentinel_headless_service(&rc, &labels);
    assert_eq!(
        headless.metadata.name.as_deref(),
        Some("redis-sentinel-headless-c1")
    );

    // PDBs with minAvailable=2 for both workloads.
    let redis_pdb = pdb::generate_redis_pod_disruption_budget(&rc, &labels);
    assert_eq!(
        redis_pdb.spec.unwrap().min_available,
        Some(IntOrString::Int(2))
    );
    let sentinel_pdb = pdb::generate_sentinel_pod_disruption_budget(&rc, &labels);
    assert_eq!(
        sentinel_pdb.spec.unwrap().min_available,
        Some(IntOrString::Int(2))
    );

    // Config bundles.
    let seed = configmaps::generate_sentinel_config_map(&rc, &labels);
    assert!(seed.data.unwrap().contains_key("sentinel.conf"));
    let readiness = configmaps::generate_sentinel_readiness_config_map(&rc, &labels);
    assert!(readiness.data.unwrap().contains_key("readiness.sh"));
    let shutdown = configmaps::generate_redis_shutdown_config_map(&rc, &labels);
    assert!(shutdown.data.unwrap().contains_key("shutdown.sh"));
}

#[test]
fn test_first_reconcile_classifies_creation() {
    let rc = validated_cluster("c1", 1, s1_spec());
    let cache = MetaMap::new();

    let meta = cache.cache(&rc);
    assert_eq!(meta.state, State::Create);
    assert_eq!(meta.status, ConditionType::Creating);
    assert_eq!(meta.message, "Bootstrap redis cluster");
}

#[test]
fn test_validator_fills_s1_defaults() {
    let rc = validated_cluster("c1", 1, s1_spec());

    assert_eq!(rc.spec.image, "redis:5.0.4-alpine");
    assert_eq!(rc.spec.sentinel.image, "redis:5.0.4-alpine");
    // Persistence defaults applied to an empty config.
    assert_eq!(
        rc.spec.config.get("appendonly").map(String::as_str),
        Some("yes")
    );
    assert_eq!(
        rc.spec.config.get("slave-priority").map(String::as_str),
        Some("1")
    );
}

#[test]
fn test_sentinel_pods_copy_seed_config_before_start() {
    let rc = validated_cluster("c1", 1, s1_spec());
    let labels = standard_labels(&rc);

    let sts = statefulset::generate_sentinel_statefulset(&rc, &labels);
    let pod = sts.spec.unwrap().template.spec.unwrap();

    // The init container copies the read-only ConfigMap into the
    // writable emptyDir the sentinel container mounts at /redis.
    let init = &pod.init_containers.unwrap()[0];
    assert_eq!(init.name, "sentinel-config-copy");

    let volumes = pod.volumes.unwrap();
    assert!(volumes.iter().any(|v| v.name == "sentinel-config" && v.config_map.is_some()));
    assert!(
        volumes
            .iter()
            .any(|v| v.name == "sentinel-config-writable" && v.empty_dir.is_some())
    );
}
