//! Shared fixtures for functional tests.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use redis_operator::controller::validation::validate;
use redis_operator::crd::{RedisCluster, RedisClusterSpec, SentinelSettings};

/// A declared cluster at a given spec generation, not yet validated.
pub fn declared_cluster(name: &str, generation: i64, spec: RedisClusterSpec) -> RedisCluster {
    RedisCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some("11111111-2222-3333-4444-555555555555".to_string()),
            generation: Some(generation),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// A declared cluster run through the production validator, as the
/// reconciler would see it.
pub fn validated_cluster(name: &str, generation: i64, spec: RedisClusterSpec) -> RedisCluster {
    let mut rc = declared_cluster(name, generation, spec);
    validate(&mut rc).expect("fixture spec must validate");
    rc
}

/// The spec of scenario S1: `{name:"c1", size:3, sentinel.replicas:3}`.
pub fn s1_spec() -> RedisClusterSpec {
    RedisClusterSpec {
        size: 3,
        sentinel: SentinelSettings {
            replicas: 3,
            ..Default::default()
        },
        ..Default::default()
    }
}
