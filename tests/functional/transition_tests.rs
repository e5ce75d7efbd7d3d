//! Scenarios S2/S3/S5: spec edits classified by the meta cache, and the
//! status condition list the external consumer observes.

use redis_operator::controller::checker::expected_config_value;
use redis_operator::controller::cluster_cache::{MetaMap, State};
use redis_operator::controller::healer;
use redis_operator::crd::{ConditionType, RedisClusterStatus};
use redis_operator::resources::common::standard_labels;
use redis_operator::resources::{configmaps, statefulset};

use crate::fixtures::{s1_spec, validated_cluster};

#[test]
fn test_scale_up_scenario() {
    // S2: patch size 3 -> 4 on a healthy cluster.
    let cache = MetaMap::new();
    cache.cache(&validated_cluster("c1", 1, s1_spec()));

    let mut spec = s1_spec();
    spec.size = 4;
    let meta = cache.cache(&validated_cluster("c1", 2, spec));

    assert_eq!(meta.state, State::Update);
    assert_eq!(meta.status, ConditionType::Scaling);
    assert_eq!(meta.message, "Scaling up from 3 to 4");

    // The regenerated workload carries the new replica count.
    let sts = statefulset::generate_redis_statefulset(&meta.obj, &standard_labels(&meta.obj));
    assert_eq!(sts.spec.unwrap().replicas, Some(4));

    // Quorum stays derived from the sentinel count.
    assert_eq!(healer::quorum(&meta.obj), 2);
}

#[test]
fn test_config_update_scenario() {
    // S3: patch config {hz: 13, maxclients: 103}.
    let cache = MetaMap::new();
    cache.cache(&validated_cluster("c1", 1, s1_spec()));

    let mut spec = s1_spec();
    spec.config.insert("hz".to_string(), "13".to_string());
    spec.config.insert("maxclients".to_string(), "103".to_string());
    let meta = cache.cache(&validated_cluster("c1", 2, spec));

    assert_eq!(meta.status, ConditionType::Updating);
    assert_eq!(meta.message, "Updating redis config");

    // The declared values the checker will demand from every replica.
    assert_eq!(expected_config_value("hz", "13").unwrap(), "13");
    assert_eq!(expected_config_value("maxclients", "103").unwrap(), "103");
    // slave-priority survives any user edit.
    assert_eq!(
        meta.obj.spec.config.get("slave-priority").map(String::as_str),
        Some("1")
    );
}

#[test]
fn test_memory_unit_values_normalised_for_comparison() {
    let value = expected_config_value("maxmemory", "100mb").unwrap();
    assert_eq!(value, "104857600");

    // Non-memory keys compare verbatim.
    assert_eq!(expected_config_value("save", "900 1").unwrap(), "900 1");
}

#[test]
fn test_password_immutability_scenario() {
    // S5: declare password "a", reach steady state, patch to "b".
    let cache = MetaMap::new();
    let mut spec = s1_spec();
    spec.password = "a".to_string();
    cache.cache(&validated_cluster("c1", 1, spec));

    let mut spec = s1_spec();
    spec.password = "b".to_string();
    let meta = cache.cache(&validated_cluster("c1", 2, spec));

    // The cache silently keeps the original password.
    assert_eq!(meta.password, "a");
    assert_eq!(meta.obj.spec.password, "a");
    assert_eq!(meta.auth(), Some("a"));

    // Dependent objects regenerated from the snapshot still carry "a".
    let labels = standard_labels(&meta.obj);
    let seed = configmaps::generate_sentinel_config_map(&meta.obj, &labels);
    assert!(seed.data.unwrap()["sentinel.conf"].contains("sentinel auth-pass mymaster a"));

    let sts = statefulset::generate_redis_statefulset(&meta.obj, &labels);
    let container = &sts.spec.unwrap().template.spec.unwrap().containers[0];
    assert!(
        container
            .command
            .as_ref()
            .unwrap()
            .contains(&"--requirepass 'a'".to_string())
    );
}

#[test]
fn test_upgrade_scenario_classification() {
    let cache = MetaMap::new();
    cache.cache(&validated_cluster("c1", 1, s1_spec()));

    let mut spec = s1_spec();
    spec.image = "redis:6.2-alpine".to_string();
    let meta = cache.cache(&validated_cluster("c1", 2, spec));

    assert_eq!(meta.status, ConditionType::Upgrading);
    assert_eq!(meta.message, "Upgrading to redis:6.2-alpine");
}

#[test]
fn test_healthy_demoted_to_creating_on_restart() {
    // A healthy cluster whose workload disappears rolls its condition
    // back to Creating with a message naming the cause.
    let mut status = RedisClusterStatus::default();
    status.set_create_condition("Bootstrap redis cluster");
    status.set_ready_condition("Cluster ok");
    assert_eq!(status.current_condition(), Some(ConditionType::Healthy));

    status.set_create_condition("redis server or sentinel server be removed by user, restart");
    assert_eq!(status.current_condition(), Some(ConditionType::Creating));
    assert_eq!(
        status.conditions[0].message,
        "redis server or sentinel server be removed by user, restart"
    );
}

#[test]
fn test_condition_history_is_newest_first() {
    let mut status = RedisClusterStatus::default();
    status.set_create_condition("Bootstrap redis cluster");
    status.set_scaling_up_condition("Scaling up from 3 to 4");
    status.set_ready_condition("Cluster ok");

    let types: Vec<ConditionType> = status.conditions.iter().map(|c| c.r#type).collect();
    assert_eq!(
        types,
        vec![
            ConditionType::Healthy,
            ConditionType::Scaling,
            ConditionType::Creating
        ]
    );
}
