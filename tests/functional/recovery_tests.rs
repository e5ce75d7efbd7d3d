//! Scenarios S4 and S6: master-less recovery and the multi-master fatal
//! invariant, driven through the production `heal_topology` against a
//! simulated deployment.

use std::time::Duration;

use redis_operator::controller::cluster_cache::{Meta, MetaMap, State};
use redis_operator::controller::error::Error;
use redis_operator::controller::reconciler::{HealAction, heal_topology};

use crate::fixtures::{s1_spec, validated_cluster};
use crate::mock_wire::{MockRedisClient, snapshot};

const REPLICAS: [&str; 3] = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];
const SENTINELS: [&str; 3] = ["10.1.0.1", "10.1.0.2", "10.1.0.3"];

/// Meta for an S1 cluster that already went through a reconcile, so the
/// current pass is a steady-state Check.
fn steady_meta() -> Meta {
    let rc = validated_cluster("c1", 1, s1_spec());
    let cache = MetaMap::new();
    cache.cache(&rc);
    let meta = cache.cache(&rc);
    assert_eq!(meta.state, State::Check);
    meta
}

#[tokio::test]
async fn test_masterless_recovery_elects_oldest() {
    // S4: the master is externally demoted; all three replicas report
    // role:slave.
    let meta = steady_meta();
    let mock = MockRedisClient::converged(&meta.obj, "10.0.0.1", &REPLICAS, &SENTINELS);
    mock.demote_all_masters();

    let topology = snapshot(&REPLICAS, &SENTINELS, Duration::from_secs(600));
    let (master, actions) = heal_topology(&mock, &meta, &topology)
        .await
        .expect("recovery should succeed");

    // The oldest replica wins the election and the rest follow it.
    assert_eq!(master, "10.0.0.1");
    assert!(actions.contains(&HealAction::ElectedOldestAsMaster {
        ip: "10.0.0.1".to_string()
    }));

    let state = mock.state();
    assert!(state.masters.contains("10.0.0.1"));
    assert_eq!(state.masters.len(), 1);
    assert_eq!(
        state.slave_of.get("10.0.0.2").map(String::as_str),
        Some("10.0.0.1")
    );
    assert_eq!(
        state.slave_of.get("10.0.0.3").map(String::as_str),
        Some("10.0.0.1")
    );
    drop(state);

    assert!(
        mock.writes()
            .contains(&"SLAVEOF NO ONE @10.0.0.1".to_string())
    );
    assert!(
        mock.writes()
            .contains(&"SLAVEOF 10.0.0.1 6379 @10.0.0.2".to_string())
    );
}

#[tokio::test]
async fn test_masterless_recovery_waits_for_young_replicas() {
    // Freshly started replicas may still be loading their dataset;
    // election is deferred until the grace period passes.
    let meta = steady_meta();
    let mock = MockRedisClient::converged(&meta.obj, "10.0.0.1", &REPLICAS, &SENTINELS);
    mock.demote_all_masters();

    let topology = snapshot(&REPLICAS, &SENTINELS, Duration::from_secs(30));
    let err = heal_topology(&mock, &meta, &topology)
        .await
        .expect_err("young replicas must defer the election");

    assert!(matches!(err, Error::NotConverged(_)));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn test_masterless_single_replica_promoted_directly() {
    // With only one running replica there is nothing to order; it is
    // promoted immediately, grace period or not.
    let meta = steady_meta();
    let replicas = ["10.0.0.1"];
    let mock = MockRedisClient::converged(&meta.obj, "10.0.0.1", &replicas, &SENTINELS);
    mock.demote_all_masters();

    let topology = snapshot(&replicas, &SENTINELS, Duration::from_secs(5));
    let (master, actions) = heal_topology(&mock, &meta, &topology)
        .await
        .expect("single replica promotion should succeed");

    assert_eq!(master, "10.0.0.1");
    assert!(actions.contains(&HealAction::PromotedSingleReplica {
        ip: "10.0.0.1".to_string()
    }));
    assert!(mock.state().masters.contains("10.0.0.1"));
}

#[tokio::test]
async fn test_multi_master_is_fatal_and_heals_nothing() {
    // S6: two replicas forced into the master role by hand.
    let meta = steady_meta();
    let mock = MockRedisClient::converged(&meta.obj, "10.0.0.1", &REPLICAS, &SENTINELS);
    mock.force_master("10.0.0.2");

    let topology = snapshot(&REPLICAS, &SENTINELS, Duration::from_secs(600));
    let err = heal_topology(&mock, &meta, &topology)
        .await
        .expect_err("a split must not be healed automatically");

    match err {
        Error::FatalInvariant(message) => {
            assert_eq!(message, "more than one master, fix manually");
        }
        other => panic!("expected FatalInvariant, got {:?}", other),
    }

    // No heal action was issued; an arbitrary pick could lose writes.
    assert!(mock.writes().is_empty());
    let state = mock.state();
    assert!(state.masters.contains("10.0.0.1"));
    assert!(state.masters.contains("10.0.0.2"));
}

#[tokio::test]
async fn test_converged_cluster_needs_no_healing() {
    // Steady state: every check passes, no wire writes happen.
    let meta = steady_meta();
    let mock = MockRedisClient::converged(&meta.obj, "10.0.0.1", &REPLICAS, &SENTINELS);

    let topology = snapshot(&REPLICAS, &SENTINELS, Duration::from_secs(600));
    let (master, actions) = heal_topology(&mock, &meta, &topology)
        .await
        .expect("steady state should verify cleanly");

    assert_eq!(master, "10.0.0.1");
    assert!(actions.is_empty());
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn test_stray_master_with_divergent_slaves_is_reparented() {
    // One replica points at a stale master address; the healer re-asserts
    // the elected master on every replica.
    let meta = steady_meta();
    let mock = MockRedisClient::converged(&meta.obj, "10.0.0.1", &REPLICAS, &SENTINELS);
    {
        let mut state = mock.state();
        state
            .slave_of
            .insert("10.0.0.3".to_string(), "10.9.9.9".to_string());
    }

    let topology = snapshot(&REPLICAS, &SENTINELS, Duration::from_secs(600));
    let (master, actions) = heal_topology(&mock, &meta, &topology)
        .await
        .expect("reparenting should succeed");

    assert_eq!(master, "10.0.0.1");
    assert!(actions.contains(&HealAction::ReparentedReplicas {
        master: "10.0.0.1".to_string()
    }));
    assert_eq!(
        mock.state().slave_of.get("10.0.0.3").map(String::as_str),
        Some("10.0.0.1")
    );
}
