//! Topology checker.
//!
//! Probes the live replicas and sentinels and compares what they report
//! against the declared spec: workload counts, the single-master
//! invariant, replication parents, the sentinel quorum's in-memory view,
//! and the applied redis configuration.
//!
//! Kubernetes reads happen once per reconcile into a [`TopologySnapshot`];
//! the wire-level checks only see the snapshot and a [`RedisClient`], so
//! the healing logic can run against a simulated cluster in tests.

use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, ResourceExt};
use tracing::debug;

use crate::client::{RedisClient, WireError};
use crate::client::parsing::{is_mem_unit_key, parse_redis_mem_conf};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::RedisCluster;
use crate::resources::common::{
    REDIS_ROLE_NAME, SENTINEL_ROLE_NAME, redis_name, selector_string, sentinel_name,
};

/// One running redis replica as seen at snapshot time.
#[derive(Clone, Debug)]
pub struct ReplicaInfo {
    pub name: String,
    pub ip: String,
    /// Time since the pod started.
    pub age: Duration,
}

/// Point-in-time view of the running pods, gathered once per reconcile.
///
/// Replicas are ordered oldest first, so the election candidate is always
/// the head of the list.
#[derive(Clone, Debug, Default)]
pub struct TopologySnapshot {
    pub replicas: Vec<ReplicaInfo>,
    pub sentinels: Vec<String>,
}

impl TopologySnapshot {
    /// IPs of the running replicas, oldest first.
    pub fn replica_ips(&self) -> Vec<&str> {
        self.replicas.iter().map(|r| r.ip.as_str()).collect()
    }

    /// Minimum age across the running replicas; the grace gate before a
    /// master election.
    pub fn minimum_replica_age(&self) -> Duration {
        self.replicas
            .iter()
            .map(|r| r.age)
            .min()
            .unwrap_or(Duration::from_secs(360_000_000)) // more than ten years
    }
}

/// A live probe failing to connect means the topology is still coming up,
/// not that the cluster is broken.
fn not_reachable(err: WireError) -> Error {
    Error::NotConverged(format!("redis not reachable yet: {}", err))
}

/// Declared size equals the redis StatefulSet's desired and ready replicas.
pub async fn check_redis_number(ctx: &Context, rc: &RedisCluster) -> Result<()> {
    let sts = get_statefulset(ctx, rc, &redis_name(rc)).await?;
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    if rc.spec.size != desired {
        return Err(Error::NotConverged(
            "number of redis pods differ from specification".to_string(),
        ));
    }
    let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    if rc.spec.size != ready {
        return Err(Error::NotConverged(
            "waiting all of redis pods become ready".to_string(),
        ));
    }
    Ok(())
}

/// Declared sentinel count equals the sentinel StatefulSet's desired
/// replicas.
pub async fn check_sentinel_number(ctx: &Context, rc: &RedisCluster) -> Result<()> {
    let sts = get_statefulset(ctx, rc, &sentinel_name(rc)).await?;
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    if rc.spec.sentinel.replicas != desired {
        return Err(Error::NotConverged(
            "number of sentinel pods differ from specification".to_string(),
        ));
    }
    Ok(())
}

/// Declared sentinel count equals the sentinel StatefulSet's ready
/// replicas. Governs whether the reconcile result carries a short requeue.
pub async fn check_sentinel_ready_replicas(ctx: &Context, rc: &RedisCluster) -> Result<()> {
    let sts = get_statefulset(ctx, rc, &sentinel_name(rc)).await?;
    let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    if rc.spec.sentinel.replicas != ready {
        return Err(Error::NotConverged(
            "waiting all of sentinel pods become ready".to_string(),
        ));
    }
    Ok(())
}

async fn get_statefulset(ctx: &Context, rc: &RedisCluster, name: &str) -> Result<StatefulSet> {
    let namespace = rc.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &namespace);
    match api.get(name).await {
        Ok(sts) => Ok(sts),
        // A workload deleted underneath us is a convergence problem, not
        // a hard failure; the next ensure pass recreates it.
        Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::NotConverged(format!(
            "statefulset {} not found, waiting for recreation",
            name
        ))),
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Gather the running redis and sentinel pods into a snapshot.
pub async fn topology_snapshot(ctx: &Context, rc: &RedisCluster) -> Result<TopologySnapshot> {
    let now = chrono::Utc::now();
    let replicas = running_pods(ctx, rc, REDIS_ROLE_NAME)
        .await?
        .into_iter()
        .filter_map(|pod| {
            let ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone())?;
            let age = pod
                .status
                .as_ref()
                .and_then(|s| s.start_time.as_ref())
                .map(|start| now.signed_duration_since(start.0).to_std().unwrap_or_default())
                .unwrap_or_default();
            debug!(pod = %pod.name_any(), alive_secs = age.as_secs(), "pod age");
            Some(ReplicaInfo {
                name: pod.name_any(),
                ip,
                age,
            })
        })
        .collect();

    let sentinels = running_pods(ctx, rc, SENTINEL_ROLE_NAME)
        .await?
        .iter()
        .filter_map(|pod| pod.status.as_ref().and_then(|s| s.pod_ip.clone()))
        .collect();

    Ok(TopologySnapshot {
        replicas,
        sentinels,
    })
}

/// Running pods of one component, oldest first.
async fn running_pods(ctx: &Context, rc: &RedisCluster, role: &str) -> Result<Vec<Pod>> {
    let namespace = rc.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let params = ListParams::default().labels(&selector_string(role, &rc.name_any()));

    let mut pods: Vec<Pod> = api
        .list(&params)
        .await?
        .items
        .into_iter()
        .filter(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        })
        .collect();
    pods.sort_by(|a, b| {
        a.metadata
            .creation_timestamp
            .cmp(&b.metadata.creation_timestamp)
    });
    Ok(pods)
}

/// Count of running replicas that report the master role.
pub async fn get_number_masters(
    redis: &dyn RedisClient,
    topology: &TopologySnapshot,
    auth: Option<&str>,
) -> Result<i32> {
    let mut masters = 0;
    for replica in &topology.replicas {
        if redis
            .is_master(&replica.ip, auth)
            .await
            .map_err(not_reachable)?
        {
            masters += 1;
        }
    }
    Ok(masters)
}

/// The single master's IP; errors when the count is not exactly one.
pub async fn get_master_ip(
    redis: &dyn RedisClient,
    topology: &TopologySnapshot,
    auth: Option<&str>,
) -> Result<String> {
    let mut masters = Vec::new();
    for replica in &topology.replicas {
        if redis
            .is_master(&replica.ip, auth)
            .await
            .map_err(not_reachable)?
        {
            masters.push(replica.ip.clone());
        }
    }
    match masters.as_slice() {
        [master] => Ok(master.clone()),
        _ => Err(Error::NotConverged(
            "number of redis nodes known as master is different than 1".to_string(),
        )),
    }
}

/// Every replica that reports a master host must point at the elected one.
pub async fn check_all_slaves_from_master(
    redis: &dyn RedisClient,
    topology: &TopologySnapshot,
    master: &str,
    auth: Option<&str>,
) -> Result<()> {
    for replica in &topology.replicas {
        let slave_master = redis
            .slave_master_ip(&replica.ip, auth)
            .await
            .map_err(not_reachable)?;
        if !slave_master.is_empty() && slave_master != master {
            return Err(Error::NotConverged(format!(
                "slave {} don't have the master {}, has {}",
                replica.ip, master, slave_master
            )));
        }
    }
    Ok(())
}

/// One sentinel's monitored master must be the elected one.
pub async fn check_sentinel_monitor(
    redis: &dyn RedisClient,
    sentinel: &str,
    master: &str,
) -> Result<()> {
    let monitor = redis
        .get_sentinel_monitor(sentinel)
        .await
        .map_err(not_reachable)?;
    if monitor != master {
        return Err(Error::NotConverged(
            "the monitor on the sentinel config does not match with the expected one".to_string(),
        ));
    }
    Ok(())
}

/// One sentinel's in-memory sentinel count must match the declared count.
pub async fn check_sentinel_number_in_memory(
    redis: &dyn RedisClient,
    rc: &RedisCluster,
    sentinel: &str,
) -> Result<()> {
    let known = redis
        .sentinel_count(sentinel)
        .await
        .map_err(not_reachable)?;
    if known != rc.spec.sentinel.replicas {
        return Err(Error::NotConverged("sentinels in memory mismatch".to_string()));
    }
    Ok(())
}

/// One sentinel's in-memory slave count must equal `size - 1`.
pub async fn check_sentinel_slaves_number_in_memory(
    redis: &dyn RedisClient,
    rc: &RedisCluster,
    sentinel: &str,
) -> Result<()> {
    let known = redis
        .sentinel_slave_count(sentinel)
        .await
        .map_err(not_reachable)?;
    if known != rc.spec.size - 1 {
        return Err(Error::NotConverged(
            "sentinel's slaves in memory mismatch".to_string(),
        ));
    }
    Ok(())
}

/// One replica's live config must carry every declared key.
pub async fn check_redis_config(
    redis: &dyn RedisClient,
    rc: &RedisCluster,
    ip: &str,
    auth: Option<&str>,
) -> Result<()> {
    let live = redis
        .get_all_redis_config(ip, auth)
        .await
        .map_err(not_reachable)?;

    for (key, value) in &rc.spec.config {
        let expected = expected_config_value(key, value)?;
        let current = live.get(key).cloned().unwrap_or_default();
        if expected != current {
            return Err(Error::NotConverged(format!(
                "{} configs conflict, expect: {}, current: {}",
                key, expected, current
            )));
        }
    }
    Ok(())
}

/// Declared value as redis will report it: memory-sized keys are
/// normalised to plain byte counts.
pub fn expected_config_value(key: &str, value: &str) -> Result<String> {
    if is_mem_unit_key(key) {
        Ok(parse_redis_mem_conf(value).map_err(WireError::Parse)?)
    } else {
        Ok(value.to_string())
    }
}
