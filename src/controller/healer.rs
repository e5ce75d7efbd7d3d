//! Topology healer.
//!
//! Wire-level actions that restore the invariants the checker found
//! violated. Every action is idempotent against a steady-state cluster.
//! All actions operate on a [`TopologySnapshot`] and a [`RedisClient`],
//! never on the Kubernetes API directly.

use std::time::Duration;

use tracing::{debug, info};

use crate::client::RedisClient;
use crate::controller::checker::{self, TopologySnapshot};
use crate::controller::error::{Error, Result};
use crate::crd::RedisCluster;

/// Poll interval while waiting for a reset sentinel to rediscover slaves.
const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Bounded wait for sentinel rediscovery. Part of the contract: the wait
/// must never become unbounded.
const TIMEOUT: Duration = Duration::from_secs(30);

/// Sentinels that must agree before a failover.
pub fn quorum(rc: &RedisCluster) -> i32 {
    rc.spec.sentinel.replicas / 2 + 1
}

/// Promote one replica directly.
pub async fn make_master(redis: &dyn RedisClient, ip: &str, auth: Option<&str>) -> Result<()> {
    Ok(redis.make_master(ip, auth).await?)
}

/// Elect the oldest running replica as master and slave the rest to it.
///
/// Returns the elected IP. The snapshot orders replicas oldest first.
pub async fn set_oldest_as_master(
    redis: &dyn RedisClient,
    topology: &TopologySnapshot,
    auth: Option<&str>,
) -> Result<String> {
    let mut master_ip: Option<String> = None;
    for replica in &topology.replicas {
        match &master_ip {
            None => {
                info!(pod = %replica.name, ip = %replica.ip, "electing new master");
                redis.make_master(&replica.ip, auth).await?;
                master_ip = Some(replica.ip.clone());
            }
            Some(master) => {
                debug!(pod = %replica.name, master = %master, "slaving to new master");
                redis.make_slave_of(&replica.ip, master, auth).await?;
            }
        }
    }
    master_ip.ok_or_else(|| Error::NotConverged("number of redis pods are 0".to_string()))
}

/// Re-assert the elected master on every replica: promote it (idempotent)
/// and slave everything else to it.
pub async fn set_master_on_all(
    redis: &dyn RedisClient,
    topology: &TopologySnapshot,
    master_ip: &str,
    auth: Option<&str>,
) -> Result<()> {
    for replica in &topology.replicas {
        if replica.ip == master_ip {
            debug!(pod = %replica.name, "ensuring pod is master");
            redis.make_master(master_ip, auth).await?;
        } else {
            debug!(pod = %replica.name, master = %master_ip, "slaving to master");
            redis.make_slave_of(&replica.ip, master_ip, auth).await?;
        }
    }
    Ok(())
}

/// Re-point a sentinel at the elected master with the derived quorum.
pub async fn new_sentinel_monitor(
    redis: &dyn RedisClient,
    rc: &RedisCluster,
    sentinel: &str,
    master: &str,
    auth: Option<&str>,
) -> Result<()> {
    info!(sentinel = %sentinel, master = %master, "sentinel is not monitoring the correct master, changing");
    Ok(redis.monitor_redis(sentinel, master, quorum(rc), auth).await?)
}

/// Clear a sentinel's in-memory node registry.
pub async fn restore_sentinel(redis: &dyn RedisClient, sentinel: &str) -> Result<()> {
    info!(sentinel = %sentinel, "restoring sentinel");
    Ok(redis.reset_sentinel(sentinel).await?)
}

/// After a reset, wait for the sentinel's known-slave count to converge
/// back to `size - 1`, polling every 5 s for at most 30 s.
pub async fn wait_restore_sentinel_slaves_ok(
    redis: &dyn RedisClient,
    rc: &RedisCluster,
    sentinel: &str,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        match checker::check_sentinel_slaves_number_in_memory(redis, rc, sentinel).await {
            Ok(()) => return Ok(()),
            Err(e) if tokio::time::Instant::now() >= deadline => {
                debug!(sentinel = %sentinel, error = %e, "sentinel slaves still not converged");
                return Err(Error::Timeout(
                    "wait for restore sentinel slave timeout".to_string(),
                ));
            }
            Err(e) => {
                debug!(sentinel = %sentinel, error = %e, "waiting for sentinel slaves to converge");
                tokio::time::sleep(CHECK_INTERVAL).await;
            }
        }
    }
}

/// Apply the spec's sentinel custom-config lines to one sentinel.
pub async fn set_sentinel_custom_config(
    redis: &dyn RedisClient,
    rc: &RedisCluster,
    sentinel: &str,
) -> Result<()> {
    if rc.spec.sentinel.custom_config.is_empty() {
        return Ok(());
    }
    debug!(sentinel = %sentinel, config = ?rc.spec.sentinel.custom_config, "setting sentinel custom config");
    Ok(redis
        .set_sentinel_config(sentinel, &rc.spec.sentinel.custom_config)
        .await?)
}

/// Apply the declared redis config to one replica.
pub async fn set_redis_custom_config(
    redis: &dyn RedisClient,
    rc: &RedisCluster,
    ip: &str,
    auth: Option<&str>,
) -> Result<()> {
    if rc.spec.config.is_empty() {
        return Ok(());
    }
    debug!(ip = %ip, "setting redis custom config");
    Ok(redis.set_redis_config(ip, &rc.spec.config, auth).await?)
}
