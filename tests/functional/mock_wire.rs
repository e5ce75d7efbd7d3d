//! In-memory wire client for simulating a redis/sentinel deployment.
//!
//! Instead of duplicating production logic, this mock only models the
//! external state (who is master, who slaves from whom, what each
//! sentinel believes) and mutates it the way a real deployment would
//! respond to the issued commands. All decisions stay in the production
//! `heal_topology` implementation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use redis_operator::client::{RedisClient, WireError};
use redis_operator::controller::checker::{ReplicaInfo, TopologySnapshot, expected_config_value};
use redis_operator::crd::RedisCluster;

/// Logical state of the simulated deployment.
#[derive(Debug, Default)]
pub struct MockTopologyState {
    /// Replica IPs currently reporting `role:master`.
    pub masters: HashSet<String>,
    /// Replica IP -> the `master_host` it reports (empty when none).
    pub slave_of: HashMap<String, String>,
    /// Sentinel IP -> the master it monitors.
    pub sentinel_monitor: HashMap<String, String>,
    /// Sentinel IP -> its in-memory known-sentinel count.
    pub sentinel_counts: HashMap<String, i32>,
    /// Sentinel IP -> its in-memory known-slave count.
    pub sentinel_slave_counts: HashMap<String, i32>,
    /// Replica IP -> its live config.
    pub configs: HashMap<String, HashMap<String, String>>,
}

/// Wire client backed by [`MockTopologyState`]; records every write
/// command it receives.
pub struct MockRedisClient {
    state: Mutex<MockTopologyState>,
    writes: Mutex<Vec<String>>,
}

impl MockRedisClient {
    pub fn new(state: MockTopologyState) -> Self {
        Self {
            state: Mutex::new(state),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// A fully converged deployment: `master` is the only master, every
    /// other replica slaves from it, every sentinel monitors it with the
    /// expected counts, and every replica carries the declared config.
    pub fn converged(
        rc: &RedisCluster,
        master: &str,
        replicas: &[&str],
        sentinels: &[&str],
    ) -> Self {
        let mut state = MockTopologyState::default();
        state.masters.insert(master.to_string());
        for ip in replicas {
            if *ip != master {
                state.slave_of.insert(ip.to_string(), master.to_string());
            }
            state
                .configs
                .insert(ip.to_string(), declared_config(rc));
        }
        for sentinel in sentinels {
            state
                .sentinel_monitor
                .insert(sentinel.to_string(), master.to_string());
            state
                .sentinel_counts
                .insert(sentinel.to_string(), rc.spec.sentinel.replicas);
            state
                .sentinel_slave_counts
                .insert(sentinel.to_string(), rc.spec.size - 1);
        }
        Self::new(state)
    }

    /// Demote every replica, as if the master was externally stripped of
    /// its role: all replicas report `role:slave`, the ex-slaves still
    /// name their old master.
    pub fn demote_all_masters(&self) {
        let mut state = self.state.lock().unwrap();
        state.masters.clear();
    }

    /// Force one more replica into the master role, as if someone ran
    /// `SLAVEOF NO ONE` on it by hand.
    pub fn force_master(&self, ip: &str) {
        let mut state = self.state.lock().unwrap();
        state.masters.insert(ip.to_string());
        state.slave_of.remove(ip);
    }

    /// Every write command issued through this client, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockTopologyState> {
        self.state.lock().unwrap()
    }

    fn record(&self, command: String) {
        self.writes.lock().unwrap().push(command);
    }
}

/// The declared config as `CONFIG GET` would report it back.
fn declared_config(rc: &RedisCluster) -> HashMap<String, String> {
    rc.spec
        .config
        .iter()
        .map(|(k, v)| {
            let reported = expected_config_value(k, v).unwrap_or_else(|_| v.clone());
            (k.clone(), reported)
        })
        .collect()
}

/// Build a snapshot over the given replica IPs, oldest first, all with
/// the same age.
pub fn snapshot(replicas: &[&str], sentinels: &[&str], age: Duration) -> TopologySnapshot {
    TopologySnapshot {
        replicas: replicas
            .iter()
            .enumerate()
            .map(|(ordinal, ip)| ReplicaInfo {
                name: format!("redis-cluster-c1-{}", ordinal),
                ip: ip.to_string(),
                age,
            })
            .collect(),
        sentinels: sentinels.iter().map(|s| s.to_string()).collect(),
    }
}

#[async_trait]
impl RedisClient for MockRedisClient {
    async fn sentinel_count(&self, ip: &str) -> Result<i32, WireError> {
        Ok(*self.state.lock().unwrap().sentinel_counts.get(ip).unwrap_or(&0))
    }

    async fn sentinel_slave_count(&self, ip: &str) -> Result<i32, WireError> {
        Ok(*self
            .state
            .lock()
            .unwrap()
            .sentinel_slave_counts
            .get(ip)
            .unwrap_or(&0))
    }

    async fn reset_sentinel(&self, ip: &str) -> Result<(), WireError> {
        self.record(format!("SENTINEL reset * @{}", ip));
        Ok(())
    }

    async fn slave_master_ip(
        &self,
        ip: &str,
        _password: Option<&str>,
    ) -> Result<String, WireError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .slave_of
            .get(ip)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_master(&self, ip: &str, _password: Option<&str>) -> Result<bool, WireError> {
        Ok(self.state.lock().unwrap().masters.contains(ip))
    }

    async fn monitor_redis(
        &self,
        ip: &str,
        master_ip: &str,
        quorum: i32,
        _password: Option<&str>,
    ) -> Result<(), WireError> {
        self.record(format!(
            "SENTINEL MONITOR mymaster {} 6379 {} @{}",
            master_ip, quorum, ip
        ));
        self.state
            .lock()
            .unwrap()
            .sentinel_monitor
            .insert(ip.to_string(), master_ip.to_string());
        Ok(())
    }

    async fn make_master(&self, ip: &str, _password: Option<&str>) -> Result<(), WireError> {
        self.record(format!("SLAVEOF NO ONE @{}", ip));
        let mut state = self.state.lock().unwrap();
        state.masters.insert(ip.to_string());
        state.slave_of.remove(ip);
        Ok(())
    }

    async fn make_slave_of(
        &self,
        ip: &str,
        master_ip: &str,
        _password: Option<&str>,
    ) -> Result<(), WireError> {
        self.record(format!("SLAVEOF {} 6379 @{}", master_ip, ip));
        let mut state = self.state.lock().unwrap();
        state.masters.remove(ip);
        state.slave_of.insert(ip.to_string(), master_ip.to_string());
        Ok(())
    }

    async fn get_sentinel_monitor(&self, ip: &str) -> Result<String, WireError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sentinel_monitor
            .get(ip)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_sentinel_config(&self, ip: &str, lines: &[String]) -> Result<(), WireError> {
        for line in lines {
            self.record(format!("SENTINEL set mymaster {} @{}", line, ip));
        }
        Ok(())
    }

    async fn set_redis_config(
        &self,
        ip: &str,
        configs: &BTreeMap<String, String>,
        _password: Option<&str>,
    ) -> Result<(), WireError> {
        self.record(format!("CONFIG SET {} keys @{}", configs.len(), ip));
        let mut state = self.state.lock().unwrap();
        let live = state.configs.entry(ip.to_string()).or_default();
        for (k, v) in configs {
            // A real server reports memory-sized values back in plain
            // bytes, whatever unit was set.
            let reported = expected_config_value(k, v).unwrap_or_else(|_| v.clone());
            live.insert(k.clone(), reported);
        }
        Ok(())
    }

    async fn get_all_redis_config(
        &self,
        ip: &str,
        _password: Option<&str>,
    ) -> Result<HashMap<String, String>, WireError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .configs
            .get(ip)
            .cloned()
            .unwrap_or_default())
    }
}
