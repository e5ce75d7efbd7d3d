//! Validation and defaulting for RedisCluster specs.
//!
//! Normalises a declared spec in place: fills defaults, forces the
//! replication-safety settings, and rejects malformed input. Running it
//! twice over the same object yields an equal struct.

use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{DEFAULT_REDIS_IMAGE, RedisCluster, ResourceList, ResourceRequirementsSpec};

/// Maximum resource name length; dependent object names add suffixes.
pub const MAX_NAME_LENGTH: usize = 48;

/// Minimum number of redis replicas.
pub const MIN_REDIS_REPLICAS: i32 = 3;

/// Minimum number of sentinels for a meaningful quorum.
pub const MIN_SENTINEL_REPLICAS: i32 = 3;

/// Slaves with priority 0 are never promoted; every replica must be a
/// promotion candidate, so the priority is pinned.
const DEFAULT_SLAVE_PRIORITY: &str = "1";

/// Validate the cluster spec, filling defaults.
pub fn validate(rc: &mut RedisCluster) -> Result<()> {
    let name = rc.name_any();
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "name length can't be higher than {}",
            MAX_NAME_LENGTH
        )));
    }

    if rc.spec.size == 0 {
        rc.spec.size = MIN_REDIS_REPLICAS;
    } else if rc.spec.size < MIN_REDIS_REPLICAS {
        return Err(Error::Validation(
            "number of redis in spec is less than the minimum".to_string(),
        ));
    }

    if rc.spec.sentinel.replicas == 0 {
        rc.spec.sentinel.replicas = MIN_SENTINEL_REPLICAS;
    } else if rc.spec.sentinel.replicas < MIN_SENTINEL_REPLICAS {
        return Err(Error::Validation(
            "number of sentinels in spec is less than the minimum".to_string(),
        ));
    }

    if rc.spec.image.is_empty() {
        rc.spec.image = DEFAULT_REDIS_IMAGE.to_string();
    }

    if rc.spec.sentinel.image.is_empty() {
        rc.spec.sentinel.image = DEFAULT_REDIS_IMAGE.to_string();
    }

    if rc.spec.sentinel.resources.is_empty() {
        rc.spec.sentinel.resources = default_sentinel_resources();
    }

    rc.spec.config.insert(
        "slave-priority".to_string(),
        DEFAULT_SLAVE_PRIORITY.to_string(),
    );

    if !rc.spec.disable_persistence {
        enable_persistence(rc);
    } else {
        disable_persistence(rc);
    }

    Ok(())
}

/// AOF-based persistence defaults; user-provided values win.
fn enable_persistence(rc: &mut RedisCluster) {
    set_if_absent(rc, "appendonly", "yes");
    set_if_absent(rc, "auto-aof-rewrite-min-size", "536870912");
    set_if_absent(rc, "auto-aof-rewrite-percentage", "100");
    set_if_absent(rc, "repl-backlog-size", "62914560");
    set_if_absent(rc, "repl-diskless-sync", "yes");
    set_if_absent(rc, "aof-load-truncated", "yes");
    set_if_absent(rc, "stop-writes-on-bgsave-error", "no");
    set_if_absent(rc, "save", "900 1 300 10");
}

/// Persistence off is forced regardless of user-provided values.
fn disable_persistence(rc: &mut RedisCluster) {
    rc.spec
        .config
        .insert("appendonly".to_string(), "no".to_string());
    rc.spec.config.insert("save".to_string(), String::new());
}

fn set_if_absent(rc: &mut RedisCluster, key: &str, value: &str) {
    rc.spec
        .config
        .entry(key.to_string())
        .or_insert_with(|| value.to_string());
}

fn default_sentinel_resources() -> ResourceRequirementsSpec {
    ResourceRequirementsSpec {
        requests: ResourceList {
            cpu: "20m".to_string(),
            memory: "16Mi".to_string(),
        },
        limits: ResourceList {
            cpu: "100m".to_string(),
            memory: "60Mi".to_string(),
        },
    }
}
