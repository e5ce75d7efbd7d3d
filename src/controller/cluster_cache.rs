//! Per-cluster metadata cache.
//!
//! Remembers the last observed spec for every cluster so a reconcile can
//! classify what changed (scale, upgrade, config update) and so the
//! password stays pinned to its first observed value. The queue serialises
//! reconciles per cluster, so only the top-level map needs a lock.

use std::collections::HashMap;
use std::sync::RwLock;

use kube::ResourceExt;

use crate::crd::{ConditionType, RedisCluster};
use crate::resources::common::quantities_equal;

/// Which path the current reconcile takes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// First reconcile for this cluster.
    Create,
    /// The spec generation changed; dependents need updating.
    Update,
    /// Same generation as last time; verify and heal only.
    Check,
}

/// Cached metadata for one cluster.
#[derive(Clone, Debug)]
pub struct Meta {
    pub namespace: String,
    pub name: String,
    pub state: State,
    /// Replica count before the latest spec change, kept so scaling
    /// messages can name both sides.
    pub size: i32,
    /// Password pinned at creation; later spec edits never change it.
    pub password: String,
    /// Snapshot of the (normalised) declared object.
    pub obj: RedisCluster,

    pub status: ConditionType,
    pub message: String,
}

impl Meta {
    fn new(rc: &RedisCluster) -> Self {
        Self {
            namespace: rc.namespace().unwrap_or_default(),
            name: rc.name_any(),
            state: State::Create,
            size: rc.spec.size,
            password: rc.spec.password.clone(),
            obj: rc.clone(),
            status: ConditionType::Creating,
            message: "Bootstrap redis cluster".to_string(),
        }
    }

    /// The password as the wire client wants it.
    pub fn auth(&self) -> Option<&str> {
        if self.password.is_empty() {
            None
        } else {
            Some(self.password.as_str())
        }
    }
}

/// Process-wide cache of cluster metadata keyed by `namespace/name`.
#[derive(Default)]
pub struct MetaMap {
    entries: RwLock<HashMap<String, Meta>>,
}

impl MetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest observed object and classify the transition.
    ///
    /// Returns a snapshot of the cached entry for this reconcile to use.
    pub fn cache(&self, rc: &RedisCluster) -> Meta {
        let key = namespaced_name(rc);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let meta = entries
            .entry(key)
            .and_modify(|meta| update(meta, rc))
            .or_insert_with(|| Meta::new(rc));
        meta.clone()
    }

    /// Drop the entry for a deleted cluster.
    pub fn evict(&self, namespace: &str, name: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&format!("{}/{}", namespace, name));
    }

    /// Snapshot of the entry, if cached.
    pub fn get(&self, namespace: &str, name: &str) -> Option<Meta> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&format!("{}/{}", namespace, name)).cloned()
    }
}

fn namespaced_name(rc: &RedisCluster) -> String {
    format!("{}/{}", rc.namespace().unwrap_or_default(), rc.name_any())
}

/// Merge a newly observed object into an existing entry.
fn update(meta: &mut Meta, new: &RedisCluster) {
    if meta.obj.metadata.generation == new.metadata.generation {
        meta.state = State::Check;
        return;
    }

    let old = meta.obj.clone();
    meta.state = State::Update;
    meta.size = old.spec.size;

    // Password change is not allowed; the cached one wins silently.
    let mut new = new.clone();
    new.spec.password = meta.password.clone();
    meta.obj = new;

    let new = &meta.obj;
    if old.spec.image != new.spec.image || old.spec.sentinel.image != new.spec.sentinel.image {
        meta.status = ConditionType::Upgrading;
        meta.message = format!("Upgrading to {}", new.spec.image);
    } else if new.spec.size < old.spec.size {
        meta.status = ConditionType::ScalingDown;
        meta.message = format!("Scaling down from {} to {}", meta.size, new.spec.size);
    } else if new.spec.size > old.spec.size {
        meta.status = ConditionType::Scaling;
        meta.message = format!("Scaling up from {} to {}", meta.size, new.spec.size);
    } else if resources_changed(&old, new) {
        meta.status = ConditionType::Updating;
        meta.message = "Updating compute resources".to_string();
    } else {
        meta.status = ConditionType::Updating;
        meta.message = "Updating redis config".to_string();
    }
}

fn resources_changed(old: &RedisCluster, new: &RedisCluster) -> bool {
    !quantities_equal(&old.spec.resources.limits.cpu, &new.spec.resources.limits.cpu)
        || !quantities_equal(
            &old.spec.resources.limits.memory,
            &new.spec.resources.limits.memory,
        )
        || !quantities_equal(
            &old.spec.resources.requests.cpu,
            &new.spec.resources.requests.cpu,
        )
        || !quantities_equal(
            &old.spec.resources.requests.memory,
            &new.spec.resources.requests.memory,
        )
}
