//! Reconciliation loop for RedisCluster.
//!
//! One cycle: validate the declared spec, classify the transition via the
//! meta cache, converge the dependent Kubernetes objects, then probe and
//! heal the redis/sentinel topology. Terminal status and the healthy
//! gauge are written back at the end of every cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Service;
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::client::RedisClient;
use crate::controller::checker::TopologySnapshot;
use crate::controller::cluster_cache::{Meta, State};
use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::{checker, ensure, healer, validation};
use crate::crd::{ConditionType, RedisCluster, RedisClusterStatus};
use crate::resources::common::{OPERATOR_NAME, sentinel_name};
use crate::should_manage;

/// Requeue delay while the topology is still converging.
const NOT_CONVERGED_REQUEUE: Duration = Duration::from_secs(20);

/// Replicas younger than this are left alone before electing a master;
/// a node still loading its dataset must not be promoted.
const MASTER_ELECTION_GRACE: Duration = Duration::from_secs(120);

/// Reconcile a RedisCluster.
pub async fn reconcile(obj: Arc<RedisCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if !should_manage(&obj.metadata, ctx.config.cluster_scoped) {
        debug!(name = %name, namespace = %namespace, "cluster not managed by this controller scope");
        return Ok(Action::await_change());
    }

    // Deletion: dependents are reaped by the owner-reference cascade;
    // only the cache entry and the metric series need cleaning up.
    if obj.metadata.deletion_timestamp.is_some() {
        info!(name = %name, namespace = %namespace, "cluster deleted, evicting cache");
        ctx.meta_cache.evict(&namespace, &name);
        ctx.delete_cluster_metric(&namespace, &name);
        return Ok(Action::await_change());
    }

    debug!(name = %name, namespace = %namespace, "reconciling RedisCluster");
    let api: Api<RedisCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut rc = (*obj).clone();
    if let Err(e) = validation::validate(&mut rc) {
        error!(name = %name, error = %e, "validation failed");
        ctx.publish_warning_event(&obj, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        update_status(&api, &name, |status| {
            status.set_failed_condition(&e.to_string());
        })
        .await?;
        ctx.set_cluster_error(&namespace, &name);
        return Err(e);
    }

    let meta = ctx.meta_cache.cache(&rc);
    publish_transition(&ctx, &api, &meta).await?;

    if let Err(e) = ensure::ensure_resources(&ctx, &meta.obj).await {
        ctx.publish_warning_event(&obj, "EnsureFailed", "Reconciling", Some(e.to_string()))
            .await;
        update_status(&api, &name, |status| {
            status.set_failed_condition(&e.to_string());
        })
        .await?;
        ctx.set_cluster_error(&namespace, &name);
        return Err(e);
    }

    let master_ip = match check_and_heal(&ctx, &meta).await {
        Ok(master_ip) => master_ip,
        Err(e) if e.is_not_converged() => {
            ctx.set_cluster_error(&namespace, &name);
            ctx.publish_normal_event(&obj, "Reconciling", "CheckAndHeal", Some(e.to_string()))
                .await;

            // A previously healthy cluster failing its gates means a
            // workload went away underneath us; make that visible.
            let current = api.get(&name).await?;
            if current
                .status
                .as_ref()
                .and_then(|s| s.current_condition())
                == Some(ConditionType::Healthy)
            {
                update_status(&api, &name, |status| {
                    status.set_create_condition(
                        "redis server or sentinel server be removed by user, restart",
                    );
                })
                .await?;
            }
            return Ok(Action::requeue(NOT_CONVERGED_REQUEUE));
        }
        Err(e) => {
            ctx.publish_warning_event(&obj, "Failed", "CheckAndHeal", Some(e.to_string()))
                .await;
            update_status(&api, &name, |status| {
                status.set_failed_condition(&e.to_string());
            })
            .await?;
            ctx.set_cluster_error(&namespace, &name);
            return Err(e);
        }
    };

    let sentinel_ip = get_sentinel_service_ip(&ctx, &meta.obj).await?;
    update_status(&api, &name, |status| {
        status.master_ip = master_ip.clone();
        status.sentinel_ip = sentinel_ip.clone();
        status.set_ready_condition("Cluster ok");
    })
    .await?;
    ctx.publish_normal_event(&obj, "Healthy", "CheckAndHeal", Some("Cluster ok".to_string()))
        .await;
    ctx.set_cluster_ok(&namespace, &name);
    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_reconcile(&namespace, &name, start_time.elapsed().as_secs_f64());
    }

    // Healthy, but a lagging sentinel quorum warrants a quicker re-check.
    if let Err(e) = checker::check_sentinel_ready_replicas(&ctx, &meta.obj).await {
        info!(name = %name, reason = %e, "sentinel ready replicas lagging");
        return Ok(Action::requeue(NOT_CONVERGED_REQUEUE));
    }

    Ok(Action::requeue(ctx.config.reconcile_time))
}

/// Error policy for the controller.
pub fn error_policy(obj: Arc<RedisCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(state) = &ctx.health_state {
        state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Publish the classified transition as the newest status condition plus
/// an event. Nothing is written during a plain Check pass.
async fn publish_transition(
    ctx: &Context,
    api: &Api<RedisCluster>,
    meta: &Meta,
) -> Result<(), Error> {
    if meta.state == State::Check {
        return Ok(());
    }

    let rc = &meta.obj;
    let message = meta.message.clone();
    match meta.status {
        ConditionType::Creating => {
            ctx.publish_normal_event(rc, "Creating", "Reconciling", Some(message.clone()))
                .await;
            update_status(api, &meta.name, |status| {
                status.set_create_condition(&message);
            })
            .await
        }
        ConditionType::Scaling => {
            ctx.publish_normal_event(rc, "Scaling", "Reconciling", Some(message.clone()))
                .await;
            update_status(api, &meta.name, |status| {
                status.set_scaling_up_condition(&message);
            })
            .await
        }
        ConditionType::ScalingDown => {
            ctx.publish_normal_event(rc, "ScalingDown", "Reconciling", Some(message.clone()))
                .await;
            update_status(api, &meta.name, |status| {
                status.set_scaling_down_condition(&message);
            })
            .await
        }
        ConditionType::Upgrading => {
            ctx.publish_normal_event(rc, "Upgrading", "Reconciling", Some(message.clone()))
                .await;
            update_status(api, &meta.name, |status| {
                status.set_upgrading_condition(&message);
            })
            .await
        }
        _ => {
            ctx.publish_normal_event(rc, "Updating", "Reconciling", Some(message.clone()))
                .await;
            update_status(api, &meta.name, |status| {
                status.set_updating_condition(&message);
            })
            .await
        }
    }
}

/// One heal action performed during a reconcile, reported back so the
/// engine can publish an event per action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealAction {
    /// A lone replica was promoted directly.
    PromotedSingleReplica { ip: String },
    /// The oldest running replica was elected master.
    ElectedOldestAsMaster { ip: String },
    /// Every replica was re-pointed at the elected master.
    ReparentedReplicas { master: String },
    /// The declared redis config was applied to a drifted replica.
    AppliedRedisConfig { ip: String },
    /// A sentinel was re-pointed at the elected master.
    FixedSentinelMonitor { sentinel: String },
    /// A sentinel's in-memory registry was reset.
    ResetSentinel { sentinel: String },
    /// The spec's custom config lines were pushed to a sentinel.
    AppliedSentinelConfig { sentinel: String },
}

impl std::fmt::Display for HealAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealAction::PromotedSingleReplica { ip } => {
                write!(f, "promoted single replica {} to master", ip)
            }
            HealAction::ElectedOldestAsMaster { ip } => {
                write!(f, "elected oldest replica {} as master", ip)
            }
            HealAction::ReparentedReplicas { master } => {
                write!(f, "reparented replicas to master {}", master)
            }
            HealAction::AppliedRedisConfig { ip } => {
                write!(f, "set custom config for redis server {}", ip)
            }
            HealAction::FixedSentinelMonitor { sentinel } => {
                write!(f, "pointed sentinel {} at the master", sentinel)
            }
            HealAction::ResetSentinel { sentinel } => {
                write!(f, "reset sentinel {}", sentinel)
            }
            HealAction::AppliedSentinelConfig { sentinel } => {
                write!(f, "set custom config for sentinel {}", sentinel)
            }
        }
    }
}

/// Check the topology and heal every violation, in dependency order.
///
/// Returns the elected master's IP. Count gates surface `NotConverged` so
/// the engine requeues while pods start.
async fn check_and_heal(ctx: &Context, meta: &Meta) -> Result<String, Error> {
    let rc = &meta.obj;

    checker::check_redis_number(ctx, rc).await?;
    checker::check_sentinel_number(ctx, rc).await?;

    let topology = checker::topology_snapshot(ctx, rc).await?;
    let (master, actions) = heal_topology(ctx.redis.as_ref(), meta, &topology).await?;

    for action in &actions {
        ctx.publish_normal_event(rc, "Healing", "CheckAndHeal", Some(action.to_string()))
            .await;
    }

    Ok(master)
}

/// Probe the snapshot through the wire client and heal every violation.
///
/// Pure with respect to Kubernetes: all cluster state arrives via the
/// snapshot, all redis state via the [`RedisClient`]. A multi-master
/// split is fatal because an arbitrary pick could lose writes.
pub async fn heal_topology(
    redis: &dyn RedisClient,
    meta: &Meta,
    topology: &TopologySnapshot,
) -> Result<(String, Vec<HealAction>), Error> {
    let rc = &meta.obj;
    let auth = meta.auth();
    let mut actions = Vec::new();

    let masters = checker::get_number_masters(redis, topology, auth).await?;
    match masters {
        0 => {
            info!(name = %meta.name, "no master found, fixing");
            if let [only] = topology.replicas.as_slice() {
                healer::make_master(redis, &only.ip, auth).await?;
                actions.push(HealAction::PromotedSingleReplica {
                    ip: only.ip.clone(),
                });
            } else {
                let min_time = topology.minimum_replica_age();
                if min_time < MASTER_ELECTION_GRACE {
                    return Err(Error::NotConverged(
                        "waiting for redis pods to settle before electing a master".to_string(),
                    ));
                }
                info!(
                    name = %meta.name,
                    min_age_secs = min_time.as_secs(),
                    "electing oldest replica as master"
                );
                let elected = healer::set_oldest_as_master(redis, topology, auth).await?;
                actions.push(HealAction::ElectedOldestAsMaster { ip: elected });
            }
        }
        1 => {}
        _ => {
            return Err(Error::FatalInvariant(
                "more than one master, fix manually".to_string(),
            ));
        }
    }

    let master = checker::get_master_ip(redis, topology, auth).await?;
    if let Err(e) = checker::check_all_slaves_from_master(redis, topology, &master, auth).await {
        info!(name = %meta.name, reason = %e, "reparenting replicas");
        healer::set_master_on_all(redis, topology, &master, auth).await?;
        actions.push(HealAction::ReparentedReplicas {
            master: master.clone(),
        });
    }

    for replica in &topology.replicas {
        if let Err(e) = checker::check_redis_config(redis, rc, &replica.ip, auth).await {
            info!(name = %meta.name, ip = %replica.ip, reason = %e, "applying redis config");
            healer::set_redis_custom_config(redis, rc, &replica.ip, auth).await?;
            actions.push(HealAction::AppliedRedisConfig {
                ip: replica.ip.clone(),
            });
        }
    }

    for sentinel in &topology.sentinels {
        if let Err(e) = checker::check_sentinel_monitor(redis, sentinel, &master).await {
            info!(name = %meta.name, sentinel = %sentinel, reason = %e, "fixing sentinel monitor");
            healer::new_sentinel_monitor(redis, rc, sentinel, &master, auth).await?;
            actions.push(HealAction::FixedSentinelMonitor {
                sentinel: sentinel.clone(),
            });
        }
    }
    for sentinel in &topology.sentinels {
        if let Err(e) =
            checker::check_sentinel_slaves_number_in_memory(redis, rc, sentinel).await
        {
            info!(name = %meta.name, sentinel = %sentinel, reason = %e, "restoring sentinel");
            healer::restore_sentinel(redis, sentinel).await?;
            healer::wait_restore_sentinel_slaves_ok(redis, rc, sentinel).await?;
            actions.push(HealAction::ResetSentinel {
                sentinel: sentinel.clone(),
            });
        }
    }
    for sentinel in &topology.sentinels {
        if let Err(e) = checker::check_sentinel_number_in_memory(redis, rc, sentinel).await {
            info!(name = %meta.name, sentinel = %sentinel, reason = %e, "restoring sentinel");
            healer::restore_sentinel(redis, sentinel).await?;
            actions.push(HealAction::ResetSentinel {
                sentinel: sentinel.clone(),
            });
        }
    }

    // Custom sentinel config is only pushed on Create/Update passes so a
    // steady-state Check does not rewrite it every minute.
    if meta.state != State::Check {
        for sentinel in &topology.sentinels {
            if !rc.spec.sentinel.custom_config.is_empty() {
                healer::set_sentinel_custom_config(redis, rc, sentinel).await?;
                actions.push(HealAction::AppliedSentinelConfig {
                    sentinel: sentinel.clone(),
                });
            }
        }
    }

    Ok((master, actions))
}

/// Read-modify-write the status subresource.
async fn update_status<F>(api: &Api<RedisCluster>, name: &str, mutate: F) -> Result<(), Error>
where
    F: FnOnce(&mut RedisClusterStatus),
{
    let current = api.get(name).await?;
    let mut status = current.status.unwrap_or_default();
    mutate(&mut status);

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(OPERATOR_NAME),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Cluster IP of the routable sentinel service, recorded in status for
/// client discovery.
async fn get_sentinel_service_ip(ctx: &Context, rc: &RedisCluster) -> Result<String, Error> {
    let namespace = rc.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &namespace);
    let service = api.get(&sentinel_name(rc)).await?;
    Ok(service
        .spec
        .and_then(|s| s.cluster_ip)
        .unwrap_or_default())
}
