//! Shared context for the controller.
//!
//! Holds the Kubernetes client, the event recorder identity, the
//! per-cluster meta cache, the wire client, and the knobs set on the
//! command line.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::client::{RedisAdmin, RedisClient};
use crate::controller::cluster_cache::MetaMap;
use crate::crd::RedisCluster;
use crate::health::HealthState;
use crate::resources::common::OPERATOR_NAME;

/// Controller tuning taken from the CLI.
#[derive(Clone, Copy, Debug)]
pub struct ControllerConfig {
    /// Maximum reconciles in flight across clusters.
    pub max_concurrent_reconciles: usize,
    /// Requeue delay for healthy clusters.
    pub reconcile_time: Duration,
    /// Whether the controller watches the whole cluster or one namespace.
    pub cluster_scoped: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
            reconcile_time: Duration::from_secs(60),
            cluster_scoped: true,
        }
    }
}

/// Shared context for the controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Wire client for redis and sentinel nodes
    pub redis: Arc<dyn RedisClient>,
    /// Last-observed spec and transition per cluster
    pub meta_cache: MetaMap,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// CLI tuning
    pub config: ControllerConfig,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: OPERATOR_NAME.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            redis: Arc::new(RedisAdmin::new()),
            meta_cache: MetaMap::new(),
            health_state,
            config,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a RedisCluster resource
    pub async fn publish_normal_event(
        &self,
        resource: &RedisCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish_event(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a RedisCluster resource
    pub async fn publish_warning_event(
        &self,
        resource: &RedisCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish_event(resource, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish_event(
        &self,
        resource: &RedisCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Record the healthy gauge for a cluster.
    pub fn set_cluster_ok(&self, namespace: &str, name: &str) {
        if let Some(state) = &self.health_state {
            state.metrics.set_cluster_ok(namespace, name);
        }
    }

    /// Record the error gauge for a cluster.
    pub fn set_cluster_error(&self, namespace: &str, name: &str) {
        if let Some(state) = &self.health_state {
            state.metrics.set_cluster_error(namespace, name);
        }
    }

    /// Drop the gauge series for a deleted cluster.
    pub fn delete_cluster_metric(&self, namespace: &str, name: &str) {
        if let Some(state) = &self.health_state {
            state.metrics.delete_cluster(namespace, name);
        }
    }
}
