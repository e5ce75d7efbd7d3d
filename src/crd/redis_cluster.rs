//! RedisCluster Custom Resource Definition.
//!
//! Defines the RedisCluster CRD for deploying highly-available Redis
//! (replication + sentinel) on Kubernetes. The controller elects a single
//! master, keeps every other replica slaved to it, and keeps the sentinel
//! quorum's view of the topology in sync.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default image used for both redis and sentinel containers.
pub const DEFAULT_REDIS_IMAGE: &str = "redis:5.0.4-alpine";

/// RedisCluster is a custom resource for deploying HA Redis with sentinel.
///
/// Example:
/// ```yaml
/// apiVersion: redis.kun/v1beta1
/// kind: RedisCluster
/// metadata:
///   name: my-cluster
/// spec:
///   size: 3
///   sentinel:
///     replicas: 3
///   config:
///     maxmemory: 1gb
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redis.kun",
    version = "v1beta1",
    kind = "RedisCluster",
    plural = "redisclusters",
    shortname = "rdc",
    status = "RedisClusterStatus",
    namespaced,
    // Print columns for kubectl get
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Sentinels", "type":"integer", "jsonPath":".spec.sentinel.replicas"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.conditions[0].type"}"#,
    printcolumn = r#"{"name":"Master", "type":"string", "jsonPath":".status.masterIP"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterSpec {
    /// Number of redis replicas (minimum 3; 0 defaults to 3).
    #[serde(default)]
    pub size: i32,

    /// Redis container image. Empty defaults to `redis:5.0.4-alpine`.
    #[serde(default)]
    pub image: String,

    /// Image pull policy for the redis container. Empty defaults to Always.
    #[serde(default)]
    pub image_pull_policy: String,

    /// Override for the redis container command. Empty uses the generated
    /// `redis-server` command line.
    #[serde(default)]
    pub command: Vec<String>,

    /// Redis parameter -> value applied to every replica via CONFIG SET.
    /// `slave-priority` is always forced to "1".
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Password for redis auth. Immutable once the cluster is created;
    /// later edits are silently ignored.
    #[serde(default)]
    pub password: String,

    /// Disable AOF/RDB persistence. Forces `appendonly no` and `save ""`.
    #[serde(default)]
    pub disable_persistence: bool,

    /// CPU/memory requests and limits for the redis container.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Data volume configuration.
    #[serde(default)]
    pub storage: RedisStorage,

    /// Optional metrics exporter sidecar.
    #[serde(default)]
    pub exporter: ExporterSpec,

    /// Name of a user-supplied ConfigMap holding `shutdown.sh`. Empty
    /// means the controller generates one.
    #[serde(default)]
    pub shutdown_config_map: String,

    /// Extra annotations for the redis pod template.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Node selector for redis pods.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations for redis pods.
    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    /// Anti-affinity override for redis pods. Unset means soft hostname
    /// anti-affinity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<AffinitySpec>,

    /// Sentinel quorum settings.
    #[serde(default)]
    pub sentinel: SentinelSettings,
}

/// Sentinel quorum settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelSettings {
    /// Number of sentinels (minimum 3; 0 defaults to 3).
    #[serde(default)]
    pub replicas: i32,

    /// Sentinel container image. Empty defaults to the redis default image.
    #[serde(default)]
    pub image: String,

    /// Image pull policy for the sentinel container. Empty defaults to Always.
    #[serde(default)]
    pub image_pull_policy: String,

    /// Override for the sentinel container command.
    #[serde(default)]
    pub command: Vec<String>,

    /// Ordered `"PARAM VALUE..."` lines applied to every sentinel via
    /// `SENTINEL SET mymaster PARAM VALUE`.
    #[serde(default)]
    pub custom_config: Vec<String>,

    /// CPU/memory requests and limits for the sentinel container.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Extra annotations for the sentinel pod template.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Node selector for sentinel pods.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Tolerations for sentinel pods.
    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    /// Anti-affinity override for sentinel pods. Unset means soft hostname
    /// anti-affinity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<AffinitySpec>,
}

/// Pod anti-affinity settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AffinitySpec {
    /// Required (hard) instead of preferred (soft) anti-affinity.
    #[serde(default)]
    pub hard_anti_affinity: bool,

    /// Topology key to spread over (default kubernetes.io/hostname).
    #[serde(default = "default_topology_key")]
    pub topology_key: String,
}

impl Default for AffinitySpec {
    fn default() -> Self {
        Self {
            hard_anti_affinity: false,
            topology_key: default_topology_key(),
        }
    }
}

fn default_topology_key() -> String {
    "kubernetes.io/hostname".to_string()
}

/// CPU and memory requests plus limits, as Kubernetes quantity strings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default)]
    pub requests: ResourceList,
    #[serde(default)]
    pub limits: ResourceList,
}

impl ResourceRequirementsSpec {
    /// True when neither requests nor limits carry any value.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

/// A CPU/memory pair; empty strings mean "not set".
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub memory: String,
}

impl ResourceList {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.memory.is_empty()
    }
}

/// Data volume configuration for the redis replicas.
///
/// Exactly one of `persistent_volume_claim` or `empty_dir` is honoured;
/// with neither set an unbounded emptyDir is used.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStorage {
    /// Keep the persistent volumes when the RedisCluster is deleted.
    #[serde(default)]
    pub keep_after_deletion: bool,

    /// Use an emptyDir volume with the given settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirSpec>,

    /// Use a PersistentVolumeClaim template per replica ordinal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentClaimSpec>,
}

/// emptyDir volume settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirSpec {
    /// Storage medium ("" or "Memory").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,

    /// Size limit quantity (e.g. "1Gi").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

/// PersistentVolumeClaim template settings for the data volume.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentClaimSpec {
    /// Volume name, also used as the claim template name.
    #[serde(default = "default_data_volume_name")]
    pub name: String,

    /// Access modes (default ReadWriteOnce).
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,

    /// Storage class. None uses the cluster default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Requested storage quantity (e.g. "10Gi").
    pub storage: String,
}

impl Default for PersistentClaimSpec {
    fn default() -> Self {
        Self {
            name: default_data_volume_name(),
            access_modes: default_access_modes(),
            storage_class_name: None,
            storage: "1Gi".to_string(),
        }
    }
}

fn default_data_volume_name() -> String {
    "redis-data".to_string()
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

/// Metrics exporter sidecar settings.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    /// Co-locate a redis_exporter container on every replica pod.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter image.
    #[serde(default = "default_exporter_image")]
    pub image: String,

    /// Image pull policy for the exporter container.
    #[serde(default)]
    pub image_pull_policy: String,
}

impl Default for ExporterSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            image: default_exporter_image(),
            image_pull_policy: String::new(),
        }
    }
}

fn default_exporter_image() -> String {
    "oliver006/redis_exporter:v1.3.5-alpine".to_string()
}

/// Toleration for pod scheduling.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Equal or Exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// NoSchedule, PreferNoSchedule, or NoExecute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Status of a RedisCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterStatus {
    /// Conditions, newest first (descending by last update time).
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// IP of the currently elected redis master.
    #[serde(default, rename = "masterIP")]
    pub master_ip: String,

    /// Cluster IP of the sentinel service.
    #[serde(default, rename = "sentinelIP")]
    pub sentinel_ip: String,
}

/// ConditionType classifies what the cluster is currently doing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    Creating,
    Scaling,
    ScalingDown,
    Upgrading,
    Updating,
    Healthy,
    Failed,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Creating => write!(f, "Creating"),
            ConditionType::Scaling => write!(f, "Scaling"),
            ConditionType::ScalingDown => write!(f, "ScalingDown"),
            ConditionType::Upgrading => write!(f, "Upgrading"),
            ConditionType::Updating => write!(f, "Updating"),
            ConditionType::Healthy => write!(f, "Healthy"),
            ConditionType::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition describes the state of the cluster at a point in time.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: ConditionType,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// The last time this condition was updated.
    #[serde(default)]
    pub last_update_time: String,
    /// Last time the condition transitioned from one status to another.
    #[serde(default)]
    pub last_transition_time: String,
    /// Machine-readable reason for the transition.
    #[serde(default)]
    pub reason: String,
    /// Human-readable message with transition details.
    #[serde(default)]
    pub message: String,
}

impl Condition {
    fn new(r#type: ConditionType, reason: &str, message: &str) -> Self {
        let now = jiff::Timestamp::now().to_string();
        Self {
            r#type,
            status: "True".to_string(),
            last_update_time: now.clone(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }
}

impl RedisClusterStatus {
    /// The most recent condition type, if any.
    pub fn current_condition(&self) -> Option<ConditionType> {
        self.conditions.first().map(|c| c.r#type)
    }

    pub fn set_create_condition(&mut self, message: &str) {
        self.set_condition(Condition::new(ConditionType::Creating, "Creating", message));
    }

    pub fn set_scaling_up_condition(&mut self, message: &str) {
        self.set_condition(Condition::new(ConditionType::Scaling, "Scaling up", message));
    }

    pub fn set_scaling_down_condition(&mut self, message: &str) {
        self.set_condition(Condition::new(
            ConditionType::ScalingDown,
            "Scaling down",
            message,
        ));
    }

    pub fn set_upgrading_condition(&mut self, message: &str) {
        self.set_condition(Condition::new(
            ConditionType::Upgrading,
            "Cluster upgrading",
            message,
        ));
    }

    pub fn set_updating_condition(&mut self, message: &str) {
        self.set_condition(Condition::new(
            ConditionType::Updating,
            "Cluster updating",
            message,
        ));
    }

    pub fn set_ready_condition(&mut self, message: &str) {
        self.set_condition(Condition::new(
            ConditionType::Healthy,
            "Cluster available",
            message,
        ));
    }

    pub fn set_failed_condition(&mut self, message: &str) {
        self.set_condition(Condition::new(
            ConditionType::Failed,
            "Cluster failed",
            message,
        ));
    }

    /// Insert a condition keeping the newest entry at index 0.
    ///
    /// A condition identical to an existing one of the same type only
    /// refreshes the update timestamp; a changed condition replaces it.
    fn set_condition(&mut self, c: Condition) {
        if let Some(pos) = self.conditions.iter().position(|e| e.r#type == c.r#type) {
            let existing = self.conditions.remove(pos);
            if existing.status == c.status
                && existing.reason == c.reason
                && existing.message == c.message
            {
                let mut refreshed = existing;
                refreshed.last_update_time = c.last_update_time;
                self.conditions.insert(0, refreshed);
                return;
            }
        }
        self.conditions.insert(0, c);
    }
}
