//! StatefulSet generation for redis clusters.
//!
//! Two workloads per cluster:
//! - the redis replicas, with data persistence, shutdown hook and optional
//!   metrics exporter sidecar,
//! - the sentinels, with an init step that copies the read-only seed
//!   config into a writable volume so sentinel may rewrite it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ExecAction, Lifecycle, LifecycleHandler, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Toleration, Volume, VolumeMount,
    VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::ResourceExt;

use crate::crd::{AffinitySpec, RedisCluster};
use crate::resources::common::{
    HOSTNAME_TOPOLOGY_KEY, REDIS_ROLE_NAME, SENTINEL_CONFIG_FILE_NAME, SENTINEL_ROLE_NAME,
    generate_resource_requirements, merge_labels, owner_reference,
    redis_shutdown_config_map_name, redis_name, selector_labels, sentinel_headless_name,
    sentinel_name, sentinel_readiness_name,
};

/// Redis data port.
const REDIS_PORT: i32 = 6379;
/// Sentinel port.
const SENTINEL_PORT: i32 = 26379;

/// Exporter sidecar settings.
pub const EXPORTER_CONTAINER_NAME: &str = "redis-exporter";
const EXPORTER_PORT: i32 = 9121;
const EXPORTER_PORT_NAME: &str = "http-metrics";

/// Probe grace: redis may take a while to load an appendonly file.
const GRACE_TIME: i32 = 30;

const SHUTDOWN_VOLUME_NAME: &str = "redis-shutdown-config";
const STORAGE_VOLUME_NAME: &str = "redis-data";

/// Generate the StatefulSet for the redis replicas.
pub fn generate_redis_statefulset(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> StatefulSet {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(REDIS_ROLE_NAME, &rc.name_any()),
    );
    let owner_refs = vec![owner_reference(rc)];

    let mut containers = vec![generate_redis_container(rc)];
    if rc.spec.exporter.enabled {
        containers.push(generate_exporter_container(rc));
    }

    let mut sts = StatefulSet {
        metadata: ObjectMeta {
            name: Some(redis_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(owner_refs.clone()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(redis_name(rc)),
            replicas: Some(rc.spec.size),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    annotations: optional_map(&rc.spec.annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(generate_affinity(rc.spec.affinity.as_ref(), &labels)),
                    tolerations: convert_tolerations(&rc.spec.tolerations),
                    node_selector: optional_map(&rc.spec.node_selector),
                    containers,
                    volumes: Some(generate_redis_volumes(rc)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    if let Some(claim) = rc.spec.storage.persistent_volume_claim.as_ref() {
        let owner = if rc.spec.storage.keep_after_deletion {
            None
        } else {
            // Owner reference on the claim template so the volumes are
            // removed together with the cluster.
            Some(owner_refs)
        };
        if let Some(spec) = sts.spec.as_mut() {
            spec.volume_claim_templates = Some(vec![generate_pvc_template(claim, owner)]);
        }
    }

    sts
}

/// Generate the StatefulSet for the sentinels.
pub fn generate_sentinel_statefulset(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> StatefulSet {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(SENTINEL_ROLE_NAME, &rc.name_any()),
    );

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(sentinel_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(sentinel_headless_name(rc)),
            replicas: Some(rc.spec.sentinel.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    annotations: optional_map(&rc.spec.sentinel.annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(generate_affinity(
                        rc.spec.sentinel.affinity.as_ref(),
                        &labels,
                    )),
                    tolerations: convert_tolerations(&rc.spec.sentinel.tolerations),
                    node_selector: optional_map(&rc.spec.sentinel.node_selector),
                    init_containers: Some(vec![generate_sentinel_config_copy_container(rc)]),
                    containers: vec![generate_sentinel_container(rc)],
                    volumes: Some(generate_sentinel_volumes(rc)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Name of the data volume: the claim name when a PVC template is used.
pub fn redis_data_volume_name(rc: &RedisCluster) -> String {
    match &rc.spec.storage.persistent_volume_claim {
        Some(claim) => claim.name.clone(),
        None => STORAGE_VOLUME_NAME.to_string(),
    }
}

fn generate_redis_container(rc: &RedisCluster) -> Container {
    let probe = generate_redis_probe(rc);
    Container {
        name: "redis".to_string(),
        image: Some(rc.spec.image.clone()),
        image_pull_policy: Some(pull_policy(&rc.spec.image_pull_policy)),
        ports: Some(vec![ContainerPort {
            name: Some("redis".to_string()),
            container_port: REDIS_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        command: Some(redis_command(rc)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: SHUTDOWN_VOLUME_NAME.to_string(),
                mount_path: "/redis-shutdown".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: redis_data_volume_name(rc),
                mount_path: "/data".to_string(),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(probe.clone()),
        liveness_probe: Some(probe),
        resources: Some(generate_resource_requirements(&rc.spec.resources)),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "/redis-shutdown/shutdown.sh".to_string(),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// redis-cli ping probe, authenticated when a password is set.
fn generate_redis_probe(rc: &RedisCluster) -> Probe {
    let arg = if rc.spec.password.is_empty() {
        "redis-cli -h $(hostname) ping".to_string()
    } else {
        format!("redis-cli -h $(hostname) -a '{}' ping", rc.spec.password)
    };
    Probe {
        initial_delay_seconds: Some(GRACE_TIME),
        timeout_seconds: Some(5),
        exec: Some(ExecAction {
            command: Some(vec!["sh".to_string(), "-c".to_string(), arg]),
        }),
        ..Default::default()
    }
}

/// Default redis command; the replica boots as a slave of a placeholder
/// master so it never accepts writes before the controller wires it in.
fn redis_command(rc: &RedisCluster) -> Vec<String> {
    if !rc.spec.command.is_empty() {
        return rc.spec.command.clone();
    }

    let mut cmds = vec![
        "redis-server".to_string(),
        "--slaveof 127.0.0.1 6379".to_string(),
        "--tcp-keepalive 60".to_string(),
        "--save 900 1".to_string(),
        "--save 300 10".to_string(),
    ];
    if !rc.spec.password.is_empty() {
        cmds.push(format!("--requirepass '{}'", rc.spec.password));
        cmds.push(format!("--masterauth '{}'", rc.spec.password));
    }
    cmds
}

fn generate_exporter_container(rc: &RedisCluster) -> Container {
    let mut env = vec![EnvVar {
        name: "REDIS_ALIAS".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];
    if !rc.spec.password.is_empty() {
        env.push(EnvVar {
            name: "REDIS_PASSWORD".to_string(),
            value: Some(rc.spec.password.clone()),
            ..Default::default()
        });
    }

    Container {
        name: EXPORTER_CONTAINER_NAME.to_string(),
        image: Some(rc.spec.exporter.image.clone()),
        image_pull_policy: Some(pull_policy(&rc.spec.exporter.image_pull_policy)),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            name: Some(EXPORTER_PORT_NAME.to_string()),
            container_port: EXPORTER_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(fixed_resources("25m", "50Mi", "50m", "100Mi")),
        ..Default::default()
    }
}

fn generate_sentinel_config_copy_container(rc: &RedisCluster) -> Container {
    Container {
        name: "sentinel-config-copy".to_string(),
        image: Some(rc.spec.sentinel.image.clone()),
        image_pull_policy: Some(pull_policy(&rc.spec.sentinel.image_pull_policy)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "sentinel-config".to_string(),
                mount_path: "/redis".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "sentinel-config-writable".to_string(),
                mount_path: "/redis-writable".to_string(),
                ..Default::default()
            },
        ]),
        command: Some(vec![
            "cp".to_string(),
            format!("/redis/{}", SENTINEL_CONFIG_FILE_NAME),
            format!("/redis-writable/{}", SENTINEL_CONFIG_FILE_NAME),
        ]),
        resources: Some(fixed_resources("10m", "32Mi", "10m", "32Mi")),
        ..Default::default()
    }
}

fn generate_sentinel_container(rc: &RedisCluster) -> Container {
    Container {
        name: "sentinel".to_string(),
        image: Some(rc.spec.sentinel.image.clone()),
        image_pull_policy: Some(pull_policy(&rc.spec.sentinel.image_pull_policy)),
        ports: Some(vec![ContainerPort {
            name: Some("sentinel".to_string()),
            container_port: SENTINEL_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "readiness-probe".to_string(),
                mount_path: "/redis-probe".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "sentinel-config-writable".to_string(),
                mount_path: "/redis".to_string(),
                ..Default::default()
            },
        ]),
        command: Some(sentinel_command(rc)),
        readiness_probe: Some(Probe {
            initial_delay_seconds: Some(GRACE_TIME),
            period_seconds: Some(15),
            failure_threshold: Some(5),
            timeout_seconds: Some(5),
            exec: Some(ExecAction {
                command: Some(vec![
                    "sh".to_string(),
                    "/redis-probe/readiness.sh".to_string(),
                ]),
            }),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            initial_delay_seconds: Some(GRACE_TIME),
            timeout_seconds: Some(5),
            exec: Some(ExecAction {
                command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "redis-cli -h $(hostname) -p 26379 ping".to_string(),
                ]),
            }),
            ..Default::default()
        }),
        resources: Some(generate_resource_requirements(&rc.spec.sentinel.resources)),
        ..Default::default()
    }
}

fn sentinel_command(rc: &RedisCluster) -> Vec<String> {
    if !rc.spec.sentinel.command.is_empty() {
        return rc.spec.sentinel.command.clone();
    }
    vec![
        "redis-server".to_string(),
        format!("/redis/{}", SENTINEL_CONFIG_FILE_NAME),
        "--sentinel".to_string(),
    ]
}

fn generate_redis_volumes(rc: &RedisCluster) -> Vec<Volume> {
    // Shutdown script must be executable.
    let execute_mode = 0o744;
    let mut volumes = vec![Volume {
        name: SHUTDOWN_VOLUME_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: redis_shutdown_config_map_name(rc),
            default_mode: Some(execute_mode),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if let Some(volume) = generate_redis_data_volume(rc) {
        volumes.push(volume);
    }
    volumes
}

/// Data volume for the replicas; a PVC template replaces it entirely.
fn generate_redis_data_volume(rc: &RedisCluster) -> Option<Volume> {
    if rc.spec.storage.persistent_volume_claim.is_some() {
        return None;
    }

    let empty_dir = match &rc.spec.storage.empty_dir {
        Some(spec) => EmptyDirVolumeSource {
            medium: spec.medium.clone(),
            size_limit: spec.size_limit.clone().map(Quantity),
        },
        None => EmptyDirVolumeSource::default(),
    };
    Some(Volume {
        name: STORAGE_VOLUME_NAME.to_string(),
        empty_dir: Some(empty_dir),
        ..Default::default()
    })
}

fn generate_sentinel_volumes(rc: &RedisCluster) -> Vec<Volume> {
    vec![
        Volume {
            name: "sentinel-config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: sentinel_name(rc),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "readiness-probe".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: sentinel_readiness_name(rc),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "sentinel-config-writable".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ]
}

fn generate_pvc_template(
    claim: &crate::crd::PersistentClaimSpec,
    owner_references: Option<Vec<OwnerReference>>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim.name.clone()),
            owner_references,
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(claim.access_modes.clone()),
            storage_class_name: claim.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(claim.storage.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Anti-affinity over the component's selector labels: soft by hostname
/// unless overridden.
fn generate_affinity(
    override_spec: Option<&AffinitySpec>,
    labels: &BTreeMap<String, String>,
) -> Affinity {
    let (hard, topology_key) = match override_spec {
        Some(spec) => (spec.hard_anti_affinity, spec.topology_key.clone()),
        None => (false, HOSTNAME_TOPOLOGY_KEY.to_string()),
    };

    let term = PodAffinityTerm {
        topology_key,
        label_selector: Some(LabelSelector {
            match_labels: Some(labels.clone()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let anti_affinity = if hard {
        PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![term]),
            ..Default::default()
        }
    } else {
        PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: term,
                },
            ]),
            ..Default::default()
        }
    };

    Affinity {
        pod_anti_affinity: Some(anti_affinity),
        ..Default::default()
    }
}

fn convert_tolerations(tolerations: &[crate::crd::Toleration]) -> Option<Vec<Toleration>> {
    if tolerations.is_empty() {
        return None;
    }
    Some(
        tolerations
            .iter()
            .map(|t| Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
    )
}

fn pull_policy(policy: &str) -> String {
    if policy.is_empty() {
        "Always".to_string()
    } else {
        policy.to_string()
    }
}

fn optional_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

fn fixed_resources(
    request_cpu: &str,
    request_memory: &str,
    limit_cpu: &str,
    limit_memory: &str,
) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(request_cpu.to_string())),
            ("memory".to_string(), Quantity(request_memory.to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(limit_cpu.to_string())),
            ("memory".to_string(), Quantity(limit_memory.to_string())),
        ])),
        ..Default::default()
    }
}
