//! ConfigMap generation for redis clusters.
//!
//! Three config bundles per cluster:
//! - the sentinel seed configuration (rewritten by sentinel itself at
//!   runtime, so pods copy it into a writable volume first),
//! - the sentinel readiness-probe script,
//! - the redis shutdown script that hands the master role off before a
//!   pod dies.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::RedisCluster;
use crate::resources::common::{
    REDIS_ROLE_NAME, SENTINEL_CONFIG_FILE_NAME, SENTINEL_ROLE_NAME, merge_labels, owner_reference,
    redis_shutdown_name, selector_labels, sentinel_name, sentinel_readiness_name,
};

/// Generate the sentinel seed ConfigMap.
///
/// The seeded monitor target is a placeholder; the controller re-points
/// every sentinel at the elected master over the wire.
pub fn generate_sentinel_config_map(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> ConfigMap {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(SENTINEL_ROLE_NAME, &rc.name_any()),
    );

    let mut content = String::from(
        "sentinel monitor mymaster 127.0.0.1 6379 2\n\
         sentinel down-after-milliseconds mymaster 1000\n\
         sentinel failover-timeout mymaster 3000\n\
         sentinel parallel-syncs mymaster 2",
    );
    if !rc.spec.password.is_empty() {
        content = format!(
            "{}\nsentinel auth-pass mymaster {}\n",
            content, rc.spec.password
        );
    }

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(sentinel_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            SENTINEL_CONFIG_FILE_NAME.to_string(),
            content,
        )])),
        ..Default::default()
    }
}

/// Generate the sentinel readiness-script ConfigMap.
///
/// The script pings the local sentinel and asserts the monitored master is
/// ok with more than one known slave, so a freshly reset sentinel does not
/// report ready before it has rediscovered the topology.
pub fn generate_sentinel_readiness_config_map(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> ConfigMap {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(REDIS_ROLE_NAME, &rc.name_any()),
    );

    let content = r#"#!/usr/bin/env sh
set -eou pipefail
redis-cli -h $(hostname) -p 26379 ping
slaves=$(redis-cli -h $(hostname) -p 26379 info sentinel|grep master0| grep -Eo 'slaves=[0-9]+' | awk -F= '{print $2}')
status=$(redis-cli -h $(hostname) -p 26379 info sentinel|grep master0| grep -Eo 'status=\w+' | awk -F= '{print $2}')
if [ "$status" != "ok" ]; then
    exit 1
fi
if [ $slaves -le 1 ]; then
	exit 1
fi
"#;

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(sentinel_readiness_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "readiness.sh".to_string(),
            content.to_string(),
        )])),
        ..Default::default()
    }
}

/// Generate the redis shutdown-script ConfigMap.
///
/// The script asks sentinel (via the env-injected service address) who the
/// current master is, saves the dataset, and triggers a failover only when
/// the dying pod holds the master role.
pub fn generate_redis_shutdown_config_map(
    rc: &RedisCluster,
    labels: &BTreeMap<String, String>,
) -> ConfigMap {
    let labels = merge_labels(
        labels.clone(),
        selector_labels(REDIS_ROLE_NAME, &rc.name_any()),
    );

    let upper = rc.name_any().to_uppercase().replace('-', "_");
    let env_sentinel_host = format!("REDIS_SENTINEL_{}_SERVICE_HOST", upper);
    let env_sentinel_port = format!("REDIS_SENTINEL_{}_SERVICE_PORT_SENTINEL", upper);
    let content = format!(
        r#"#!/usr/bin/env sh
set -eou pipefail
master=$(redis-cli -h ${{{host}}} -p ${{{port}}} --csv SENTINEL get-master-addr-by-name mymaster | tr ',' ' ' | tr -d '"' |cut -d' ' -f1)
redis-cli SAVE
if [[ $master ==  $(hostname -i) ]]; then
  redis-cli -h ${{{host}}} -p ${{{port}}} SENTINEL failover mymaster
fi"#,
        host = env_sentinel_host,
        port = env_sentinel_port,
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(redis_shutdown_name(rc)),
            namespace: rc.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(rc)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("shutdown.sh".to_string(), content)])),
        ..Default::default()
    }
}
