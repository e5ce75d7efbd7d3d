// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for redis-operator.
//!
//! Uses proptest to generate random specs and verify the validator,
//! cache, and normalisation invariants.

use proptest::prelude::*;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use redis_operator::client::parsing::parse_redis_mem_conf;
use redis_operator::controller::cluster_cache::MetaMap;
use redis_operator::controller::healer::quorum;
use redis_operator::controller::validation::validate;
use redis_operator::crd::{RedisCluster, RedisClusterSpec, SentinelSettings};

/// Strategy for valid redis replica counts.
fn valid_size() -> impl Strategy<Value = i32> {
    3..=9i32
}

/// Strategy for valid sentinel counts.
fn valid_sentinels() -> impl Strategy<Value = i32> {
    3..=7i32
}

/// Strategy for config keys/values the user might declare.
fn config_entry() -> impl Strategy<Value = (String, String)> {
    ("[a-z]{2,12}", "[a-z0-9]{1,8}").prop_map(|(k, v)| (k, v))
}

fn cluster(name: &str, generation: i64, spec: RedisClusterSpec) -> RedisCluster {
    RedisCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            generation: Some(generation),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

fn spec(size: i32, sentinels: i32, password: &str) -> RedisClusterSpec {
    RedisClusterSpec {
        size,
        password: password.to_string(),
        sentinel: SentinelSettings {
            replicas: sentinels,
            ..Default::default()
        },
        ..Default::default()
    }
}

proptest! {
    /// Property: validating twice yields an equal struct (idempotence).
    #[test]
    fn validate_is_idempotent(
        size in valid_size(),
        sentinels in valid_sentinels(),
        entries in proptest::collection::vec(config_entry(), 0..6),
        disable_persistence in any::<bool>(),
    ) {
        let mut s = spec(size, sentinels, "");
        s.disable_persistence = disable_persistence;
        for (k, v) in entries {
            s.config.insert(k, v);
        }
        let mut rc = cluster("c1", 1, s);

        validate(&mut rc).expect("valid spec");
        let once = serde_json::to_value(&rc.spec).expect("serialize");
        validate(&mut rc).expect("still valid");
        let twice = serde_json::to_value(&rc.spec).expect("serialize");

        prop_assert_eq!(once, twice);
    }

    /// Property: the validator always pins slave-priority to "1".
    #[test]
    fn validate_pins_slave_priority(
        size in valid_size(),
        priority in "[0-9]{1,3}",
    ) {
        let mut s = spec(size, 3, "");
        s.config.insert("slave-priority".to_string(), priority);
        let mut rc = cluster("c1", 1, s);

        validate(&mut rc).expect("valid spec");
        prop_assert_eq!(rc.spec.config.get("slave-priority").map(String::as_str), Some("1"));
    }

    /// Property: for any sequence of cached specs, the password stays the
    /// first one observed.
    #[test]
    fn cached_password_is_sticky(
        first in "[a-z0-9]{1,12}",
        later in proptest::collection::vec("[a-z0-9]{0,12}", 1..5),
    ) {
        let cache = MetaMap::new();
        cache.cache(&cluster("c1", 1, spec(3, 3, &first)));

        for (i, password) in later.iter().enumerate() {
            let mut s = spec(3, 3, password);
            // Vary something else too, so the generation bump is a real
            // spec change.
            s.size = 3 + ((i as i32) % 3);
            let meta = cache.cache(&cluster("c1", 2 + i as i64, s));
            prop_assert_eq!(&meta.password, &first);
            prop_assert_eq!(&meta.obj.spec.password, &first);
        }
    }

    /// Property: quorum is a strict majority of the sentinel count.
    #[test]
    fn quorum_is_majority(sentinels in valid_sentinels()) {
        let rc = cluster("c1", 1, spec(3, sentinels, ""));
        let q = quorum(&rc);
        prop_assert_eq!(q, sentinels / 2 + 1);
        prop_assert!(2 * q > sentinels);
        prop_assert!(q <= sentinels);
    }

    /// Property: memory-unit normalisation multiplies by the declared
    /// suffix factor.
    #[test]
    fn mem_conf_suffix_factors(n in 1i64..1_000_000) {
        prop_assert_eq!(parse_redis_mem_conf(&format!("{}", n)).unwrap(), n.to_string());
        prop_assert_eq!(parse_redis_mem_conf(&format!("{}k", n)).unwrap(), (n * 1000).to_string());
        prop_assert_eq!(parse_redis_mem_conf(&format!("{}kb", n)).unwrap(), (n * 1024).to_string());
        prop_assert_eq!(parse_redis_mem_conf(&format!("{}m", n)).unwrap(), (n * 1_000_000).to_string());
        prop_assert_eq!(parse_redis_mem_conf(&format!("{}mb", n)).unwrap(), (n * 1024 * 1024).to_string());
    }

    /// Property: sizes below the minimum are rejected, the zero default
    /// is filled in.
    #[test]
    fn size_boundaries(size in 0i32..3) {
        let mut rc = cluster("c1", 1, spec(size, 3, ""));
        let result = validate(&mut rc);
        if size == 0 {
            prop_assert!(result.is_ok());
            prop_assert_eq!(rc.spec.size, 3);
        } else {
            prop_assert!(result.is_err());
        }
    }
}
