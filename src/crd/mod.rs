//! Custom Resource Definitions for redis-operator.
//!
//! - `RedisCluster`: declare a highly-available Redis (replication +
//!   sentinel) cluster.

mod redis_cluster;

pub use redis_cluster::*;
