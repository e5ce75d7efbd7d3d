//! Redis and sentinel wire-protocol client.

pub mod parsing;
pub mod redis_admin;

pub use redis_admin::{
    MASTER_NAME, REDIS_PORT, RedisAdmin, RedisClient, SENTINEL_PORT, WireError,
};
