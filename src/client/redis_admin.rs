//! Wire-level client for redis and sentinel administration.
//!
//! Every operation opens a short-lived connection to one node, issues a
//! single command (or a small group), and closes it on all exit paths.
//! Sentinel connections never carry a password; data connections carry the
//! cluster password when one is set.
//!
//! The [`RedisClient`] trait is the seam between the controller and the
//! wire: production uses [`RedisAdmin`], tests substitute an in-memory
//! topology.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use fred::cmd;
use fred::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::client::parsing::{
    self, ParseError, pair_config_reply, parse_master_host, parse_sentinel_count, reply_field,
};

/// Redis data port.
pub const REDIS_PORT: u16 = 6379;

/// Sentinel port.
pub const SENTINEL_PORT: u16 = 26379;

/// The fixed master name every sentinel monitors.
pub const MASTER_NAME: &str = "mymaster";

const DEFAULT_DOWN_AFTER_MILLISECONDS: &str = "5000";
const DEFAULT_FAILOVER_TIMEOUT: &str = "3000";
const DEFAULT_PARALLEL_SYNCS: &str = "2";

/// Errors from redis/sentinel wire operations.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Typed operations against redis data nodes and sentinels.
///
/// Implemented by [`RedisAdmin`] over real connections; the checker and
/// healer only depend on this trait so topology logic can be exercised
/// against a simulated cluster.
#[async_trait]
pub trait RedisClient: Send + Sync {
    /// `INFO sentinel` on a sentinel; parse `sentinels=N`, erroring unless
    /// the monitored master status is ok.
    async fn sentinel_count(&self, ip: &str) -> Result<i32, WireError>;

    /// Count the slaves a sentinel knows about, ignoring
    /// `slave-priority=0` entries (those are never promotion candidates).
    async fn sentinel_slave_count(&self, ip: &str) -> Result<i32, WireError>;

    /// `SENTINEL reset *`, clearing the sentinel's in-memory state.
    async fn reset_sentinel(&self, ip: &str) -> Result<(), WireError>;

    /// The `master_host` a replica reports, or empty when it is a master.
    async fn slave_master_ip(&self, ip: &str, password: Option<&str>)
    -> Result<String, WireError>;

    /// Whether the replica reports `role:master`.
    async fn is_master(&self, ip: &str, password: Option<&str>) -> Result<bool, WireError>;

    /// Point a sentinel at a master: remove the stale monitor (errors
    /// ignored, monitoring takes priority), `SENTINEL MONITOR` with the
    /// quorum, then auth-pass and the failover tuning parameters.
    async fn monitor_redis(
        &self,
        ip: &str,
        master_ip: &str,
        quorum: i32,
        password: Option<&str>,
    ) -> Result<(), WireError>;

    /// `SLAVEOF NO ONE`: promote the node to master.
    async fn make_master(&self, ip: &str, password: Option<&str>) -> Result<(), WireError>;

    /// `SLAVEOF <master> 6379`: attach the node to the given master.
    async fn make_slave_of(
        &self,
        ip: &str,
        master_ip: &str,
        password: Option<&str>,
    ) -> Result<(), WireError>;

    /// IP of the master the sentinel currently monitors.
    async fn get_sentinel_monitor(&self, ip: &str) -> Result<String, WireError>;

    /// Apply `"PARAM VALUE..."` lines via `SENTINEL set mymaster`.
    async fn set_sentinel_config(&self, ip: &str, lines: &[String]) -> Result<(), WireError>;

    /// `CONFIG SET` each pair on a replica.
    async fn set_redis_config(
        &self,
        ip: &str,
        configs: &BTreeMap<String, String>,
        password: Option<&str>,
    ) -> Result<(), WireError>;

    /// `CONFIG GET *` as a mapping.
    async fn get_all_redis_config(
        &self,
        ip: &str,
        password: Option<&str>,
    ) -> Result<HashMap<String, String>, WireError>;
}

/// Administrative client for redis and sentinel nodes.
///
/// Stateless apart from timeouts; connections are per-operation.
#[derive(Clone, Debug)]
pub struct RedisAdmin {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for RedisAdmin {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl RedisAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to a single node.
    async fn connect(
        &self,
        ip: &str,
        port: u16,
        password: Option<&str>,
    ) -> Result<Client, WireError> {
        let mut config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(ip, port),
            },
            ..Default::default()
        };
        // Sentinel connections never authenticate.
        if port != SENTINEL_PORT
            && let Some(pass) = password
            && !pass.is_empty()
        {
            config.password = Some(pass.to_string());
        }

        let command_timeout = self.command_timeout;
        let connect_timeout = self.connect_timeout;
        let client = Builder::from_config(config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connect_timeout;
            })
            .build()?;

        client.init().await?;
        Ok(client)
    }

    async fn sentinel_set(
        &self,
        client: &Client,
        parameter: &str,
        value: &str,
    ) -> Result<(), WireError> {
        let _: String = client
            .custom(
                cmd!("SENTINEL"),
                vec![
                    "SET".to_string(),
                    MASTER_NAME.to_string(),
                    parameter.to_string(),
                    value.to_string(),
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RedisClient for RedisAdmin {
    async fn sentinel_count(&self, ip: &str) -> Result<i32, WireError> {
        let client = self.connect(ip, SENTINEL_PORT, None).await?;
        let res = async {
            let info: String = client
                .custom(cmd!("INFO"), vec!["sentinel".to_string()])
                .await?;
            Ok(parse_sentinel_count(&info)?)
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn sentinel_slave_count(&self, ip: &str) -> Result<i32, WireError> {
        let client = self.connect(ip, SENTINEL_PORT, None).await?;
        let res = async {
            let info: String = client
                .custom(cmd!("INFO"), vec!["sentinel".to_string()])
                .await?;
            parsing::check_sentinel_ready(&info)?;

            let blobs: Vec<Vec<String>> = client
                .custom(
                    cmd!("SENTINEL"),
                    vec!["slaves".to_string(), MASTER_NAME.to_string()],
                )
                .await?;
            let count = blobs
                .iter()
                .filter(|blob| reply_field(blob, "slave-priority") != Some("0"))
                .count();
            Ok(count as i32)
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn reset_sentinel(&self, ip: &str) -> Result<(), WireError> {
        debug!(ip = %ip, "resetting sentinel");
        let client = self.connect(ip, SENTINEL_PORT, None).await?;
        let res = async {
            let _: i64 = client
                .custom(cmd!("SENTINEL"), vec!["reset".to_string(), "*".to_string()])
                .await?;
            Ok(())
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn slave_master_ip(
        &self,
        ip: &str,
        password: Option<&str>,
    ) -> Result<String, WireError> {
        let client = self.connect(ip, REDIS_PORT, password).await?;
        let res = async {
            let info: String = client
                .custom(cmd!("INFO"), vec!["replication".to_string()])
                .await?;
            Ok(parse_master_host(&info))
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn is_master(&self, ip: &str, password: Option<&str>) -> Result<bool, WireError> {
        let client = self.connect(ip, REDIS_PORT, password).await?;
        let res = async {
            let info: String = client
                .custom(cmd!("INFO"), vec!["replication".to_string()])
                .await?;
            Ok(parsing::is_master_role(&info))
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn monitor_redis(
        &self,
        ip: &str,
        master_ip: &str,
        quorum: i32,
        password: Option<&str>,
    ) -> Result<(), WireError> {
        let client = self.connect(ip, SENTINEL_PORT, None).await?;
        let res = async {
            let _: Result<String, fred::error::Error> = client
                .custom(
                    cmd!("SENTINEL"),
                    vec!["REMOVE".to_string(), MASTER_NAME.to_string()],
                )
                .await;

            let _: String = client
                .custom(
                    cmd!("SENTINEL"),
                    vec![
                        "MONITOR".to_string(),
                        MASTER_NAME.to_string(),
                        master_ip.to_string(),
                        REDIS_PORT.to_string(),
                        quorum.to_string(),
                    ],
                )
                .await?;

            if let Some(pass) = password
                && !pass.is_empty()
            {
                self.sentinel_set(&client, "auth-pass", pass).await?;
            }
            self.sentinel_set(&client, "down-after-milliseconds", DEFAULT_DOWN_AFTER_MILLISECONDS)
                .await?;
            self.sentinel_set(&client, "failover-timeout", DEFAULT_FAILOVER_TIMEOUT)
                .await?;
            self.sentinel_set(&client, "parallel-syncs", DEFAULT_PARALLEL_SYNCS)
                .await?;
            Ok(())
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn make_master(&self, ip: &str, password: Option<&str>) -> Result<(), WireError> {
        debug!(ip = %ip, "promoting to master");
        let client = self.connect(ip, REDIS_PORT, password).await?;
        let res = async {
            let _: String = client
                .custom(cmd!("SLAVEOF"), vec!["NO".to_string(), "ONE".to_string()])
                .await?;
            Ok(())
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn make_slave_of(
        &self,
        ip: &str,
        master_ip: &str,
        password: Option<&str>,
    ) -> Result<(), WireError> {
        debug!(ip = %ip, master = %master_ip, "reparenting replica");
        let client = self.connect(ip, REDIS_PORT, password).await?;
        let res = async {
            let _: String = client
                .custom(
                    cmd!("SLAVEOF"),
                    vec![master_ip.to_string(), REDIS_PORT.to_string()],
                )
                .await?;
            Ok(())
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn get_sentinel_monitor(&self, ip: &str) -> Result<String, WireError> {
        let client = self.connect(ip, SENTINEL_PORT, None).await?;
        let res = async {
            let blob: Vec<String> = client
                .custom(
                    cmd!("SENTINEL"),
                    vec!["master".to_string(), MASTER_NAME.to_string()],
                )
                .await?;
            reply_field(&blob, "ip")
                .map(|s| s.to_string())
                .ok_or_else(|| WireError::UnexpectedReply("no ip in SENTINEL master".to_string()))
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn set_sentinel_config(&self, ip: &str, lines: &[String]) -> Result<(), WireError> {
        let client = self.connect(ip, SENTINEL_PORT, None).await?;
        let res = async {
            for line in lines {
                let (parameter, value) = split_config_line(line)?;
                self.sentinel_set(&client, parameter, &value).await?;
            }
            Ok(())
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn set_redis_config(
        &self,
        ip: &str,
        configs: &BTreeMap<String, String>,
        password: Option<&str>,
    ) -> Result<(), WireError> {
        let client = self.connect(ip, REDIS_PORT, password).await?;
        let res = async {
            for (parameter, value) in configs {
                let _: String = client
                    .custom(
                        cmd!("CONFIG"),
                        vec!["SET".to_string(), parameter.clone(), value.clone()],
                    )
                    .await?;
            }
            Ok(())
        }
        .await;
        let _ = client.quit().await;
        res
    }

    async fn get_all_redis_config(
        &self,
        ip: &str,
        password: Option<&str>,
    ) -> Result<HashMap<String, String>, WireError> {
        let client = self.connect(ip, REDIS_PORT, password).await?;
        let res = async {
            let reply: Vec<String> = client
                .custom(cmd!("CONFIG"), vec!["GET".to_string(), "*".to_string()])
                .await?;
            Ok(pair_config_reply(reply).into_iter().collect())
        }
        .await;
        let _ = client.quit().await;
        res
    }
}

/// Split a `"PARAM VALUE..."` custom-config line into parameter and value.
fn split_config_line(line: &str) -> Result<(&str, String), WireError> {
    let mut parts = line.split_whitespace();
    let parameter = parts.next().filter(|p| !p.is_empty());
    let value = parts.collect::<Vec<_>>().join(" ");
    match parameter {
        Some(parameter) if !value.is_empty() => Ok((parameter, value)),
        _ => Err(WireError::UnexpectedReply(format!(
            "configuration '{}' malformed",
            line
        ))),
    }
}
