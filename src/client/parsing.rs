//! Parsing of redis and sentinel text output.
//!
//! Regex-based extraction from `INFO` sections and sentinel replies, plus
//! normalisation of redis memory-unit config values. Pure functions, easy
//! to test without a live server.

use regex::Regex;
use thiserror::Error;

/// Errors that can occur while interpreting server output.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to compile regex: {0}")]
    RegexCompilation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("sentinel not ready")]
    SentinelNotReady,

    #[error("Missing required field: {0}")]
    MissingField(String),
}

const SENTINEL_NUMBER_RE: &str = r"sentinels=([0-9]+)";
const SENTINEL_STATUS_RE: &str = r"status=([a-z]+)";
const MASTER_HOST_RE: &str = r"master_host:([0-9a-zA-Z:.]+)";

const ROLE_MASTER: &str = "role:master";

fn compile(pattern: &str) -> Result<Regex, ParseError> {
    Regex::new(pattern).map_err(|e| ParseError::RegexCompilation(e.to_string()))
}

/// Number of sentinels the queried sentinel knows about, from `INFO sentinel`.
///
/// Fails unless the master status reported by the sentinel is `ok`.
pub fn parse_sentinel_count(info: &str) -> Result<i32, ParseError> {
    check_sentinel_ready(info)?;
    let re = compile(SENTINEL_NUMBER_RE)?;
    let count = re
        .captures(info)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ParseError::MissingField("sentinels".to_string()))?;
    count
        .as_str()
        .parse()
        .map_err(|e| ParseError::Parse(format!("sentinels count: {}", e)))
}

/// Verify `INFO sentinel` output reports `status=ok` for the master.
pub fn check_sentinel_ready(info: &str) -> Result<(), ParseError> {
    let re = compile(SENTINEL_STATUS_RE)?;
    match re.captures(info).and_then(|caps| caps.get(1)) {
        Some(status) if status.as_str() == "ok" => Ok(()),
        _ => Err(ParseError::SentinelNotReady),
    }
}

/// Captured `master_host:` from `INFO replication`, or empty for a master.
pub fn parse_master_host(info: &str) -> String {
    compile(MASTER_HOST_RE)
        .ok()
        .and_then(|re| re.captures(info))
        .and_then(|caps| caps.get(1))
        .map(|host| host.as_str().to_string())
        .unwrap_or_default()
}

/// Whether `INFO replication` output reports the master role.
pub fn is_master_role(info: &str) -> bool {
    info.contains(ROLE_MASTER)
}

/// Look up a field in a sentinel field/value reply blob.
///
/// `SENTINEL slaves`/`SENTINEL master` replies are flat arrays alternating
/// field names and values.
pub fn reply_field<'a>(blob: &'a [String], name: &str) -> Option<&'a str> {
    blob.chunks_exact(2)
        .find(|pair| pair[0] == name)
        .map(|pair| pair[1].as_str())
}

/// Pair up a flat `CONFIG GET` reply into (key, value) tuples.
pub fn pair_config_reply(reply: Vec<String>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(reply.len() / 2);
    let mut iter = reply.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    pairs
}

/// Normalise a redis memory-unit config value to a plain byte count string.
///
/// Redis accepts `1k`, `1kb`, `1m`, `1mb`, `1g`, `1gb`, `1b` (case
/// insensitive) but `CONFIG GET` always reports plain decimal bytes, so
/// declared values must be normalised before comparing.
pub fn parse_redis_mem_conf(value: &str) -> Result<String, ParseError> {
    let lower = value.to_lowercase();

    let (digits, mul): (&str, i64) = if let Some(d) = lower.strip_suffix("kb") {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix("mb") {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("gb") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix('k') {
        (d, 1000)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 1000 * 1000)
    } else if let Some(d) = lower.strip_suffix('g') {
        (d, 1000 * 1000 * 1000)
    } else if let Some(d) = lower.strip_suffix('b') {
        (d, 1)
    } else {
        (lower.as_str(), 1)
    };

    let n: i64 = digits
        .parse()
        .map_err(|e| ParseError::Parse(format!("memory value '{}': {}", value, e)))?;
    Ok((n * mul).to_string())
}

/// Config keys whose values redis reports in plain bytes.
pub const MEM_UNIT_KEYS: &[&str] = &[
    "maxmemory",
    "proto-max-bulk-len",
    "client-query-buffer-limit",
    "repl-backlog-size",
    "auto-aof-rewrite-min-size",
    "active-defrag-ignore-bytes",
    "hash-max-ziplist-entries",
    "hash-max-ziplist-value",
    "stream-node-max-bytes",
    "set-max-intset-entries",
    "zset-max-ziplist-entries",
    "zset-max-ziplist-value",
    "hll-sparse-max-bytes",
];

/// Whether a config key's declared value needs memory-unit normalisation.
pub fn is_mem_unit_key(key: &str) -> bool {
    MEM_UNIT_KEYS.contains(&key)
}
