use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::SwarmResult;

/// Coordination store abstraction.
///
/// Any backend offering a hash map, TTL-bound string keys and FIFO lists with
/// a blocking pop qualifies. Lists follow push-left / pop-right ordering so a
/// producer's `lpush` is consumed in order by `rpop`/`brpop`.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Connectivity check
    async fn ping(&self) -> SwarmResult<()>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> SwarmResult<()>;

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> SwarmResult<()>;

    async fn hget(&self, key: &str, field: &str) -> SwarmResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> SwarmResult<HashMap<String, String>>;

    /// Returns whether the field existed
    async fn hdel(&self, key: &str, field: &str) -> SwarmResult<bool>;

    async fn hkeys(&self, key: &str) -> SwarmResult<Vec<String>>;

    async fn hlen(&self, key: &str) -> SwarmResult<usize>;

    /// Sets a string key that expires after `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> SwarmResult<()>;

    async fn get(&self, key: &str) -> SwarmResult<Option<String>>;

    /// Returns whether the key existed
    async fn del(&self, key: &str) -> SwarmResult<bool>;

    /// Returns whether a timeout was set
    async fn expire(&self, key: &str, ttl: Duration) -> SwarmResult<bool>;

    /// Returns the new list length
    async fn lpush(&self, key: &str, value: &str) -> SwarmResult<usize>;

    async fn rpop(&self, key: &str) -> SwarmResult<Option<String>>;

    /// Blocks up to `timeout`; `None` when nothing arrived in time
    async fn brpop(&self, key: &str, timeout: Duration) -> SwarmResult<Option<String>>;

    async fn llen(&self, key: &str) -> SwarmResult<usize>;

    /// Inclusive range; negative indices count from the tail
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> SwarmResult<Vec<String>>;

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> SwarmResult<()>;
}

/// Serializes `value` as JSON and pushes it onto `key`
pub async fn push_json<T: Serialize + Sync>(
    store: &dyn CoordinationStore,
    key: &str,
    value: &T,
) -> SwarmResult<usize> {
    let payload = serde_json::to_string(value)?;
    store.lpush(key, &payload).await
}

/// Parses a popped payload
pub fn decode_json<T: DeserializeOwned>(payload: &str) -> SwarmResult<T> {
    Ok(serde_json::from_str(payload)?)
}

/// Resolves redis-style inclusive indices against a list of `len` items
pub fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}
