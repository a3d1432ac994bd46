use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use swarm_core::{resolve_range, CoordinationStore, SwarmError, SwarmResult};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct StoreState {
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    expires_at: HashMap<String, Instant>,
}

impl StoreState {
    fn purge_if_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expires_at.get(key) {
            if Instant::now() >= *deadline {
                self.remove(key);
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expires_at.remove(key);
        let hash = self.hashes.remove(key).is_some();
        let string = self.strings.remove(key).is_some();
        let list = self.lists.remove(key).is_some();
        hash || string || list
    }

    fn exists(&self, key: &str) -> bool {
        self.hashes.contains_key(key) || self.strings.contains_key(key) || self.lists.contains_key(key)
    }

    fn pop_right(&mut self, key: &str) -> Option<String> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_back();
        if list.is_empty() {
            self.lists.remove(key);
            self.expires_at.remove(key);
        }
        value
    }
}

/// Process-local coordination store.
///
/// Mirrors the redis semantics the orchestrator relies on: lists are push-left
/// / pop-right, empty collections disappear, TTLs expire lazily on access and
/// `brpop` wakes as soon as a producer pushes. Used by `all` mode and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    pushed: Arc<Notify>,
    offline: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a lost connection: every operation fails with
    /// `StoreUnavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        debug!(offline, "In-memory store availability changed");
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> SwarmResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SwarmError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn ping(&self) -> SwarmResult<()> {
        self.check_online()
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> SwarmResult<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> SwarmResult<()> {
        self.check_online()?;
        if fields.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> SwarmResult<Option<String>> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> SwarmResult<HashMap<String, String>> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> SwarmResult<bool> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        let Some(hash) = state.hashes.get_mut(key) else {
            return Ok(false);
        };
        let existed = hash.remove(field).is_some();
        if hash.is_empty() {
            state.remove(key);
        }
        Ok(existed)
    }

    async fn hkeys(&self, key: &str) -> SwarmResult<Vec<String>> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state
            .hashes
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> SwarmResult<usize> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state.hashes.get(key).map(|h| h.len()).unwrap_or(0))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> SwarmResult<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.remove(key);
        state.strings.insert(key.to_string(), value.to_string());
        state.expires_at.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn get(&self, key: &str) -> SwarmResult<Option<String>> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state.strings.get(key).cloned())
    }

    async fn del(&self, key: &str) -> SwarmResult<bool> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state.remove(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SwarmResult<bool> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        if !state.exists(key) {
            return Ok(false);
        }
        state.expires_at.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn lpush(&self, key: &str, value: &str) -> SwarmResult<usize> {
        self.check_online()?;
        let len = {
            let mut state = self.state.lock().await;
            state.purge_if_expired(key);
            let list = state.lists.entry(key.to_string()).or_default();
            list.push_front(value.to_string());
            list.len()
        };
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn rpop(&self, key: &str) -> SwarmResult<Option<String>> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state.pop_right(key))
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> SwarmResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.rpop(key).await? {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn llen(&self, key: &str) -> SwarmResult<usize> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        Ok(state.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> SwarmResult<Vec<String>> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> SwarmResult<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        state.purge_if_expired(key);
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(());
        };
        match resolve_range(list.len(), start, stop) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => {
                state.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_fifo_between_lpush_and_rpop() {
        let store = InMemoryStore::new();
        store.lpush("q", "first").await.unwrap();
        store.lpush("q", "second").await.unwrap();

        assert_eq!(store.llen("q").await.unwrap(), 2);
        assert_eq!(store.rpop("q").await.unwrap().as_deref(), Some("first"));
        assert_eq!(store.rpop("q").await.unwrap().as_deref(), Some("second"));
        assert_eq!(store.rpop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lrange_and_ltrim_follow_redis_indices() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.lpush("l", &i.to_string()).await.unwrap();
        }
        // newest first: 4 3 2 1 0
        assert_eq!(store.lrange("l", 0, 1).await.unwrap(), vec!["4", "3"]);
        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), vec!["1", "0"]);

        store.ltrim("l", 0, 2).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["4", "3", "2"]);

        store.ltrim("l", 5, 10).await.unwrap();
        assert_eq!(store.llen("l").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = InMemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store
            .hset_multiple("h", &[("b".to_string(), "2".to_string())])
            .await
            .unwrap();

        assert_eq!(store.hlen("h").await.unwrap(), 2);
        assert_eq!(store.hget("h", "b").await.unwrap().as_deref(), Some("2"));
        assert!(store.hdel("h", "a").await.unwrap());
        assert!(!store.hdel("h", "a").await.unwrap());
        assert_eq!(store.hkeys("h").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ex_expires() {
        let store = InMemoryStore::new();
        store
            .set_ex("hb", "123", Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(store.get("hb").await.unwrap().as_deref(), Some("123"));

        tokio::time::advance(Duration::from_secs(121)).await;
        assert_eq!(store.get("hb").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_applies_to_lists() {
        let store = InMemoryStore::new();
        store.lpush("metrics", "x").await.unwrap();
        assert!(store.expire("metrics", Duration::from_secs(10)).await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(10)).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.llen("metrics").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_brpop_times_out_on_empty_list() {
        let store = InMemoryStore::new();
        let popped = store.brpop("q", Duration::from_secs(5)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_brpop_wakes_on_push() {
        let store = InMemoryStore::new();
        let consumer = {
            let store = store.clone();
            tokio::spawn(async move { store.brpop("q", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.lpush("q", "task").await.unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("task"));
    }

    #[tokio::test]
    async fn test_offline_store_fails_with_transient_error() {
        let store = InMemoryStore::new();
        store.set_offline(true);

        let err = store.ping().await.unwrap_err();
        assert!(err.is_transient());

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }
}
