use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue};
use swarm_core::config::StoreConfig;
use swarm_core::{CoordinationStore, SwarmError, SwarmResult};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

fn store_error(e: redis::RedisError) -> SwarmError {
    SwarmError::StoreUnavailable(e.to_string())
}

/// Redis-backed coordination store.
///
/// Holds two multiplexed connection managers: blocking pops go through their
/// own connection so a waiting `BRPOP` never stalls heartbeats or status
/// writes issued by the same process.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    blocking_conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> SwarmResult<Self> {
        let client = Client::open(config.build_connection_url())
            .map_err(|e| SwarmError::Configuration(format!("invalid redis url: {e}")))?;

        let conn = Self::connection_with_retry(&client, config).await?;
        let blocking_conn = Self::connection_with_retry(&client, config).await?;

        let store = Self {
            conn,
            blocking_conn,
        };
        store.ping().await?;
        info!(
            host = %config.host,
            port = config.port,
            database = config.database,
            "Connected to redis coordination store"
        );
        Ok(store)
    }

    async fn connection_with_retry(
        client: &Client,
        config: &StoreConfig,
    ) -> SwarmResult<ConnectionManager> {
        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let mut last_error = String::from("unknown");

        for attempt in 0..config.max_retry_attempts {
            match tokio::time::timeout(timeout, client.get_connection_manager()).await {
                Ok(Ok(conn)) => {
                    if attempt > 0 {
                        debug!("Connected to redis after {} attempts", attempt + 1);
                    }
                    return Ok(conn);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("connection timed out after {timeout:?}"),
            }

            if attempt + 1 < config.max_retry_attempts {
                warn!(
                    "Failed to connect to redis (attempt {}/{}): {}. Retrying in {}s...",
                    attempt + 1,
                    config.max_retry_attempts,
                    last_error,
                    config.retry_delay_seconds
                );
                sleep(Duration::from_secs(config.retry_delay_seconds)).await;
            }
        }

        let message = format!(
            "failed to connect to redis after {} attempts: {}",
            config.max_retry_attempts, last_error
        );
        error!("{}", message);
        Err(SwarmError::StoreUnavailable(message))
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> SwarmResult<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn).await.map_err(store_error)
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> SwarmResult<()> {
        let response: String = self.query(&redis::cmd("PING")).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(SwarmError::StoreUnavailable(format!(
                "unexpected PING response: {response}"
            )))
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> SwarmResult<()> {
        let _: i64 = self
            .query(redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await?;
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> SwarmResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> SwarmResult<Option<String>> {
        self.query(redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hgetall(&self, key: &str) -> SwarmResult<HashMap<String, String>> {
        self.query(redis::cmd("HGETALL").arg(key)).await
    }

    async fn hdel(&self, key: &str, field: &str) -> SwarmResult<bool> {
        let removed: i64 = self.query(redis::cmd("HDEL").arg(key).arg(field)).await?;
        Ok(removed > 0)
    }

    async fn hkeys(&self, key: &str) -> SwarmResult<Vec<String>> {
        self.query(redis::cmd("HKEYS").arg(key)).await
    }

    async fn hlen(&self, key: &str) -> SwarmResult<usize> {
        self.query(redis::cmd("HLEN").arg(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> SwarmResult<()> {
        let _: () = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl_seconds(ttl)),
            )
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> SwarmResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn del(&self, key: &str) -> SwarmResult<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SwarmResult<bool> {
        let applied: i64 = self
            .query(redis::cmd("EXPIRE").arg(key).arg(ttl_seconds(ttl)))
            .await?;
        Ok(applied == 1)
    }

    async fn lpush(&self, key: &str, value: &str) -> SwarmResult<usize> {
        self.query(redis::cmd("LPUSH").arg(key).arg(value)).await
    }

    async fn rpop(&self, key: &str) -> SwarmResult<Option<String>> {
        self.query(redis::cmd("RPOP").arg(key)).await
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> SwarmResult<Option<String>> {
        let mut conn = self.blocking_conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(ttl_seconds(timeout))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> SwarmResult<usize> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> SwarmResult<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> SwarmResult<()> {
        let _: () = self
            .query(redis::cmd("LTRIM").arg(key).arg(start).arg(stop))
            .await?;
        Ok(())
    }
}
