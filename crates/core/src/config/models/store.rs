use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    /// Process-local store, only meaningful in `all` mode and tests
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            host: "redis-cache".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 30,
            max_retry_attempts: 3,
            retry_delay_seconds: 1,
        }
    }
}

impl StoreConfig {
    pub fn build_connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == StoreBackend::Redis {
            if self.host.is_empty() {
                return Err(anyhow::anyhow!("store host must not be empty"));
            }
            if self.port == 0 {
                return Err(anyhow::anyhow!("store port must be greater than 0"));
            }
        }
        if self.max_retry_attempts == 0 {
            return Err(anyhow::anyhow!("max_retry_attempts must be greater than 0"));
        }
        Ok(())
    }
}
