use std::sync::Arc;

use swarm_core::config::{StoreBackend, StoreConfig};
use swarm_core::{CoordinationStore, SwarmResult};
use tracing::{debug, info};

use crate::{InMemoryStore, RedisStore};

pub struct StoreFactory;

impl StoreFactory {
    pub async fn create(config: &StoreConfig) -> SwarmResult<Arc<dyn CoordinationStore>> {
        debug!("Creating coordination store with backend: {:?}", config.backend);

        match config.backend {
            StoreBackend::Redis => {
                info!("Initializing redis coordination store");
                let store = RedisStore::connect(config).await?;
                Ok(Arc::new(store))
            }
            StoreBackend::Memory => {
                info!("Initializing in-memory coordination store");
                Ok(Arc::new(InMemoryStore::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        };
        let store = StoreFactory::create(&config).await.unwrap();
        assert!(store.ping().await.is_ok());
    }
}
