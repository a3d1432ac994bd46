pub mod in_memory_store;
pub mod keys;
pub mod redis_store;
pub mod store_factory;
pub mod system_probe;

pub use in_memory_store::InMemoryStore;
pub use redis_store::RedisStore;
pub use store_factory::StoreFactory;
pub use system_probe::{local_hostname, HostSnapshot, LinuxSystemProbe, SystemProbe};
