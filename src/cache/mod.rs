//! Reservation stores
//!
//! 防重放与点击去重都依赖一个带 TTL 的原子 test-and-set：
//! - `memory`: moka future cache，entry API 保证同 key 并发只有一个写入者
//! - `redis`: `SET key 1 NX PX ttl`，多实例部署时共享

pub mod memory_store;
pub mod redis_store;
pub mod traits;

use std::sync::Arc;

use tracing::info;

use crate::config::CacheConfig;
use crate::errors::{AfftrackError, Result};

pub use memory_store::MemoryReservationStore;
pub use redis_store::RedisReservationStore;
pub use traits::ReservationStore;

/// 根据 `cache.type` 创建 ReservationStore
pub async fn create_reservation_store(config: &CacheConfig) -> Result<Arc<dyn ReservationStore>> {
    let store: Arc<dyn ReservationStore> = match config.cache_type.as_str() {
        "memory" => Arc::new(MemoryReservationStore::new(config.memory.max_capacity)),
        "redis" => Arc::new(
            RedisReservationStore::connect(&config.redis.url, &config.redis.key_prefix).await?,
        ),
        other => {
            return Err(AfftrackError::cache_connection(format!(
                "Unknown cache type '{}', expected 'memory' or 'redis'",
                other
            )));
        }
    };

    info!("Reservation store initialized: {}", store.name());
    Ok(store)
}
