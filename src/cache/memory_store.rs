use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;
use tracing::{debug, trace};

use super::ReservationStore;
use crate::errors::Result;

/// 每个条目的 TTL 由写入时的值决定
struct ReservationExpiry;

impl Expiry<String, Duration> for ReservationExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Duration,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(*value)
    }
}

pub struct MemoryReservationStore {
    inner: Cache<String, Duration>,
}

impl MemoryReservationStore {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(ReservationExpiry)
            .build();

        debug!(
            "MemoryReservationStore initialized with max capacity: {}",
            max_capacity
        );
        Self { inner }
    }
}

#[async_trait]
impl ReservationStore for MemoryReservationStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        // entry().or_insert() 对同一 key 的并发调用只会让一个调用者看到 fresh
        let entry = self.inner.entry(key.to_string()).or_insert(ttl).await;
        let fresh = entry.is_fresh();
        trace!("reserve {} -> {}", key, fresh);
        Ok(fresh)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        trace!("release {}", key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
