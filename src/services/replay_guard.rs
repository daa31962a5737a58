//! Replay guard
//!
//! 所有检查都是 ReservationStore 上的一次原子 test-and-set，
//! key 前缀区分用途：
//! - `replay:{code}:{nonce}`  签名链接 nonce
//! - `fp:{fingerprint}`       点击指纹去重
//! - `pbnonce:{key}:{nonce}`  postback 请求签名 nonce
//!
//! 存储不可用或超时时放行（记录 warn），点击重定向不能被缓存故障阻断。

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::ReservationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// 首次出现，已占用
    Fresh,
    /// 已存在
    Duplicate,
    /// 存储故障，按首次出现处理
    Unavailable,
}

impl Reservation {
    pub fn is_duplicate(self) -> bool {
        self == Reservation::Duplicate
    }
}

pub struct ReplayGuard {
    store: Arc<dyn ReservationStore>,
    timeout: Duration,
}

impl ReplayGuard {
    pub fn new(store: Arc<dyn ReservationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn reserve(&self, key: String, ttl: Duration) -> Reservation {
        match tokio::time::timeout(self.timeout, self.store.reserve(&key, ttl)).await {
            Ok(Ok(true)) => Reservation::Fresh,
            Ok(Ok(false)) => Reservation::Duplicate,
            Ok(Err(e)) => {
                warn!("Reservation store {} failed for {}: {}", self.store.name(), key, e);
                Reservation::Unavailable
            }
            Err(_) => {
                warn!(
                    "Reservation store {} timed out after {}ms for {}",
                    self.store.name(),
                    self.timeout.as_millis(),
                    key
                );
                Reservation::Unavailable
            }
        }
    }

    /// 签名链接的 nonce，ttl 与链接有效期一致
    pub async fn check_and_reserve(&self, tracking_code: &str, nonce: &str, ttl: Duration) -> Reservation {
        self.reserve(format!("replay:{}:{}", tracking_code, nonce), ttl)
            .await
    }

    pub async fn reserve_fingerprint(&self, fingerprint: &str, ttl: Duration) -> Reservation {
        self.reserve(format!("fp:{}", fingerprint), ttl).await
    }

    /// 点击没写进库时撤销指纹，重试的点击不会被当成重复
    pub async fn release_fingerprint(&self, fingerprint: &str) {
        let key = format!("fp:{}", fingerprint);
        match tokio::time::timeout(self.timeout, self.store.release(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Reservation store {} failed to release {}: {}", self.store.name(), key, e),
            Err(_) => warn!("Reservation store {} timed out releasing {}", self.store.name(), key),
        }
    }

    pub async fn reserve_postback_nonce(&self, key_id: &str, nonce: &str, ttl: Duration) -> Reservation {
        self.reserve(format!("pbnonce:{}:{}", key_id, nonce), ttl)
            .await
    }
}
