use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

/// 原子的 "不存在则写入" 存储
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// 尝试占用 `key`，有效期 `ttl`
    ///
    /// - `Ok(true)`: 之前不存在，已写入
    /// - `Ok(false)`: 已被占用（重放 / 重复）
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// 撤销占用，key 不存在时也返回 `Ok`
    async fn release(&self, key: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}
