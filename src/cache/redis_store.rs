use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, error, trace};

use super::ReservationStore;
use crate::errors::{AfftrackError, Result};

pub struct RedisReservationStore {
    /// 断线后自动重连，clone 共享同一条多路复用连接
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisReservationStore {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            AfftrackError::cache_connection(format!("Invalid Redis URL '{}': {}", url, e))
        })?;

        let mut connection = ConnectionManager::new(client).await?;
        // 启动时测试连接
        let pong: String = redis::cmd("PING").query_async(&mut connection).await?;
        debug!("Redis connection test successful: {}", pong);

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl ReservationStore for RedisReservationStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection.clone();

        let ttl_ms = ttl.as_millis().max(1) as u64;
        // SET NX 成功返回 "OK"，key 已存在返回 nil
        let result: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(&redis_key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(reply) => {
                trace!("reserve {} -> {:?}", key, reply);
                Ok(reply.is_some())
            }
            Err(e) => {
                error!("Failed to reserve key '{}': {}", key, e);
                Err(e.into())
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        let redis_key = self.make_key(key);
        let mut conn = self.connection.clone();

        let removed: i64 = redis::cmd("DEL")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Failed to release key '{}': {}", key, e);
                AfftrackError::from(e)
            })?;
        trace!("release {} -> {}", key, removed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
