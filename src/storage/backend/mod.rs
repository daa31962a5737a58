//! SeaORM storage backend
//!
//! SQLite / MySQL / PostgreSQL，按表拆分到各子模块：
//! catalog（users / offers / user_offers）、clicks、conversions、fraud、
//! geo_rules、api_keys、webhooks。

mod api_keys;
mod catalog;
mod clicks;
mod connection;
mod conversions;
mod fraud;
mod geo_rules;
pub mod retry;
mod webhooks;

use std::future::Future;
use std::time::Duration;

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};
use tracing::warn;

use crate::config::DatabaseConfig;
use crate::errors::{AfftrackError, Result};

pub use connection::{connect_generic, connect_sqlite, run_migrations};
pub use conversions::ConversionInsert;
pub use webhooks::{ExecutionFilter, ExecutionProgress, NewPipeline, NewStep, StepResultUpdate};

/// 从数据库 URL 推断数据库类型
pub fn infer_backend_from_url(database_url: &str) -> Result<String> {
    if database_url.starts_with("sqlite:")
        || database_url.ends_with(".db")
        || database_url.ends_with(".sqlite")
        || database_url == ":memory:"
    {
        Ok("sqlite".to_string())
    } else if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
        Ok("mysql".to_string())
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok("postgres".to_string())
    } else {
        Err(AfftrackError::database_config(format!(
            "无法从 URL 推断数据库类型: {}. 支持的 URL 格式: sqlite://, mysql://, mariadb://, postgres://",
            database_url
        )))
    }
}

/// SeaORM-based storage backend
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
    backend_name: String,
    retry_config: retry::RetryConfig,
    /// 点击 / 转化写入的总超时
    write_timeout: Duration,
}

impl SeaOrmStorage {
    pub async fn new(database_url: &str, backend_name: &str, config: &DatabaseConfig) -> Result<Self> {
        if database_url.is_empty() {
            return Err(AfftrackError::database_config(
                "database_url 未设置".to_string(),
            ));
        }

        let db = if backend_name == "sqlite" {
            connect_sqlite(database_url, config.pool_size).await?
        } else {
            connect_generic(database_url, backend_name, config).await?
        };

        run_migrations(&db).await?;

        let storage = Self::from_connection(db, backend_name, config);
        warn!(
            "{} Storage initialized.",
            storage.backend_name.to_uppercase()
        );
        Ok(storage)
    }

    /// 使用已建立（且已迁移）的连接
    pub fn from_connection(db: DatabaseConnection, backend_name: &str, config: &DatabaseConfig) -> Self {
        Self {
            db,
            backend_name: backend_name.to_string(),
            retry_config: retry::RetryConfig::from_config(config),
            write_timeout: Duration::from_millis(config.write_timeout_ms.max(1)),
        }
    }

    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// 健康检查
    pub async fn ping(&self) -> Result<()> {
        self.db
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AfftrackError::database_connection(format!("数据库不可用: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.db
            .clone()
            .close()
            .await
            .map_err(|e| AfftrackError::database_connection(format!("关闭连接失败: {}", e)))
    }

    /// 热路径写入：可重试错误自动重试，整体受 write_timeout 约束
    async fn bounded_write<T, F, Fut>(&self, name: &str, operation: F) -> std::result::Result<T, DbErr>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, DbErr>>,
    {
        match tokio::time::timeout(
            self.write_timeout,
            retry::with_retry(name, self.retry_config, operation),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DbErr::Custom(format!(
                "{} timed out after {}ms",
                name,
                self.write_timeout.as_millis()
            ))),
        }
    }
}
