//! GeoIP Provider 抽象层
//!
//! 根据配置选择实现：
//! 1. `geoip.enabled = false` → 不查询
//! 2. maxminddb_path 可读 → MaxMindProvider
//! 3. `use_external_api = true` → ExternalApiProvider
//! 4. 其余情况不查询，国家未知（所有 geo 规则放行）

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::external_api::ExternalApiProvider;
use super::maxmind::MaxMindProvider;
use crate::config::GeoIpConfig;

/// 地理位置信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    /// ISO 3166-1 alpha-2 国家代码 (e.g., "CN", "US")
    pub country: Option<String>,
    pub city: Option<String>,
}

/// GeoIP 查询 trait
#[async_trait]
pub trait GeoIpLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo>;

    fn name(&self) -> &'static str;
}

/// 关闭状态
struct DisabledLookup;

#[async_trait]
impl GeoIpLookup for DisabledLookup {
    async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
        None
    }

    fn name(&self) -> &'static str {
        "Disabled"
    }
}

/// 统一 GeoIP Provider
#[derive(Clone)]
pub struct GeoIpProvider {
    inner: Arc<dyn GeoIpLookup>,
}

impl GeoIpProvider {
    pub fn new(config: &GeoIpConfig) -> Self {
        let inner: Arc<dyn GeoIpLookup> = if !config.enabled {
            Arc::new(DisabledLookup)
        } else if let Some(ref path) = config.maxminddb_path {
            match MaxMindProvider::new(path) {
                Ok(provider) => {
                    info!("GeoIP: Using MaxMind database at {}", path);
                    Arc::new(provider)
                }
                Err(e) if config.use_external_api => {
                    warn!(
                        "GeoIP: Failed to load MaxMind database at {}: {}, falling back to external API",
                        path, e
                    );
                    Arc::new(ExternalApiProvider::new(&config.api_url))
                }
                Err(e) => {
                    warn!("GeoIP: Failed to load MaxMind database at {}: {}", path, e);
                    Arc::new(DisabledLookup)
                }
            }
        } else if config.use_external_api {
            debug!("GeoIP: No MaxMind database configured, using external API");
            Arc::new(ExternalApiProvider::new(&config.api_url))
        } else {
            Arc::new(DisabledLookup)
        };

        info!("GeoIP: Initialized with {} provider", inner.name());
        Self { inner }
    }

    /// 使用自定义实现（测试替身等）
    pub fn from_lookup(inner: Arc<dyn GeoIpLookup>) -> Self {
        Self { inner }
    }

    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(DisabledLookup),
        }
    }

    /// 查询 IP，国家代码统一为大写
    pub async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let mut info = self.inner.lookup(ip).await?;
        info.country = info
            .country
            .map(|c| c.trim().to_uppercase())
            .filter(|c| c.len() == 2);
        Some(info)
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}
