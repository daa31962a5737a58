//! 外部 GeoIP API 实现（如 ip-api.com）
//!
//! 同步 ureq 请求放在 spawn_blocking 中执行；moka 缓存结果，
//! `get_with` 保证同一 IP 的并发查询只发一次请求。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{trace, warn};
use ureq::Agent;

use super::provider::{GeoInfo, GeoIpLookup};

const GEOIP_CACHE_TTL_SECS: u64 = 15 * 60;
const GEOIP_CACHE_MAX_CAPACITY: u64 = 10_000;
/// 点击热路径上使用，超时要短
const HTTP_TIMEOUT_MS: u64 = 800;

static HTTP_AGENT: OnceLock<Agent> = OnceLock::new();

fn get_agent() -> &'static Agent {
    HTTP_AGENT.get_or_init(|| {
        Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(HTTP_TIMEOUT_MS)))
            .build()
            .into()
    })
}

/// 解析常见 GeoIP API 的响应字段
///
/// ip-api.com: `{"countryCode": "CN", "city": "Beijing"}`，失败时 `{"status": "fail"}`
fn parse_geo_response(json: &serde_json::Value) -> Option<GeoInfo> {
    if json["status"].as_str() == Some("fail") {
        return None;
    }

    let country = json["countryCode"]
        .as_str()
        .or_else(|| json["country_code"].as_str())
        .map(String::from);
    let city = json["city"].as_str().map(String::from);

    if country.is_none() && city.is_none() {
        return None;
    }
    Some(GeoInfo { country, city })
}

pub struct ExternalApiProvider {
    /// `{ip}` 为占位符
    api_url_template: String,
    /// IP → GeoInfo 缓存（None 用于负缓存）
    cache: Cache<String, Option<GeoInfo>>,
}

impl ExternalApiProvider {
    pub fn new(api_url_template: &str) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(GEOIP_CACHE_TTL_SECS))
            .max_capacity(GEOIP_CACHE_MAX_CAPACITY)
            .build();

        Self {
            api_url_template: api_url_template.to_string(),
            cache,
        }
    }

    fn fetch_sync(url: String) -> Option<GeoInfo> {
        let resp = match get_agent().get(&url).call() {
            Ok(r) => r,
            Err(e) => {
                warn!("GeoIP API request to \"{}\" failed: {}", url, e);
                return None;
            }
        };

        match resp.into_body().read_json::<serde_json::Value>() {
            Ok(json) => parse_geo_response(&json),
            Err(e) => {
                warn!("GeoIP API response from \"{}\" parse failed: {}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl GeoIpLookup for ExternalApiProvider {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let url = self
            .api_url_template
            .replace("{ip}", &urlencoding::encode(ip));

        self.cache
            .get_with(ip.to_string(), async move {
                trace!("GeoIP cache miss for {}, fetching from API", ip);
                tokio::task::spawn_blocking(move || Self::fetch_sync(url))
                    .await
                    .unwrap_or_else(|e| {
                        warn!("GeoIP spawn_blocking failed: {}", e);
                        None
                    })
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ExternalAPI"
    }
}
