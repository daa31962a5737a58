//! Per-IP / per-API-key rate limiting (actix-governor)

use std::sync::Arc;
use std::time::Duration;

use actix_governor::{
    Governor, GovernorConfigBuilder, GovernorResult, KeyExtractor, SimpleKeyExtractionError,
};
use actix_web::dev::ServiceRequest;
use actix_web::http::StatusCode;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, HttpResponseBuilder};
use governor::NotUntil;
use governor::clock::{Clock, DefaultClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use tracing::debug;

use crate::api::response::{ApiError, ApiResponse};
use crate::utils::hashing::sha256_hex;
use crate::utils::ip::{extract_client_ip_from_conn_info, extract_forwarded_ip_from_headers};

fn rate_limited(
    negative: &NotUntil<QuantaInstant>,
    mut response: HttpResponseBuilder,
) -> HttpResponse {
    let wait = negative.wait_time_from(DefaultClock::default().now());
    response
        .status(StatusCode::TOO_MANY_REQUESTS)
        .insert_header(("Retry-After", wait.as_secs().max(1).to_string()))
        .json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                code: "RATE_LIMITED".to_string(),
                message: format!("too many requests, retry in {}s", wait.as_secs().max(1)),
            }),
        })
}

fn client_key(req: &ServiceRequest, trusted_proxies: &[String]) -> Option<String> {
    extract_client_ip_from_conn_info(&req.connection_info(), trusted_proxies, || {
        extract_forwarded_ip_from_headers(req.headers())
    })
}

/// 点击接口：按客户端 IP
#[derive(Clone)]
pub struct ClientIpKeyExtractor {
    trusted_proxies: Arc<Vec<String>>,
}

impl ClientIpKeyExtractor {
    pub fn new(trusted_proxies: Arc<Vec<String>>) -> Self {
        Self { trusted_proxies }
    }
}

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = String;
    type KeyExtractionError = SimpleKeyExtractionError<&'static str>;

    fn extract(&self, req: &ServiceRequest) -> Result<Self::Key, Self::KeyExtractionError> {
        client_key(req, &self.trusted_proxies)
            .ok_or_else(|| SimpleKeyExtractionError::new("Unable to extract client IP"))
    }
}

/// postback 接口：按 API key（取哈希，避免明文 key 常驻内存），缺失时退回 IP
#[derive(Clone)]
pub struct ApiKeyExtractor {
    trusted_proxies: Arc<Vec<String>>,
}

impl ApiKeyExtractor {
    pub fn new(trusted_proxies: Arc<Vec<String>>) -> Self {
        Self { trusted_proxies }
    }
}

pub fn api_key_from_headers(headers: &actix_web::http::header::HeaderMap) -> Option<String> {
    headers
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| {
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|k| !k.is_empty())
        })
        .map(String::from)
}

impl KeyExtractor for ApiKeyExtractor {
    type Key = String;
    type KeyExtractionError = SimpleKeyExtractionError<&'static str>;

    fn extract(&self, req: &ServiceRequest) -> Result<Self::Key, Self::KeyExtractionError> {
        if let Some(key) = api_key_from_headers(req.headers()) {
            return Ok(format!("key:{}", sha256_hex(key.as_bytes())));
        }
        client_key(req, &self.trusted_proxies)
            .map(|ip| format!("ip:{}", ip))
            .ok_or_else(|| SimpleKeyExtractionError::new("Unable to extract API key or client IP"))
    }

    fn exceed_rate_limit_response(
        &self,
        negative: &NotUntil<QuantaInstant>,
        response: HttpResponseBuilder,
    ) -> HttpResponse {
        rate_limited(negative, response)
    }
}

/// `permissive` 时超限请求照常放行，结果写进请求扩展
fn per_minute<K: KeyExtractor>(
    per_minute: u32,
    extractor: K,
    permissive: bool,
) -> Governor<K, NoOpMiddleware> {
    let per_minute = per_minute.clamp(1, 60_000);
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_millis(60_000 / per_minute as u64))
        .burst_size(per_minute)
        .key_extractor(extractor)
        .permissive(permissive)
        .finish()
        .expect("period and burst size are non-zero");
    debug!(
        "Rate limiter created: {} req/min (permissive: {})",
        per_minute, permissive
    );
    Governor::new(&config)
}

/// 点击限流不拦截请求：超限的点击照样跳转，由 handler 决定不计数
pub fn click_rate_limiter(
    clicks_per_minute: u32,
    trusted_proxies: Arc<Vec<String>>,
) -> Governor<ClientIpKeyExtractor, NoOpMiddleware> {
    per_minute(
        clicks_per_minute,
        ClientIpKeyExtractor::new(trusted_proxies),
        true,
    )
}

pub fn postback_rate_limiter(
    postbacks_per_minute: u32,
    trusted_proxies: Arc<Vec<String>>,
) -> Governor<ApiKeyExtractor, NoOpMiddleware> {
    per_minute(
        postbacks_per_minute,
        ApiKeyExtractor::new(trusted_proxies),
        false,
    )
}

/// 当前点击是否超出了按 IP 的限额（未挂限流时为 false）
pub fn click_over_limit(req: &HttpRequest) -> bool {
    matches!(
        req.extensions()
            .get::<GovernorResult<SimpleKeyExtractionError<&'static str>>>(),
        Some(GovernorResult::Wait { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn api_key_header_precedence() {
        let req = TestRequest::default()
            .insert_header(("X-API-Key", "ak_live_a"))
            .insert_header(("Authorization", "Bearer ak_live_b"))
            .to_http_request();
        assert_eq!(api_key_from_headers(req.headers()).as_deref(), Some("ak_live_a"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer ak_live_b"))
            .to_http_request();
        assert_eq!(api_key_from_headers(req.headers()).as_deref(), Some("ak_live_b"));

        let req = TestRequest::default().to_http_request();
        assert!(api_key_from_headers(req.headers()).is_none());
    }

    #[test]
    fn click_over_limit_reads_governor_verdict() {
        let req = TestRequest::default().to_http_request();
        assert!(!click_over_limit(&req));

        req.extensions_mut()
            .insert(GovernorResult::<SimpleKeyExtractionError<&'static str>>::Ok {
                burst_size: Some(1),
                remaining: Some(0),
            });
        assert!(!click_over_limit(&req));

        req.extensions_mut()
            .insert(GovernorResult::<SimpleKeyExtractionError<&'static str>>::Wait {
                burst_size: Some(1),
                wait: 2,
            });
        assert!(click_over_limit(&req));
    }
}
