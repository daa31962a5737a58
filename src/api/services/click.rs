//! `GET /c/{link}`
//!
//! 热路径：任何内部错误都降级为“尽量跳转”，只有结构错误返回 400。

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, web};
use tracing::{debug, error};

use crate::api::middleware::click_over_limit;
use crate::api::state::AppState;
use crate::errors::AfftrackError;
use crate::services::{ClickAction, ClickRequest};
use crate::utils::ip::extract_client_ip;

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// CF-IPCountry / X-Country / X-Geo-Country
fn country_header(req: &HttpRequest) -> Option<String> {
    ["CF-IPCountry", "X-Country", "X-Geo-Country"]
        .iter()
        .find_map(|name| header(req, name))
}

pub fn click_request_from(
    req: &HttpRequest,
    link: String,
    trusted_proxies: &[String],
) -> ClickRequest {
    let query = url::form_urlencoded::parse(req.query_string().as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    ClickRequest {
        raw_link: link,
        ip: extract_client_ip(req, trusted_proxies),
        user_agent: header(req, "User-Agent").unwrap_or_default(),
        referrer: header(req, "Referer"),
        country_header: country_header(req),
        has_accept_language: req.headers().contains_key("Accept-Language"),
        has_accept_encoding: req.headers().contains_key("Accept-Encoding"),
        has_accept: req.headers().contains_key("Accept"),
        query,
        rate_limited: click_over_limit(req),
    }
}

fn plain(status: StatusCode, body: &'static str) -> HttpResponse {
    HttpResponse::build(status)
        .insert_header(("Content-Type", "text/plain; charset=utf-8"))
        .insert_header(("Cache-Control", "no-store"))
        .body(body)
}

pub async fn handle_click(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let click = click_request_from(&req, path.into_inner(), &state.trusted_proxies);

    match state.clicks.record_click(&click).await {
        Ok(outcome) => {
            debug!(
                "Click {} → {} ({:?})",
                click.raw_link, outcome.disposition, outcome.click_id
            );
            match outcome.action {
                ClickAction::Redirect(location) => HttpResponse::Found()
                    .insert_header(("Location", location))
                    .insert_header(("Cache-Control", "no-store"))
                    .finish(),
                ClickAction::Forbidden => plain(StatusCode::FORBIDDEN, "Forbidden"),
                ClickAction::NotFound => plain(StatusCode::NOT_FOUND, "Not Found"),
            }
        }
        Err(AfftrackError::MalformedLink(msg)) => {
            debug!("Malformed link {}: {}", click.raw_link, msg);
            plain(StatusCode::BAD_REQUEST, "Bad Request")
        }
        Err(e) => {
            error!("Click handling failed for {}: {}", click.raw_link, e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn builds_click_request_from_headers() {
        let req = TestRequest::get()
            .uri("/c/abc?sub1=x&utm_source=fb%20ads")
            .insert_header(("User-Agent", "Mozilla/5.0"))
            .insert_header(("Accept-Language", "en"))
            .insert_header(("X-Country", "de"))
            .peer_addr("203.0.113.5:4000".parse().unwrap())
            .to_http_request();

        let click = click_request_from(&req, "abc".into(), &[]);
        assert_eq!(click.raw_link, "abc");
        assert_eq!(click.ip.as_deref(), Some("203.0.113.5"));
        assert_eq!(click.user_agent, "Mozilla/5.0");
        assert_eq!(click.country_header.as_deref(), Some("de"));
        assert!(click.has_accept_language);
        assert!(!click.has_accept_encoding);
        assert!(!click.rate_limited);
        assert_eq!(
            click.query,
            vec![
                ("sub1".to_string(), "x".to_string()),
                ("utm_source".to_string(), "fb ads".to_string())
            ]
        );
    }
}
