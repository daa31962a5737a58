//! HTTP 接口集成测试
//!
//! 点击 → postback → 管理接口，使用临时 SQLite 与完整的服务组装。

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::test::{self, TestRequest};
use actix_web::{App, web};
use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use afftrack::api::AppState;
use afftrack::api::middleware::RequestIdMiddleware;
use afftrack::api::services::{admin_routes, click_routes, health_routes, postback_routes};
use afftrack::config::StaticConfig;
use afftrack::runtime::lifetime::startup::assemble;
use afftrack::services::attribution::postback_signature;
use afftrack::services::webhook::{WebhookRequest, WebhookResponse, WebhookTransport};
use afftrack::storage::backend::SeaOrmStorage;
use afftrack::storage::{GeoMode, GeoScope};

// =============================================================================
// Test Setup
// =============================================================================

const ADMIN_TOKEN: &str = "admin-test-token";
const DESTINATION: &str = "https://shop.example.com/landing?ref=aff";
const TRACKING_CODE: &str = "promo123";
const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

struct OkTransport;

#[async_trait]
impl WebhookTransport for OkTransport {
    async fn send(&self, _request: WebhookRequest) -> anyhow::Result<WebhookResponse> {
        Ok(WebhookResponse {
            status: 200,
            duration: Duration::from_millis(1),
            body_snippet: String::new(),
        })
    }
}

struct TestEnv {
    config: StaticConfig,
    state: AppState,
    storage: Arc<SeaOrmStorage>,
    offer_id: String,
    user_id: String,
    user_offer_id: String,
    _dir: TempDir,
}

fn base_config() -> StaticConfig {
    let mut config = StaticConfig::default();
    config.tracking.link_secret = "integration-secret".into();
    config.geoip.enabled = false;
    config.rate_limit.enabled = false;
    config.admin.token = ADMIN_TOKEN.into();
    config.webhook.enabled = false;
    config
}

async fn setup_with(config: StaticConfig) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tracking_api_test.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let storage = Arc::new(
        SeaOrmStorage::new(&url, "sqlite", &config.database)
            .await
            .unwrap(),
    );

    let user = storage.create_user("promoter").await.unwrap();
    let offer = storage
        .create_offer("adv-1", "Summer sale", DESTINATION, 7.5, "USD")
        .await
        .unwrap();
    let user_offer = storage
        .create_user_offer(&user.id, &offer.id, TRACKING_CODE)
        .await
        .unwrap();

    let ctx = assemble(&config, storage.clone(), Arc::new(OkTransport))
        .await
        .unwrap();

    TestEnv {
        config,
        state: ctx.state,
        storage,
        offer_id: offer.id,
        user_id: user.id,
        user_offer_id: user_offer.id,
        _dir: dir,
    }
}

async fn setup() -> TestEnv {
    setup_with(base_config()).await
}

macro_rules! test_app {
    ($env:expr) => {
        test::init_service(
            App::new()
                .wrap(RequestIdMiddleware)
                .app_data(web::Data::new($env.state.clone()))
                .service(health_routes())
                .service(postback_routes(
                    $env.config.rate_limit.clone(),
                    $env.state.trusted_proxies.clone(),
                ))
                .service(admin_routes($env.config.admin.token.clone()))
                .service(click_routes(
                    $env.config.rate_limit.clone(),
                    $env.state.trusted_proxies.clone(),
                )),
        )
        .await
    };
}

fn click(link: &str, ip: &str) -> TestRequest {
    TestRequest::get()
        .uri(&format!("/c/{}", link))
        .peer_addr(format!("{}:40000", ip).parse().unwrap())
        .insert_header(("User-Agent", BROWSER_UA))
        .insert_header(("Accept", "text/html"))
        .insert_header(("Accept-Language", "en-US,en;q=0.9"))
        .insert_header(("Accept-Encoding", "gzip, br"))
}

fn location(resp: &actix_web::dev::ServiceResponse) -> String {
    resp.headers()
        .get("Location")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn click_id_from(location: &str) -> Option<String> {
    url::Url::parse(location)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "click_id")
        .map(|(_, v)| v.into_owned())
}

fn signed(env: &TestEnv, code: &str) -> String {
    env.state.clicks.signer().sign(code).unwrap()
}

// =============================================================================
// Click endpoint
// =============================================================================

#[actix_rt::test]
async fn test_signed_click_is_recorded_and_redirected() {
    let env = setup().await;
    let app = test_app!(env);

    let link = signed(&env, TRACKING_CODE);
    let req = click(&format!("{}?sub1=spring", link), "198.51.100.7").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers().get("Cache-Control").unwrap(), "no-store");
    assert!(resp.headers().contains_key("X-Request-ID"));

    let location = location(&resp);
    assert!(location.starts_with("https://shop.example.com/landing?ref=aff&sub1=spring&click_id="));
    let click_id = click_id_from(&location).unwrap();

    let stored = env.storage.find_click(&click_id).await.unwrap().unwrap();
    assert_eq!(stored.offer_id, env.offer_id);
    assert_eq!(stored.user_offer_id, env.user_offer_id);
    assert_eq!(stored.link_status, "valid");
    assert_eq!(stored.sub1.as_deref(), Some("spring"));
    assert_eq!(stored.ip.as_deref(), Some("198.51.100.7"));
    assert_eq!(stored.fingerprint.len(), 64);

    let user_offer = env.storage.find_user_offer(&env.user_offer_id).await.unwrap().unwrap();
    assert_eq!(user_offer.total_clicks, 1);
    let offer = env.storage.find_offer(&env.offer_id).await.unwrap().unwrap();
    assert_eq!(offer.total_clicks, 1);
}

#[actix_rt::test]
async fn test_replayed_link_redirects_without_recording() {
    let env = setup().await;
    let app = test_app!(env);
    let link = signed(&env, TRACKING_CODE);

    let first = test::call_service(&app, click(&link, "198.51.100.7").to_request()).await;
    assert!(click_id_from(&location(&first)).is_some());

    // 换一个 IP，指纹不同，但 nonce 已被消费
    let second = test::call_service(&app, click(&link, "198.51.100.8").to_request()).await;
    assert_eq!(second.status(), StatusCode::FOUND);
    assert_eq!(location(&second), DESTINATION);

    let clicks = env
        .storage
        .count_clicks_for_user_offer(&env.user_offer_id)
        .await
        .unwrap();
    assert_eq!(clicks, 1);
}

#[actix_rt::test]
async fn test_tampered_signature_is_not_recorded() {
    let env = setup().await;
    let app = test_app!(env);

    let mut link = signed(&env, TRACKING_CODE);
    let last = link.pop().unwrap();
    link.push(if last == '0' { '1' } else { '0' });

    let resp = test::call_service(&app, click(&link, "198.51.100.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), DESTINATION);
    assert_eq!(
        env.storage
            .count_clicks_for_user_offer(&env.user_offer_id)
            .await
            .unwrap(),
        0
    );
}

#[actix_rt::test]
async fn test_duplicate_fingerprint_is_not_recorded_twice() {
    let env = setup().await;
    let app = test_app!(env);

    let a = signed(&env, TRACKING_CODE);
    let b = signed(&env, TRACKING_CODE);
    let first = test::call_service(&app, click(&a, "198.51.100.7").to_request()).await;
    let second = test::call_service(&app, click(&b, "198.51.100.7").to_request()).await;

    assert!(click_id_from(&location(&first)).is_some());
    assert_eq!(second.status(), StatusCode::FOUND);
    assert!(click_id_from(&location(&second)).is_none());
}

#[actix_rt::test]
async fn test_failed_click_insert_does_not_block_retry() {
    use sea_orm::ConnectionTrait;

    let env = setup().await;
    let app = test_app!(env);
    let db = env.storage.get_db();

    db.execute_unprepared("ALTER TABLE clicks RENAME TO clicks_offline")
        .await
        .unwrap();
    let link = signed(&env, TRACKING_CODE);
    let failed = test::call_service(&app, click(&link, "198.51.100.7").to_request()).await;
    assert_eq!(failed.status(), StatusCode::FOUND);
    assert_eq!(location(&failed), DESTINATION);

    db.execute_unprepared("ALTER TABLE clicks_offline RENAME TO clicks")
        .await
        .unwrap();

    // 同一 IP / UA / 分钟：指纹已被撤销，重试的点击照常记录
    let link = signed(&env, TRACKING_CODE);
    let retried = test::call_service(&app, click(&link, "198.51.100.7").to_request()).await;
    let click_id = click_id_from(&location(&retried)).unwrap();
    assert!(env.storage.find_click(&click_id).await.unwrap().is_some());
}

#[actix_rt::test]
async fn test_legacy_unsigned_link_is_accepted() {
    let env = setup().await;
    let app = test_app!(env);

    let resp = test::call_service(&app, click(TRACKING_CODE, "198.51.100.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let click_id = click_id_from(&location(&resp)).unwrap();
    let stored = env.storage.find_click(&click_id).await.unwrap().unwrap();
    assert_eq!(stored.link_status, "legacy");
}

#[actix_rt::test]
async fn test_malformed_and_unknown_links() {
    let env = setup().await;
    let app = test_app!(env);

    let resp = test::call_service(&app, click("promo123.123", "198.51.100.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let unknown = signed(&env, "nosuchcode");
    let resp = test::call_service(&app, click(&unknown, "198.51.100.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_unknown_code_uses_fallback_when_configured() {
    let mut config = base_config();
    config.tracking.fallback_url = Some("https://fallback.example.com/".into());
    let env = setup_with(config).await;
    let app = test_app!(env);

    let unknown = signed(&env, "nosuchcode");
    let resp = test::call_service(&app, click(&unknown, "198.51.100.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), "https://fallback.example.com/");
}

#[actix_rt::test]
async fn test_geo_blocked_click_is_forbidden() {
    let env = setup().await;
    env.storage
        .create_geo_rule(
            "no-ru",
            GeoScope::Offer,
            Some(&env.offer_id),
            GeoMode::Block,
            &["RU"],
            0,
        )
        .await
        .unwrap();
    let app = test_app!(env);

    let link = signed(&env, TRACKING_CODE);
    let req = click(&link, "198.51.100.7")
        .insert_header(("CF-IPCountry", "ru"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // 其他国家不受影响
    let link = signed(&env, TRACKING_CODE);
    let req = click(&link, "198.51.100.9")
        .insert_header(("CF-IPCountry", "DE"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let click_id = click_id_from(&location(&resp)).unwrap();
    let stored = env.storage.find_click(&click_id).await.unwrap().unwrap();
    assert_eq!(stored.country.as_deref(), Some("DE"));
}

#[actix_rt::test]
async fn test_automation_user_agent_is_blocked() {
    let env = setup().await;
    let app = test_app!(env);

    let link = signed(&env, TRACKING_CODE);
    let req = TestRequest::get()
        .uri(&format!("/c/{}", link))
        .peer_addr("198.51.100.7:40000".parse().unwrap())
        .insert_header(("User-Agent", "curl/8.4.0"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_rt::test]
async fn test_click_over_rate_limit_still_redirects() {
    let mut config = base_config();
    config.rate_limit.enabled = true;
    config.rate_limit.clicks_per_minute = 2;
    let env = setup_with(config).await;
    let app = test_app!(env);

    // 不同 UA，避免指纹去重干扰计数
    let with_ua = |link: &str, ip: &str, n: usize| {
        click(link, ip)
            .insert_header(("User-Agent", format!("{} build/{}", BROWSER_UA, n)))
            .to_request()
    };

    for n in 0..2 {
        let link = signed(&env, TRACKING_CODE);
        let resp = test::call_service(&app, with_ua(&link, "198.51.100.7", n)).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert!(click_id_from(&location(&resp)).is_some());
    }

    let link = signed(&env, TRACKING_CODE);
    let resp = test::call_service(&app, with_ua(&link, "198.51.100.7", 2)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers().get("Cache-Control").unwrap(), "no-store");
    assert_eq!(location(&resp), DESTINATION);

    let clicks = env
        .storage
        .count_clicks_for_user_offer(&env.user_offer_id)
        .await
        .unwrap();
    assert_eq!(clicks, 2);

    // 超限时没有消费 nonce，同一链接稍后仍可用；其他 IP 不受影响
    let resp = test::call_service(&app, with_ua(&link, "198.51.100.20", 3)).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(click_id_from(&location(&resp)).is_some());
}

#[actix_rt::test]
async fn test_expired_link_is_recorded_once_and_flagged() {
    let mut config = base_config();
    config.tracking.link_ttl_secs = 1;
    config.tracking.clock_skew_secs = 0;
    let env = setup_with(config).await;
    let app = test_app!(env);

    let issued_at = chrono::Utc::now().timestamp_millis() - 10_000;
    let link = env
        .state
        .clicks
        .signer()
        .sign_at(TRACKING_CODE, issued_at, "EXPIRED-N1")
        .unwrap();

    let first = test::call_service(&app, click(&link, "198.51.100.7").to_request()).await;
    assert_eq!(first.status(), StatusCode::FOUND);
    let click_id = click_id_from(&location(&first)).unwrap();
    let stored = env.storage.find_click(&click_id).await.unwrap().unwrap();
    assert_eq!(stored.link_status, "expired");

    // 过期后 nonce 仍被占用：换 IP 重放不会产生第二条点击
    let replay = test::call_service(&app, click(&link, "198.51.100.8").to_request()).await;
    assert_eq!(replay.status(), StatusCode::FOUND);
    assert_eq!(location(&replay), DESTINATION);
    assert_eq!(
        env.storage
            .count_clicks_for_user_offer(&env.user_offer_id)
            .await
            .unwrap(),
        1
    );
}

#[actix_rt::test]
async fn test_link_past_replay_window_is_not_recorded() {
    let mut config = base_config();
    config.tracking.link_ttl_secs = 1;
    config.tracking.clock_skew_secs = 0;
    let env = setup_with(config).await;
    let app = test_app!(env);

    // ttl + margin（3600s）之外
    let issued_at = chrono::Utc::now().timestamp_millis() - 3_700_000;
    let link = env
        .state
        .clicks
        .signer()
        .sign_at(TRACKING_CODE, issued_at, "STALE-N1")
        .unwrap();

    let resp = test::call_service(&app, click(&link, "198.51.100.7").to_request()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), DESTINATION);
    assert_eq!(
        env.storage
            .count_clicks_for_user_offer(&env.user_offer_id)
            .await
            .unwrap(),
        0
    );
}

// =============================================================================
// Postback endpoint
// =============================================================================

async fn record_click(env: &TestEnv) -> String {
    let app = test_app!(env);
    let link = signed(env, TRACKING_CODE);
    let resp = test::call_service(&app, click(&link, "198.51.100.50").to_request()).await;
    click_id_from(&location(&resp)).unwrap()
}

fn postback(key: &str, body: Value) -> TestRequest {
    TestRequest::post()
        .uri("/api/postback")
        .insert_header(("X-API-Key", key))
        .set_json(body)
}

#[actix_rt::test]
async fn test_postback_attributes_and_is_idempotent() {
    let env = setup().await;
    let click_id = record_click(&env).await;
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let app = test_app!(env);

    let body = json!({
        "offer_id": env.offer_id,
        "transaction_id": "TX-1001",
        "click_id": click_id,
        "amount": 49.99,
    });
    let resp = test::call_service(&app, postback(&key, body.clone()).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let first: Value = test::read_body_json(resp).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["duplicate"], false);
    assert_eq!(first["data"]["attributed"], true);
    assert_eq!(first["data"]["status"], "pending");

    let resp = test::call_service(&app, postback(&key, body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let second: Value = test::read_body_json(resp).await;
    assert_eq!(second["data"]["duplicate"], true);
    assert_eq!(second["data"]["conversion_id"], first["data"]["conversion_id"]);

    let conversion_id = first["data"]["conversion_id"].as_str().unwrap();
    let stored = env.storage.find_conversion(conversion_id).await.unwrap().unwrap();
    assert_eq!(stored.click_id.as_deref(), Some(click_id.as_str()));
    assert_eq!(stored.user_offer_id.as_deref(), Some(env.user_offer_id.as_str()));
    // commission 默认取 offer payout
    assert_eq!(stored.commission, 7.5);
    assert_eq!(stored.currency, "USD");

    let offer = env.storage.find_offer(&env.offer_id).await.unwrap().unwrap();
    assert_eq!(offer.total_conversions, 1);
}

#[actix_rt::test]
async fn test_postback_without_click_is_unattributed() {
    let env = setup().await;
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let app = test_app!(env);

    let resp = test::call_service(
        &app,
        postback(
            &key,
            json!({ "offer_id": env.offer_id, "tracking_code": TRACKING_CODE, "commission": 3.0 }),
        ).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["attributed"], false);
    assert_eq!(body["data"]["attribution_status"], "unattributed");

    let stored = env
        .storage
        .find_conversion(body["data"]["conversion_id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.external_conversion_id.starts_with("auto_"));
    assert_eq!(stored.user_offer_id.as_deref(), Some(env.user_offer_id.as_str()));
}

#[actix_rt::test]
async fn test_click_outside_attribution_window_is_not_attributed() {
    let mut config = base_config();
    config.attribution.window_days = 0;
    let env = setup_with(config).await;
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let click_id = record_click(&env).await;
    let app = test_app!(env);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let resp = test::call_service(
        &app,
        postback(
            &key,
            json!({ "offer_id": env.offer_id, "transaction_id": "TX-late", "click_id": click_id }),
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["attributed"], false);
    assert_eq!(body["data"]["attribution_status"], "expired");

    let stored = env
        .storage
        .find_conversion(body["data"]["conversion_id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.click_id.is_none());
}

#[actix_rt::test]
async fn test_concurrent_duplicate_postbacks_insert_once() {
    let env = setup().await;
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let click_id = record_click(&env).await;
    let app = test_app!(env);

    let body = json!({
        "offer_id": env.offer_id,
        "transaction_id": "TX-race",
        "click_id": click_id,
        "commission": 2.5,
    });
    let (a, b) = futures_util::future::join(
        test::call_service(&app, postback(&key, body.clone()).to_request()),
        test::call_service(&app, postback(&key, body).to_request()),
    )
    .await;
    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);

    let a: Value = test::read_body_json(a).await;
    let b: Value = test::read_body_json(b).await;
    assert_eq!(a["data"]["conversion_id"], b["data"]["conversion_id"]);
    let duplicates = [&a, &b]
        .iter()
        .filter(|r| r["data"]["duplicate"] == true)
        .count();
    assert_eq!(duplicates, 1);

    let offer = env.storage.find_offer(&env.offer_id).await.unwrap().unwrap();
    assert_eq!(offer.total_conversions, 1);
    let user_offer = env.storage.find_user_offer(&env.user_offer_id).await.unwrap().unwrap();
    assert_eq!(user_offer.total_conversions, 1);
    let user = env.storage.find_user(&env.user_id).await.unwrap().unwrap();
    assert_eq!(user.total_conversions, 1);
}

#[actix_rt::test]
async fn test_postback_authentication_errors() {
    let env = setup().await;
    let (other_key, _) = env.state.api_keys.issue(Some("adv-2"), "other").await.unwrap();
    let app = test_app!(env);
    let body = json!({ "offer_id": env.offer_id, "transaction_id": "TX-1" });

    let req = TestRequest::post()
        .uri("/api/postback")
        .set_json(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["error"]["code"], "INVALID_API_KEY");

    let resp = test::call_service(&app, postback("ak_live_notarealkey00000000000000", body.clone()).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // 绑定其他广告主的 key
    let resp = test::call_service(&app, postback(&other_key, body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(
        &app,
        postback(&other_key, json!({ "offer_id": "missing-offer" })).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_transaction_reused_on_another_offer_conflicts() {
    let env = setup().await;
    let second_offer = env
        .storage
        .create_offer("adv-1", "Winter sale", DESTINATION, 2.0, "USD")
        .await
        .unwrap();
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let app = test_app!(env);

    let resp = test::call_service(
        &app,
        postback(&key, json!({ "offer_id": env.offer_id, "transaction_id": "TX-shared" })).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        postback(&key, json!({ "offer_id": second_offer.id, "transaction_id": "TX-shared" })).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "DUPLICATE_TRANSACTION");
}

#[actix_rt::test]
async fn test_signed_postback_rejects_reused_nonce() {
    let env = setup().await;
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let app = test_app!(env);

    let ts = chrono::Utc::now().timestamp();
    let signature = postback_signature(&key, "adv-1", ts, "nonce-1");
    let signed_body = |tx: &str| {
        json!({
            "offer_id": env.offer_id,
            "advertiser_id": "adv-1",
            "transaction_id": tx,
            "timestamp": ts,
            "nonce": "nonce-1",
            "signature": signature,
        })
    };

    let resp = test::call_service(&app, postback(&key, signed_body("TX-s1")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let first: Value = test::read_body_json(resp).await;

    // 完全相同的重试：返回已有转化，而不是 nonce 重放错误
    let resp = test::call_service(&app, postback(&key, signed_body("TX-s1")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let retry: Value = test::read_body_json(resp).await;
    assert_eq!(retry["data"]["duplicate"], true);
    assert_eq!(retry["data"]["conversion_id"], first["data"]["conversion_id"]);

    let resp = test::call_service(&app, postback(&key, signed_body("TX-s2")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "INVALID_SIGNATURE");

    let mut bad = signed_body("TX-s3");
    bad["nonce"] = json!("nonce-2");
    let resp = test::call_service(&app, postback(&key, bad).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Admin API
// =============================================================================

fn admin(req: TestRequest) -> TestRequest {
    req.insert_header(("Authorization", format!("Bearer {}", ADMIN_TOKEN)))
}

#[actix_rt::test]
async fn test_conversion_lifecycle_through_admin_api() {
    let env = setup().await;
    let click_id = record_click(&env).await;
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let app = test_app!(env);

    let resp = test::call_service(
        &app,
        postback(
            &key,
            json!({ "offer_id": env.offer_id, "transaction_id": "TX-life", "click_id": click_id, "commission": 10.0 }),
        ).to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    let id = body["data"]["conversion_id"].as_str().unwrap().to_string();

    // 未认证
    let req = TestRequest::post()
        .uri(&format!("/api/admin/conversions/{}/approve", id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

    // 不能跳过 approve 直接 pay
    let req = admin(TestRequest::post().uri(&format!("/api/admin/conversions/{}/pay", id))).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    for _ in 0..2 {
        // 重复 approve 为幂等操作
        let req = admin(TestRequest::post().uri(&format!("/api/admin/conversions/{}/approve", id))).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["status"], "approved");
    }

    let user = env.storage.find_user(&env.user_id).await.unwrap().unwrap();
    assert_eq!(user.total_earnings, 10.0);
    assert_eq!(user.total_conversions, 1);

    let req = admin(TestRequest::post().uri(&format!("/api/admin/conversions/{}/pay", id))).to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["data"]["status"], "paid");
    assert!(!body["data"]["paid_at"].is_null());

    let req = admin(
        TestRequest::post()
            .uri(&format!("/api/admin/conversions/{}/reject", id))
            .set_json(json!({ "reason": "fraud" })),
    ).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "INVALID_STATE_TRANSITION");

    let req = admin(TestRequest::get().uri("/api/admin/conversions/does-not-exist")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_reject_records_reason() {
    let env = setup().await;
    let (key, _) = env.state.api_keys.issue(Some("adv-1"), "test").await.unwrap();
    let app = test_app!(env);

    let resp = test::call_service(
        &app,
        postback(&key, json!({ "offer_id": env.offer_id, "transaction_id": "TX-rej" })).to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    let id = body["data"]["conversion_id"].as_str().unwrap().to_string();

    let req = admin(
        TestRequest::post()
            .uri(&format!("/api/admin/conversions/{}/reject", id))
            .set_json(json!({ "reason": "chargeback" })),
    ).to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["rejection_reason"], "chargeback");
}

#[actix_rt::test]
async fn test_admin_api_disabled_without_token() {
    let mut config = base_config();
    config.admin.token = String::new();
    let env = setup_with(config).await;
    let app = test_app!(env);

    let req = TestRequest::get()
        .uri("/api/admin/webhooks/dlq")
        .insert_header(("Authorization", "Bearer anything"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn test_admin_webhook_listings_are_empty() {
    let env = setup().await;
    let app = test_app!(env);

    let req = admin(TestRequest::get().uri("/api/admin/webhooks/executions?page=1&page_size=10")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["total"], 0);

    let req = admin(TestRequest::get().uri("/api/admin/webhooks/dlq")).to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["data"]["items"], json!([]));

    let req = admin(TestRequest::post().uri("/api/admin/webhooks/dlq/missing/replay")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Health
// =============================================================================

#[actix_rt::test]
async fn test_health_reports_database() {
    let env = setup().await;
    let app = test_app!(env);

    let req = TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["database"]["backend"], "sqlite");
    assert_eq!(body["data"]["dead_letters"], 0);
}
