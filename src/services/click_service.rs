//! Click recorder
//!
//! 链路：签名校验 → 防重放 → geo 规则 → bot 评分 → 指纹去重 → 写入 → 重定向。
//! 除 geo / bot 拦截外，每条路径都以重定向结束；写入失败不影响重定向。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::{StaticConfig, TrackingConfig};
use crate::errors::Result;
use crate::services::geoip::GeoIpProvider;
use crate::services::link_signing::{LinkReason, LinkSigner, LinkValidation};
use crate::services::policy::{BotPolicy, BotSignals, GeoPolicy};
use crate::services::replay_guard::ReplayGuard;
use crate::services::webhook::{EventSink, WebhookEvent};
use crate::storage::{FraudKind, LinkStatus, NewClick, NewFraudEvent, SeaOrmStorage, TrackingTarget, TriggerType};
use crate::utils::hashing::sha256_hex;
use crate::utils::ip::is_private_or_local;
use crate::utils::user_agent::parse_user_agent;

use migration::entities::click;

const TARGET_CACHE_TTL_SECS: u64 = 30;
const TARGET_CACHE_CAPACITY: u64 = 50_000;
/// nonce 在链接过期后继续保留的时间
const REPLAY_MARGIN_SECS: u64 = 3600;

/// 点击请求上下文（由 HTTP 层提取）
#[derive(Debug, Clone, Default)]
pub struct ClickRequest {
    pub raw_link: String,
    pub ip: Option<String>,
    pub user_agent: String,
    pub referrer: Option<String>,
    /// CF-IPCountry / X-Country 等头里的国家
    pub country_header: Option<String>,
    pub has_accept_language: bool,
    pub has_accept_encoding: bool,
    pub has_accept: bool,
    /// 原始查询参数，按顺序追加到目标 URL
    pub query: Vec<(String, String)>,
    /// 超出按 IP 的点击限额：照常跳转，不记录
    pub rate_limited: bool,
}

impl ClickRequest {
    fn query_value(&self, key: &str) -> Option<String> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    Redirect(String),
    Forbidden,
    NotFound,
}

/// 点击的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ClickDisposition {
    Recorded,
    /// 已过期但签名正确，记录并标记
    RecordedExpired,
    Duplicate,
    Replay,
    /// 过期太久，nonce 已不在防重放窗口内
    StaleLink,
    RateLimited,
    InvalidSignature,
    GeoBlocked,
    BotBlocked,
    UnknownCode,
    PersistFailed,
}

#[derive(Debug, Clone)]
pub struct ClickOutcome {
    pub action: ClickAction,
    pub disposition: ClickDisposition,
    pub click_id: Option<String>,
}

pub struct ClickService {
    storage: Arc<SeaOrmStorage>,
    signer: LinkSigner,
    replay_guard: Arc<ReplayGuard>,
    geo_policy: GeoPolicy,
    bot_policy: BotPolicy,
    geoip: Arc<GeoIpProvider>,
    events: Arc<dyn EventSink>,
    config: TrackingConfig,
    targets: Cache<String, Option<TrackingTarget>>,
}

impl ClickService {
    pub fn new(
        config: &StaticConfig,
        storage: Arc<SeaOrmStorage>,
        replay_guard: Arc<ReplayGuard>,
        geoip: Arc<GeoIpProvider>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        if config.tracking.link_secret.is_empty() {
            warn!("tracking.link_secret is empty: signed links will be rejected");
        }

        Self {
            signer: LinkSigner::from_config(&config.tracking),
            geo_policy: GeoPolicy::new(storage.clone()),
            bot_policy: BotPolicy::new(&config.bot),
            storage,
            replay_guard,
            geoip,
            events,
            config: config.tracking.clone(),
            targets: Cache::builder()
                .time_to_live(Duration::from_secs(TARGET_CACHE_TTL_SECS))
                .max_capacity(TARGET_CACHE_CAPACITY)
                .build(),
        }
    }

    pub fn signer(&self) -> &LinkSigner {
        &self.signer
    }

    pub fn geo_policy(&self) -> &GeoPolicy {
        &self.geo_policy
    }

    async fn resolve_target(&self, code: &str) -> Result<Option<TrackingTarget>> {
        if let Some(hit) = self.targets.get(code).await {
            return Ok(hit);
        }
        let target = self.storage.resolve_tracking_code(code).await?;
        self.targets.insert(code.to_string(), target.clone()).await;
        Ok(target)
    }

    /// 结构错误返回 `MalformedLink`，其余情况都返回处理结果
    #[instrument(skip(self, req), fields(link = %req.raw_link))]
    pub async fn record_click(&self, req: &ClickRequest) -> Result<ClickOutcome> {
        // 1. 签名
        let validation = self.signer.validate(&req.raw_link)?;

        let target = match self.resolve_target(&validation.tracking_code).await {
            Ok(Some(t)) if t.active => t,
            Ok(_) => {
                debug!("Unknown or inactive tracking code {}", validation.tracking_code);
                return Ok(self.fallback_or(ClickAction::NotFound, ClickDisposition::UnknownCode));
            }
            Err(e) => {
                warn!("Tracking code lookup failed for {}: {}", validation.tracking_code, e);
                return Ok(self.fallback_or(ClickAction::NotFound, ClickDisposition::UnknownCode));
            }
        };

        if !validation.is_authentic() {
            self.report_fraud(
                FraudKind::InvalidSignature,
                req,
                &target,
                json!({ "reason": validation.reason }),
            );
            return Ok(self.redirect_without_click(req, &target, ClickDisposition::InvalidSignature));
        }

        if req.rate_limited {
            debug!("Click rate limit exceeded for {:?}", req.ip);
            return Ok(self.redirect_without_click(req, &target, ClickDisposition::RateLimited));
        }

        // 2. 防重放：nonce 保留到 issued_at + ttl + skew + margin
        if let Some(nonce) = &validation.nonce {
            let Some(ttl) = self.replay_ttl(&validation, Utc::now().timestamp_millis()) else {
                debug!(
                    "Link for {} is past the replay window, not recording",
                    validation.tracking_code
                );
                return Ok(self.redirect_without_click(req, &target, ClickDisposition::StaleLink));
            };
            let reservation = self
                .replay_guard
                .check_and_reserve(&validation.tracking_code, nonce, ttl)
                .await;
            if reservation.is_duplicate() {
                self.report_fraud(FraudKind::Replay, req, &target, json!({ "nonce": nonce }));
                return Ok(self.redirect_without_click(req, &target, ClickDisposition::Replay));
            }
        }

        // 3. geo
        let (country, city) = self.locate(req).await;
        let geo = self
            .geo_policy
            .check(&target.offer_id, &target.advertiser_id, country.as_deref())
            .await;
        if !geo.allowed {
            self.report_fraud(
                FraudKind::GeoBlocked,
                req,
                &target,
                json!({ "country": country, "rule_id": geo.rule_id, "reason": geo.reason }),
            );
            return Ok(self.fallback_or(ClickAction::Forbidden, ClickDisposition::GeoBlocked));
        }

        // 4. bot
        let verdict = self.bot_policy.evaluate(&BotSignals {
            user_agent: &req.user_agent,
            ip: req.ip.as_deref(),
            has_accept_language: req.has_accept_language,
            has_accept_encoding: req.has_accept_encoding,
            has_accept: req.has_accept,
        });
        if verdict.block {
            self.report_fraud(
                FraudKind::BotBlocked,
                req,
                &target,
                json!({ "score": verdict.score, "confidence": verdict.confidence, "reasons": verdict.reasons }),
            );
            return Ok(ClickOutcome {
                action: ClickAction::Forbidden,
                disposition: ClickDisposition::BotBlocked,
                click_id: None,
            });
        }
        if verdict.is_bot {
            debug!(
                "Suspicious click on {} (score {}), recording anyway",
                target.tracking_code, verdict.score
            );
        }

        // 5. 指纹去重
        let fingerprint = click_fingerprint(
            req.ip.as_deref().unwrap_or(""),
            &req.user_agent,
            &target.offer_id,
            Utc::now().timestamp(),
        );
        let window = Duration::from_secs(self.config.dedup_window_secs.max(1));
        if self
            .replay_guard
            .reserve_fingerprint(&fingerprint, window)
            .await
            .is_duplicate()
        {
            debug!("Duplicate click fingerprint for {}", target.tracking_code);
            return Ok(self.redirect_without_click(req, &target, ClickDisposition::Duplicate));
        }

        // 6. 写入 + 事件
        let link_status = link_status(&validation);
        let ua = parse_user_agent(&req.user_agent);
        let new_click = NewClick {
            offer_id: target.offer_id.clone(),
            user_offer_id: target.user_offer_id.clone(),
            user_id: target.user_id.clone(),
            ip: if self.config.store_ip { req.ip.clone() } else { None },
            user_agent: Some(req.user_agent.clone()).filter(|s| !s.is_empty()),
            device: ua.device,
            browser: ua.browser,
            os: ua.os,
            country,
            city,
            referrer: req.referrer.clone(),
            sub1: req.query_value("sub1"),
            sub2: req.query_value("sub2"),
            sub3: req.query_value("sub3"),
            fingerprint,
            link_status: link_status.to_string(),
        };

        let click_id = uuid::Uuid::new_v4().to_string();
        match self.storage.insert_click(&click_id, &new_click).await {
            Ok(model) => {
                info!(
                    "Click {} recorded for {} ({})",
                    model.id, target.tracking_code, link_status
                );
                self.events.emit(click_event(&model, &target));
                let disposition = if link_status == LinkStatus::Expired {
                    ClickDisposition::RecordedExpired
                } else {
                    ClickDisposition::Recorded
                };
                Ok(ClickOutcome {
                    action: ClickAction::Redirect(self.build_redirect(
                        &target.destination_url,
                        &req.query,
                        Some(&model.id),
                    )),
                    disposition,
                    click_id: Some(model.id),
                })
            }
            Err(e) => {
                warn!(
                    "Failed to persist click for {}: {}; redirecting anyway",
                    target.tracking_code, e
                );
                self.replay_guard
                    .release_fingerprint(&new_click.fingerprint)
                    .await;
                Ok(self.redirect_without_click(req, &target, ClickDisposition::PersistFailed))
            }
        }
    }

    /// nonce 的保留时长；超出防重放窗口的链接返回 `None`
    fn replay_ttl(&self, validation: &LinkValidation, now_ms: i64) -> Option<Duration> {
        let horizon_secs = self
            .config
            .link_ttl_secs
            .saturating_add(self.config.clock_skew_secs)
            .saturating_add(REPLAY_MARGIN_SECS);
        let issued_at_ms = validation.issued_at_ms.unwrap_or(now_ms);
        let expires_ms = issued_at_ms.saturating_add((horizon_secs as i64).saturating_mul(1000));
        let remaining_ms = expires_ms.saturating_sub(now_ms);
        (remaining_ms > 0).then(|| Duration::from_millis(remaining_ms as u64))
    }

    /// 国家与城市：请求头优先，其次 GeoIP（仅公网 IP）
    async fn locate(&self, req: &ClickRequest) -> (Option<String>, Option<String>) {
        let header_country = req
            .country_header
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| c.len() == 2 && c != "XX" && c != "T1");

        let public_ip = req.ip.as_deref().filter(|ip| {
            ip.parse::<std::net::IpAddr>()
                .map(|addr| !is_private_or_local(&addr))
                .unwrap_or(false)
        });

        match (header_country, public_ip) {
            (Some(country), _) => (Some(country), None),
            (None, Some(ip)) => match self.geoip.lookup(ip).await {
                Some(info) => (info.country, info.city),
                None => (None, None),
            },
            (None, None) => (None, None),
        }
    }

    fn fallback_or(&self, otherwise: ClickAction, disposition: ClickDisposition) -> ClickOutcome {
        let action = match self.config.fallback_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => ClickAction::Redirect(url.to_string()),
            None => otherwise,
        };
        ClickOutcome {
            action,
            disposition,
            click_id: None,
        }
    }

    fn redirect_without_click(
        &self,
        req: &ClickRequest,
        target: &TrackingTarget,
        disposition: ClickDisposition,
    ) -> ClickOutcome {
        ClickOutcome {
            action: ClickAction::Redirect(self.build_redirect(
                &target.destination_url,
                &req.query,
                None,
            )),
            disposition,
            click_id: None,
        }
    }

    /// 目标 URL + 入站查询参数 + click id
    pub fn build_redirect(
        &self,
        destination: &str,
        query: &[(String, String)],
        click_id: Option<&str>,
    ) -> String {
        let Ok(mut url) = url::Url::parse(destination) else {
            warn!("Offer destination is not a valid URL: {}", destination);
            return destination.to_string();
        };

        let click_param = self.config.click_id_param.as_str();
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                if !click_param.is_empty() && k == click_param {
                    continue;
                }
                pairs.append_pair(k, v);
            }
            if let Some(id) = click_id
                && !click_param.is_empty()
            {
                pairs.append_pair(click_param, id);
            }
        }
        // 没有任何参数时去掉多余的 '?'
        if url.query() == Some("") {
            url.set_query(None);
        }
        url.to_string()
    }

    /// 欺诈事件：后台写库 + webhook 事件，不阻塞重定向
    fn report_fraud(
        &self,
        kind: FraudKind,
        req: &ClickRequest,
        target: &TrackingTarget,
        details: serde_json::Value,
    ) {
        warn!(
            kind = %kind,
            ip = req.ip.as_deref().unwrap_or("-"),
            tracking_code = %target.tracking_code,
            "Fraud indicator on click"
        );

        let event = NewFraudEvent {
            kind: kind.to_string(),
            ip: req.ip.clone(),
            user_agent: Some(req.user_agent.clone()).filter(|s| !s.is_empty()),
            tracking_code: Some(target.tracking_code.clone()),
            offer_id: Some(target.offer_id.clone()),
            details: Some(details.clone()),
        };

        self.events.emit(
            WebhookEvent::new(TriggerType::Fraud)
                .for_offer(&target.offer_id, &target.advertiser_id)
                .with(
                    "fraud",
                    json!({
                        "kind": kind,
                        "ip": req.ip,
                        "user_agent": req.user_agent,
                        "tracking_code": target.tracking_code,
                        "offer_id": target.offer_id,
                        "details": details,
                        "detected_at": Utc::now().to_rfc3339(),
                    }),
                )
                .with("offer", offer_json(target)),
        );

        let storage = self.storage.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.insert_fraud_event(&event).await {
                warn!("Failed to persist fraud event {}: {}", event.kind, e);
            }
        });
    }
}

fn link_status(validation: &LinkValidation) -> LinkStatus {
    match validation.reason {
        LinkReason::Legacy => LinkStatus::Legacy,
        LinkReason::Expired => LinkStatus::Expired,
        _ => LinkStatus::Valid,
    }
}

/// sha256(ip|ua|offer|minute)
pub fn click_fingerprint(ip: &str, user_agent: &str, offer_id: &str, epoch_secs: i64) -> String {
    let minute = epoch_secs.div_euclid(60);
    sha256_hex(format!("{}|{}|{}|{}", ip, user_agent, offer_id, minute).as_bytes())
}

fn offer_json(target: &TrackingTarget) -> serde_json::Value {
    json!({
        "id": target.offer_id,
        "advertiser_id": target.advertiser_id,
        "destination_url": target.destination_url,
        "payout": target.payout,
        "currency": target.currency,
    })
}

fn click_event(model: &click::Model, target: &TrackingTarget) -> WebhookEvent {
    WebhookEvent::new(TriggerType::Click)
        .for_offer(&target.offer_id, &target.advertiser_id)
        .correlated(&model.id)
        .with(
            "click",
            json!({
                "id": model.id,
                "offer_id": model.offer_id,
                "user_offer_id": model.user_offer_id,
                "tracking_code": target.tracking_code,
                "ip": model.ip,
                "user_agent": model.user_agent,
                "device": model.device,
                "browser": model.browser,
                "os": model.os,
                "country": model.country,
                "city": model.city,
                "referrer": model.referrer,
                "sub1": model.sub1,
                "sub2": model.sub2,
                "sub3": model.sub3,
                "link_status": model.link_status,
                "clicked_at": model.clicked_at.to_rfc3339(),
            }),
        )
        .with("offer", offer_json(target))
        .with(
            "user_offer",
            json!({
                "id": target.user_offer_id,
                "user_id": target.user_id,
                "tracking_code": target.tracking_code,
            }),
        )
}
