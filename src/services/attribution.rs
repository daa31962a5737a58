//! Attribution matcher
//!
//! postback → 校验调用方与签名 → 幂等检查 → 归因到点击 → 写入转化（计数器同事务）→ 事件。
//! 重复 postback 返回原转化，不写新行、不发事件。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::AttributionConfig;
use crate::errors::{AfftrackError, Result};
use crate::services::api_keys::AuthenticatedKey;
use crate::services::replay_guard::ReplayGuard;
use crate::services::webhook::{EventSink, WebhookEvent};
use crate::storage::{
    AttributionStatus, Conversion, ConversionInsert, ConversionStatus, NewConversion,
    SeaOrmStorage, TriggerType,
};
use crate::utils::hashing::{hex_signatures_match, hmac_sha256_hex};

use migration::entities::{conversion, offer};

const MAX_ID_LEN: usize = 200;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PostbackRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub advertiser_id: Option<String>,
    #[serde(default)]
    pub offer_id: String,
    #[serde(default, alias = "external_id")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub click_id: Option<String>,
    #[serde(default)]
    pub tracking_code: Option<String>,
    #[serde(default)]
    pub user_offer_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub commission: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl PostbackRequest {
    fn validate(&self) -> Result<()> {
        if self.offer_id.trim().is_empty() {
            return Err(AfftrackError::validation("offer_id is required"));
        }
        let ids = [
            ("offer_id", Some(&self.offer_id)),
            ("advertiser_id", self.advertiser_id.as_ref()),
            ("transaction_id", self.transaction_id.as_ref()),
            ("click_id", self.click_id.as_ref()),
            ("tracking_code", self.tracking_code.as_ref()),
            ("user_offer_id", self.user_offer_id.as_ref()),
            ("nonce", self.nonce.as_ref()),
        ];
        for (name, value) in ids {
            if let Some(v) = value
                && v.len() > MAX_ID_LEN
            {
                return Err(AfftrackError::validation(format!("{} is too long", name)));
            }
        }
        for (name, value) in [("amount", self.amount), ("commission", self.commission)] {
            if let Some(v) = value
                && (!v.is_finite() || v < 0.0)
            {
                return Err(AfftrackError::validation(format!(
                    "{} must be a non-negative number",
                    name
                )));
            }
        }
        if let Some(currency) = &self.currency
            && (currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(AfftrackError::validation("currency must be a 3-letter code"));
        }
        Ok(())
    }
}

/// postback 的处理结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionReceipt {
    pub conversion_id: String,
    pub duplicate: bool,
    pub attributed: bool,
    pub attribution_status: String,
    pub status: String,
}

impl ConversionReceipt {
    fn from_model(model: &conversion::Model, duplicate: bool) -> Self {
        Self {
            conversion_id: model.id.clone(),
            duplicate,
            attributed: model.click_id.is_some(),
            attribution_status: model.attribution_status.clone(),
            status: model.status.clone(),
        }
    }
}

/// 秒或毫秒时间戳统一为毫秒
fn normalize_timestamp_ms(ts: i64) -> i64 {
    if ts.abs() < 100_000_000_000 { ts * 1000 } else { ts }
}

/// hex(HMAC-SHA256(api_key, "api_key|advertiser_id|timestamp|nonce"))
pub fn postback_signature(api_key: &str, advertiser_id: &str, timestamp: i64, nonce: &str) -> String {
    let payload = format!("{}|{}|{}|{}", api_key, advertiser_id, timestamp, nonce);
    hmac_sha256_hex(api_key.as_bytes(), payload.as_bytes())
}

pub struct AttributionService {
    storage: Arc<SeaOrmStorage>,
    replay_guard: Arc<ReplayGuard>,
    events: Arc<dyn EventSink>,
    config: AttributionConfig,
}

impl AttributionService {
    pub fn new(
        config: &AttributionConfig,
        storage: Arc<SeaOrmStorage>,
        replay_guard: Arc<ReplayGuard>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            storage,
            replay_guard,
            events,
            config: config.clone(),
        }
    }

    #[instrument(skip(self, key, req), fields(offer = %req.offer_id, key = %key.id))]
    pub async fn record_conversion(
        &self,
        key: &AuthenticatedKey,
        req: &PostbackRequest,
    ) -> Result<ConversionReceipt> {
        req.validate()?;

        if let Some(body_key) = req.api_key.as_deref().filter(|k| !k.is_empty())
            && body_key != key.secret
        {
            return Err(AfftrackError::invalid_api_key(
                "api_key in body does not match the authenticated key",
            ));
        }

        // nonce 在确认不是重复交易之后才占用，同一请求的重试仍是幂等的
        let signed_nonce = self.verify_signature(key, req)?;

        let offer = self
            .storage
            .find_offer(&req.offer_id)
            .await?
            .ok_or_else(|| AfftrackError::not_found(format!("offer {} not found", req.offer_id)))?;

        if let Some(owner) = key.advertiser_id.as_deref()
            && owner != offer.advertiser_id
        {
            return Err(AfftrackError::forbidden("API key cannot post for this offer"));
        }
        if let Some(claimed) = req.advertiser_id.as_deref().filter(|a| !a.is_empty())
            && claimed != offer.advertiser_id
        {
            return Err(AfftrackError::forbidden("advertiser_id does not own this offer"));
        }

        let external_id = match req.transaction_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("auto_{}", uuid::Uuid::new_v4()),
        };

        if let Some(existing) = self.storage.find_conversion_by_external_id(&external_id).await? {
            return self.duplicate_receipt(&existing, &offer);
        }

        if let Some(nonce) = signed_nonce
            && !self.reserve_nonce(key, nonce).await
        {
            // 并发的相同重试：对方已写入时按重复处理
            if let Some(existing) = self.storage.find_conversion_by_external_id(&external_id).await? {
                return self.duplicate_receipt(&existing, &offer);
            }
            warn!(key = %key.id, nonce = %nonce, "Postback nonce replayed");
            return Err(AfftrackError::replay_detected("nonce already used"));
        }

        let now = Utc::now();
        let (click_id, attribution_status, click_user_offer) =
            self.attribute(req.click_id.as_deref(), &offer.id, now).await?;

        let user_offer_id = match click_user_offer {
            Some(id) => Some(id),
            None => self.resolve_user_offer(req, &offer.id).await?,
        };
        let user_id = match &user_offer_id {
            Some(id) => self.storage.find_user_offer(id).await?.map(|uo| uo.user_id),
            None => None,
        };

        let new = NewConversion {
            click_id,
            user_offer_id,
            user_id,
            offer_id: offer.id.clone(),
            external_conversion_id: external_id,
            amount: req.amount.unwrap_or(0.0),
            commission: req.commission.unwrap_or(offer.payout),
            currency: req
                .currency
                .as_deref()
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| self.config.default_currency.clone()),
            attribution_status,
            postback_status: req.status.clone(),
            postback_data: serde_json::to_string(&redacted(req)).ok(),
            converted_at: now,
        };

        match self.storage.insert_conversion(&new).await? {
            ConversionInsert::Created(model) => {
                info!(
                    "Conversion {} recorded for offer {} ({})",
                    model.id, offer.id, model.attribution_status
                );
                self.emit_events(&model, &offer, req);
                Ok(ConversionReceipt::from_model(&model, false))
            }
            ConversionInsert::AlreadyExists(existing) => self.duplicate_receipt(&existing, &offer),
        }
    }

    fn duplicate_receipt(
        &self,
        existing: &conversion::Model,
        offer: &offer::Model,
    ) -> Result<ConversionReceipt> {
        if existing.offer_id != offer.id {
            return Err(AfftrackError::duplicate_conversion(format!(
                "transaction {} already recorded for another offer",
                existing.external_conversion_id
            )));
        }
        debug!(
            "Duplicate postback for {}, returning conversion {}",
            existing.external_conversion_id, existing.id
        );
        Ok(ConversionReceipt::from_model(existing, true))
    }

    /// 校验 HMAC 与时间窗口，返回待占用的 nonce（未签名时为 `None`）
    fn verify_signature<'a>(
        &self,
        key: &AuthenticatedKey,
        req: &'a PostbackRequest,
    ) -> Result<Option<&'a str>> {
        let signature = req.signature.as_deref().filter(|s| !s.is_empty());
        if signature.is_none() && !self.config.require_signature {
            return Ok(None);
        }
        let signature =
            signature.ok_or_else(|| AfftrackError::invalid_signature("signature is required"))?;
        let timestamp = req
            .timestamp
            .ok_or_else(|| AfftrackError::invalid_signature("timestamp is required"))?;
        let nonce = req
            .nonce
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AfftrackError::invalid_signature("nonce is required"))?;

        let advertiser_id = req.advertiser_id.as_deref().unwrap_or("");
        let expected = postback_signature(&key.secret, advertiser_id, timestamp, nonce);
        if !hex_signatures_match(&expected, signature) {
            warn!(key = %key.id, "Postback signature mismatch");
            return Err(AfftrackError::invalid_signature("signature mismatch"));
        }

        let window_ms = self.config.signature_window_secs.saturating_mul(1000);
        let age_ms = Utc::now().timestamp_millis() - normalize_timestamp_ms(timestamp);
        if age_ms.abs() > window_ms {
            return Err(AfftrackError::invalid_signature("timestamp outside the allowed window"));
        }
        Ok(Some(nonce))
    }

    /// `false` 表示 nonce 已被使用
    async fn reserve_nonce(&self, key: &AuthenticatedKey, nonce: &str) -> bool {
        let ttl = Duration::from_secs(self.config.signature_window_secs.max(1) as u64 * 2);
        !self
            .replay_guard
            .reserve_postback_nonce(&key.id, nonce, ttl)
            .await
            .is_duplicate()
    }

    /// 返回 (click_id, 归因状态, 点击所属的 user_offer)
    async fn attribute(
        &self,
        click_id: Option<&str>,
        offer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Option<String>, AttributionStatus, Option<String>)> {
        let Some(click_id) = click_id.filter(|c| !c.is_empty()) else {
            return Ok((None, AttributionStatus::Unattributed, None));
        };
        let Some(click) = self.storage.find_click(click_id).await? else {
            debug!("Postback references unknown click {}", click_id);
            return Ok((None, AttributionStatus::Unattributed, None));
        };
        if click.offer_id != offer_id {
            return Ok((None, AttributionStatus::OfferMismatch, None));
        }
        let window = chrono::Duration::days(self.config.window_days);
        if now - click.clicked_at > window {
            debug!("Click {} is outside the attribution window", click_id);
            return Ok((None, AttributionStatus::Expired, None));
        }
        Ok((Some(click.id), AttributionStatus::Attributed, Some(click.user_offer_id)))
    }

    async fn resolve_user_offer(&self, req: &PostbackRequest, offer_id: &str) -> Result<Option<String>> {
        if let Some(id) = req.user_offer_id.as_deref().filter(|s| !s.is_empty())
            && let Some(uo) = self.storage.find_user_offer(id).await?
            && uo.offer_id == offer_id
        {
            return Ok(Some(uo.id));
        }
        if let Some(code) = req.tracking_code.as_deref().filter(|s| !s.is_empty())
            && let Some(uo) = self.storage.find_user_offer_by_code(code).await?
            && uo.offer_id == offer_id
        {
            return Ok(Some(uo.id));
        }
        Ok(None)
    }

    fn emit_events(&self, model: &conversion::Model, offer: &offer::Model, req: &PostbackRequest) {
        let conversion = json!({
            "id": model.id,
            "click_id": model.click_id,
            "user_offer_id": model.user_offer_id,
            "offer_id": model.offer_id,
            "external_id": model.external_conversion_id,
            "transaction_id": model.external_conversion_id,
            "amount": model.amount,
            "commission": model.commission,
            "currency": model.currency,
            "status": model.status,
            "attribution_status": model.attribution_status,
            "converted_at": model.converted_at.to_rfc3339(),
        });
        let offer_json = json!({
            "id": offer.id,
            "advertiser_id": offer.advertiser_id,
            "title": offer.title,
            "payout": offer.payout,
            "currency": offer.currency,
        });

        let user_offer = json!({ "id": model.user_offer_id });

        self.events.emit(
            WebhookEvent::new(TriggerType::Conversion)
                .for_offer(&offer.id, &offer.advertiser_id)
                .correlated(&model.id)
                .with("conversion", conversion.clone())
                .with("offer", offer_json.clone())
                .with("user_offer", user_offer.clone()),
        );
        self.events.emit(
            WebhookEvent::new(TriggerType::Postback)
                .for_offer(&offer.id, &offer.advertiser_id)
                .correlated(&model.id)
                .with("conversion", conversion)
                .with("offer", offer_json)
                .with("user_offer", user_offer)
                .with("postback", json!(redacted(req))),
        );
    }

    // ---------------- status changes ----------------

    pub async fn get_conversion(&self, id: &str) -> Result<Conversion> {
        self.storage
            .find_conversion(id)
            .await?
            .map(Into::into)
            .ok_or_else(|| AfftrackError::not_found(format!("conversion {} not found", id)))
    }

    pub async fn approve(&self, id: &str) -> Result<Conversion> {
        self.transition(id, ConversionStatus::Approved, None).await
    }

    pub async fn reject(&self, id: &str, reason: Option<&str>) -> Result<Conversion> {
        self.transition(id, ConversionStatus::Rejected, reason).await
    }

    pub async fn mark_paid(&self, id: &str) -> Result<Conversion> {
        self.transition(id, ConversionStatus::Paid, None).await
    }

    /// 同状态重复调用视为成功；非法跳转返回 InvalidStateTransition
    async fn transition(
        &self,
        id: &str,
        target: ConversionStatus,
        reason: Option<&str>,
    ) -> Result<Conversion> {
        let current = self.get_conversion(id).await?;
        let status = parse_status(&current.status)?;
        if status == target {
            return Ok(current);
        }
        if !status.can_transition_to(target) {
            return Err(AfftrackError::invalid_state_transition(format!(
                "cannot move conversion {} from {} to {}",
                id, status, target
            )));
        }

        let applied = self
            .storage
            .transition_conversion(id, status, target, reason, Utc::now())
            .await?;
        let updated = self.get_conversion(id).await?;
        if applied {
            info!("Conversion {} moved {} -> {}", id, status, target);
            return Ok(updated);
        }

        // 并发修改：以最新状态为准
        if parse_status(&updated.status)? == target {
            Ok(updated)
        } else {
            Err(AfftrackError::invalid_state_transition(format!(
                "conversion {} changed concurrently to {}",
                id, updated.status
            )))
        }
    }
}

fn parse_status(raw: &str) -> Result<ConversionStatus> {
    raw.parse::<ConversionStatus>()
        .map_err(|_| AfftrackError::database_operation(format!("unknown conversion status {}", raw)))
}

/// 审计 / 事件中不保留 api_key 与签名
fn redacted(req: &PostbackRequest) -> PostbackRequest {
    PostbackRequest {
        api_key: None,
        signature: None,
        ..req.clone()
    }
}
