//! Step → outbound request
//!
//! 渲染 url / headers / body，附加 X-Afftok-* 头与签名。
//! worker 与单步测试共用。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::signing::{DeliveryMeta, WebhookSigner};
use super::template::{render, render_json};
use super::transport::WebhookRequest;
use crate::errors::{AfftrackError, Result};
use crate::storage::SignatureMode;

use migration::entities::webhook_step;

pub const USER_AGENT: &str = concat!("afftrack-webhooks/", env!("CARGO_PKG_VERSION"));

pub const HEADER_TIMESTAMP: &str = "X-Afftok-Timestamp";
pub const HEADER_DELIVERY_ID: &str = "X-Afftok-Delivery-ID";
pub const HEADER_RETRY_COUNT: &str = "X-Afftok-Retry-Count";
pub const HEADER_PIPELINE_ID: &str = "X-Afftok-Pipeline-ID";
pub const HEADER_EXECUTION_ID: &str = "X-Afftok-Execution-ID";
pub const HEADER_STEP_INDEX: &str = "X-Afftok-Step-Index";

/// 一次投递尝试的上下文
#[derive(Debug, Clone)]
pub struct Attempt<'a> {
    pub execution_id: &'a str,
    pub pipeline_id: &'a str,
    pub step_index: i32,
    /// 从 1 开始
    pub attempt: i32,
    pub advertiser_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

pub struct RequestComposer {
    signer: Arc<WebhookSigner>,
    default_timeout: Duration,
}

impl RequestComposer {
    pub fn new(signer: Arc<WebhookSigner>, default_timeout: Duration) -> Self {
        Self {
            signer,
            default_timeout,
        }
    }

    pub fn signer(&self) -> &WebhookSigner {
        &self.signer
    }

    /// `default_body` 在步骤未配置模板时使用，按 JSON 值渲染
    pub fn compose(
        &self,
        step: &webhook_step::Model,
        default_body: &str,
        ctx: &Value,
        attempt: &Attempt<'_>,
    ) -> Result<WebhookRequest> {
        let url = render(&step.url, ctx);
        let body = match step.body_template.as_deref() {
            Some(template) => render(template, ctx),
            None => render_json(default_body, ctx),
        };

        let mut headers = render_step_headers(step.headers.as_deref(), ctx)?;
        if !headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".into(), "application/json".into()));
        }
        headers.push(("User-Agent".into(), USER_AGENT.into()));
        headers.push((HEADER_TIMESTAMP.into(), attempt.now.timestamp().to_string()));
        headers.push((
            HEADER_DELIVERY_ID.into(),
            format!("{}:{}", attempt.execution_id, attempt.step_index),
        ));
        headers.push((
            HEADER_RETRY_COUNT.into(),
            (attempt.attempt - 1).max(0).to_string(),
        ));
        headers.push((HEADER_PIPELINE_ID.into(), attempt.pipeline_id.into()));
        headers.push((HEADER_EXECUTION_ID.into(), attempt.execution_id.into()));
        headers.push((HEADER_STEP_INDEX.into(), attempt.step_index.to_string()));

        let mode = SignatureMode::from_str(&step.signature_mode).map_err(|_| {
            AfftrackError::signing(format!("unknown signature mode: {}", step.signature_mode))
        })?;
        let meta = DeliveryMeta {
            execution_id: attempt.execution_id,
            pipeline_id: attempt.pipeline_id,
            step_index: attempt.step_index,
            advertiser_id: attempt.advertiser_id,
            now: attempt.now,
        };
        headers.extend(
            self.signer
                .sign(mode, step.signing_key.as_deref(), &body, &meta)?,
        );

        let method = if step.method.trim().is_empty() {
            "POST".to_string()
        } else {
            step.method.trim().to_ascii_uppercase()
        };
        let timeout = step
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(self.default_timeout);

        Ok(WebhookRequest {
            method,
            url,
            headers,
            body,
            timeout,
        })
    }

    /// 重试耗尽后发往 failover 地址的请求
    ///
    /// 原步骤未签名且配置了默认密钥时补上 HMAC 签名。
    pub fn failover_request(
        &self,
        original: &WebhookRequest,
        failover_url: &str,
        step_mode: &str,
    ) -> WebhookRequest {
        let mut request = original.clone();
        request.url = failover_url.to_string();
        if step_mode == SignatureMode::None.as_str()
            && self.signer.has_default_key()
            && let Ok(extra) = self.signer.sign(
                SignatureMode::Hmac,
                None,
                &request.body,
                &DeliveryMeta {
                    execution_id: "",
                    pipeline_id: "",
                    step_index: 0,
                    advertiser_id: None,
                    now: Utc::now(),
                },
            )
        {
            request.headers.extend(extra);
        }
        request
    }
}

fn render_step_headers(raw: Option<&str>, ctx: &Value) -> Result<Vec<(String, String)>> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    let parsed: Value = serde_json::from_str(raw)?;
    let Value::Object(map) = parsed else {
        return Err(AfftrackError::validation("step headers must be a JSON object"));
    };

    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => render(&s, ctx),
                other => other.to_string(),
            };
            (k, value)
        })
        .collect())
}
