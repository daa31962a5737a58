//! Signed tracking links
//!
//! 链接格式：`code.timestampMs.nonce.signatureHex`，
//! 旧格式只有 `code`（不签名，按配置决定是否接受）。
//!
//! signature = hex(HMAC-SHA256(secret, "code.timestampMs.nonce"))

use chrono::Utc;
use serde::Serialize;
use strum::{AsRefStr, Display};
use tracing::trace;

use crate::config::TrackingConfig;
use crate::errors::{AfftrackError, Result};
use crate::utils::generate_random_code;
use crate::utils::hashing::{hex_signatures_match, hmac_sha256_hex};

const MAX_CODE_LEN: usize = 100;
const MAX_NONCE_LEN: usize = 64;
const NONCE_LEN: usize = 16;

/// 校验结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkReason {
    Valid,
    Legacy,
    Expired,
    InvalidSignature,
    FutureTimestamp,
}

/// 路径段解析出的字段（未校验签名）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLink {
    pub tracking_code: String,
    pub issued_at_ms: Option<i64>,
    pub nonce: Option<String>,
    pub signature: Option<String>,
}

impl DecodedLink {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkValidation {
    pub tracking_code: String,
    pub valid: bool,
    pub reason: LinkReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at_ms: Option<i64>,
}

impl LinkValidation {
    /// 签名正确（可能已过期），可以据此记录点击
    pub fn is_authentic(&self) -> bool {
        matches!(
            self.reason,
            LinkReason::Valid | LinkReason::Legacy | LinkReason::Expired
        )
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn check_token(value: &str, max_len: usize, what: &str) -> Result<()> {
    if value.is_empty() || value.len() > max_len || !value.chars().all(is_token_char) {
        return Err(AfftrackError::malformed_link(format!("invalid {}", what)));
    }
    Ok(())
}

pub struct LinkSigner {
    secret: Vec<u8>,
    ttl_ms: i64,
    clock_skew_ms: i64,
    allow_legacy: bool,
}

impl LinkSigner {
    pub fn new(secret: &str, ttl_secs: u64, clock_skew_secs: u64, allow_legacy: bool) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl_ms: (ttl_secs as i64).saturating_mul(1000),
            clock_skew_ms: (clock_skew_secs as i64).saturating_mul(1000),
            allow_legacy,
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(
            &config.link_secret,
            config.link_ttl_secs,
            config.clock_skew_secs,
            config.allow_legacy_links,
        )
    }

    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }

    pub fn compute_signature(&self, code: &str, issued_at_ms: i64, nonce: &str) -> String {
        let payload = format!("{}.{}.{}", code, issued_at_ms, nonce);
        hmac_sha256_hex(&self.secret, payload.as_bytes())
    }

    /// 生成一个新的签名链接路径段
    pub fn sign(&self, code: &str) -> Result<String> {
        let nonce = generate_random_code(NONCE_LEN);
        self.sign_at(code, Utc::now().timestamp_millis(), &nonce)
    }

    pub fn sign_at(&self, code: &str, issued_at_ms: i64, nonce: &str) -> Result<String> {
        if !self.has_secret() {
            return Err(AfftrackError::signing("tracking.link_secret is not configured"));
        }
        check_token(code, MAX_CODE_LEN, "tracking code")?;
        check_token(nonce, MAX_NONCE_LEN, "nonce")?;
        if issued_at_ms < 0 {
            return Err(AfftrackError::validation("timestamp must be non-negative"));
        }

        let signature = self.compute_signature(code, issued_at_ms, nonce);
        Ok(format!("{}.{}.{}.{}", code, issued_at_ms, nonce, signature))
    }

    /// 结构解析，不涉及密钥
    pub fn decode(&self, raw: &str) -> Result<DecodedLink> {
        let parts: Vec<&str> = raw.split('.').collect();
        match parts.as_slice() {
            [code] => {
                check_token(code, MAX_CODE_LEN, "tracking code")?;
                if !self.allow_legacy {
                    return Err(AfftrackError::malformed_link("unsigned links are not accepted"));
                }
                Ok(DecodedLink {
                    tracking_code: code.to_string(),
                    issued_at_ms: None,
                    nonce: None,
                    signature: None,
                })
            }
            [code, ts, nonce, sig] => {
                check_token(code, MAX_CODE_LEN, "tracking code")?;
                let issued_at_ms: i64 = ts
                    .parse()
                    .ok()
                    .filter(|v: &i64| *v >= 0)
                    .ok_or_else(|| AfftrackError::malformed_link("invalid timestamp"))?;
                check_token(nonce, MAX_NONCE_LEN, "nonce")?;
                if sig.is_empty() || !sig.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(AfftrackError::malformed_link("invalid signature encoding"));
                }
                Ok(DecodedLink {
                    tracking_code: code.to_string(),
                    issued_at_ms: Some(issued_at_ms),
                    nonce: Some(nonce.to_string()),
                    signature: Some(sig.to_string()),
                })
            }
            _ => Err(AfftrackError::malformed_link(format!(
                "expected 1 or 4 dot-separated parts, got {}",
                parts.len()
            ))),
        }
    }

    pub fn validate(&self, raw: &str) -> Result<LinkValidation> {
        self.validate_at(raw, Utc::now().timestamp_millis())
    }

    /// 结构错误返回 `MalformedLink`，其余情况都返回 `LinkValidation`
    pub fn validate_at(&self, raw: &str, now_ms: i64) -> Result<LinkValidation> {
        let decoded = self.decode(raw)?;

        let (Some(issued_at_ms), Some(nonce), Some(signature)) =
            (decoded.issued_at_ms, &decoded.nonce, &decoded.signature)
        else {
            return Ok(LinkValidation {
                tracking_code: decoded.tracking_code,
                valid: true,
                reason: LinkReason::Legacy,
                nonce: None,
                issued_at_ms: None,
            });
        };

        let expected = self.compute_signature(&decoded.tracking_code, issued_at_ms, nonce);
        let reason = if !self.has_secret() || !hex_signatures_match(&expected, signature) {
            LinkReason::InvalidSignature
        } else if issued_at_ms > now_ms.saturating_add(self.clock_skew_ms) {
            LinkReason::FutureTimestamp
        } else if now_ms.saturating_sub(issued_at_ms) > self.ttl_ms {
            LinkReason::Expired
        } else {
            LinkReason::Valid
        };

        trace!("Link {} validated: {}", decoded.tracking_code, reason);
        Ok(LinkValidation {
            tracking_code: decoded.tracking_code,
            valid: reason == LinkReason::Valid,
            reason,
            nonce: decoded.nonce,
            issued_at_ms: Some(issued_at_ms),
        })
    }
}
