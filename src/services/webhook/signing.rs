//! Outbound request signing
//!
//! - `none`: 不签名
//! - `hmac`: `X-Afftok-Signature: sha256=<hex(HMAC-SHA256(key, body))>`
//! - `jwt`: `Authorization: Bearer <HS256 JWT>`，短有效期，携带投递元数据
//!
//! 步骤未配置密钥时使用 `webhook.default_signing_key`。

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::WebhookConfig;
use crate::errors::{AfftrackError, Result};
use crate::storage::SignatureMode;
use crate::utils::hashing::{hex_signatures_match, hmac_sha256_hex};

pub const SIGNATURE_HEADER: &str = "X-Afftok-Signature";
pub const ALGORITHM_HEADER: &str = "X-Afftok-Algorithm";

/// JWT 声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
    pub task_id: String,
    pub pipeline_id: String,
    pub execution_id: String,
    pub step_index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertiser_id: Option<String>,
}

/// 一次投递的元数据
#[derive(Debug, Clone)]
pub struct DeliveryMeta<'a> {
    pub execution_id: &'a str,
    pub pipeline_id: &'a str,
    pub step_index: i32,
    pub advertiser_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

pub struct WebhookSigner {
    default_key: String,
    jwt_issuer: String,
    jwt_ttl_secs: i64,
}

impl WebhookSigner {
    pub fn new(default_key: &str, jwt_issuer: &str, jwt_ttl_secs: i64) -> Self {
        Self {
            default_key: default_key.to_string(),
            jwt_issuer: jwt_issuer.to_string(),
            jwt_ttl_secs: jwt_ttl_secs.max(1),
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(
            &config.default_signing_key,
            &config.jwt_issuer,
            config.jwt_ttl_secs,
        )
    }

    pub fn has_default_key(&self) -> bool {
        !self.default_key.is_empty()
    }

    fn effective_key<'a>(&'a self, step_key: Option<&'a str>) -> Result<&'a str> {
        match step_key.filter(|k| !k.is_empty()) {
            Some(key) => Ok(key),
            None if self.has_default_key() => Ok(&self.default_key),
            None => Err(AfftrackError::signing("no signing key configured for this step")),
        }
    }

    pub fn hmac_header_value(key: &str, body: &str) -> String {
        format!("sha256={}", hmac_sha256_hex(key.as_bytes(), body.as_bytes()))
    }

    /// 订阅方验证 HMAC 签名头
    pub fn verify_hmac(key: &str, body: &str, header_value: &str) -> bool {
        let Some(provided) = header_value.strip_prefix("sha256=") else {
            return false;
        };
        hex_signatures_match(&hmac_sha256_hex(key.as_bytes(), body.as_bytes()), provided)
    }

    pub fn issue_jwt(&self, key: &str, meta: &DeliveryMeta<'_>) -> Result<String> {
        let claims = WebhookClaims {
            iss: self.jwt_issuer.clone(),
            sub: meta.execution_id.to_string(),
            iat: meta.now.timestamp(),
            nbf: (meta.now - Duration::seconds(60)).timestamp(),
            exp: (meta.now + Duration::seconds(self.jwt_ttl_secs)).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            task_id: meta.execution_id.to_string(),
            pipeline_id: meta.pipeline_id.to_string(),
            execution_id: meta.execution_id.to_string(),
            step_index: meta.step_index,
            advertiser_id: meta.advertiser_id.map(String::from),
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(key.as_bytes()),
        )?)
    }

    pub fn verify_jwt(&self, key: &str, token: &str) -> Result<WebhookClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.jwt_issuer.as_str()]);
        validation.validate_nbf = true;
        let data = decode::<WebhookClaims>(token, &DecodingKey::from_secret(key.as_bytes()), &validation)?;
        Ok(data.claims)
    }

    /// 返回需要附加的签名头
    pub fn sign(
        &self,
        mode: SignatureMode,
        step_key: Option<&str>,
        body: &str,
        meta: &DeliveryMeta<'_>,
    ) -> Result<Vec<(String, String)>> {
        match mode {
            SignatureMode::None => Ok(Vec::new()),
            SignatureMode::Hmac => {
                let key = self.effective_key(step_key)?;
                Ok(vec![
                    (SIGNATURE_HEADER.to_string(), Self::hmac_header_value(key, body)),
                    (ALGORITHM_HEADER.to_string(), "HMAC-SHA256".to_string()),
                ])
            }
            SignatureMode::Jwt => {
                let key = self.effective_key(step_key)?;
                let token = self.issue_jwt(key, meta)?;
                Ok(vec![("Authorization".to_string(), format!("Bearer {}", token))])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DeliveryMeta<'static> {
        DeliveryMeta {
            execution_id: "exec-1",
            pipeline_id: "pipe-1",
            step_index: 2,
            advertiser_id: Some("adv-1"),
            now: Utc::now(),
        }
    }

    #[test]
    fn none_mode_adds_nothing() {
        let signer = WebhookSigner::new("", "iss", 300);
        assert!(signer.sign(SignatureMode::None, None, "{}", &meta()).unwrap().is_empty());
    }

    #[test]
    fn hmac_header_verifies() {
        let signer = WebhookSigner::new("", "iss", 300);
        let headers = signer
            .sign(SignatureMode::Hmac, Some("step-key"), r#"{"a":1}"#, &meta())
            .unwrap();
        let (name, value) = &headers[0];
        assert_eq!(name, SIGNATURE_HEADER);
        assert!(value.starts_with("sha256="));
        assert!(WebhookSigner::verify_hmac("step-key", r#"{"a":1}"#, value));
        assert!(!WebhookSigner::verify_hmac("step-key", r#"{"a":2}"#, value));
        assert!(!WebhookSigner::verify_hmac("other", r#"{"a":1}"#, value));
    }

    #[test]
    fn falls_back_to_default_key() {
        let signer = WebhookSigner::new("default", "iss", 300);
        let headers = signer.sign(SignatureMode::Hmac, Some(""), "body", &meta()).unwrap();
        assert!(WebhookSigner::verify_hmac("default", "body", &headers[0].1));

        let keyless = WebhookSigner::new("", "iss", 300);
        assert!(matches!(
            keyless.sign(SignatureMode::Hmac, None, "body", &meta()),
            Err(AfftrackError::Signing(_))
        ));
    }

    #[test]
    fn jwt_carries_delivery_metadata() {
        let signer = WebhookSigner::new("", "afftok-webhooks", 300);
        let headers = signer.sign(SignatureMode::Jwt, Some("jwt-key"), "body", &meta()).unwrap();
        let token = headers[0].1.strip_prefix("Bearer ").unwrap();
        let claims = signer.verify_jwt("jwt-key", token).unwrap();
        assert_eq!(claims.iss, "afftok-webhooks");
        assert_eq!(claims.execution_id, "exec-1");
        assert_eq!(claims.task_id, "exec-1");
        assert_eq!(claims.pipeline_id, "pipe-1");
        assert_eq!(claims.step_index, 2);
        assert_eq!(claims.advertiser_id.as_deref(), Some("adv-1"));
        assert_eq!(claims.exp - claims.iat, 300);

        assert!(signer.verify_jwt("wrong-key", token).is_err());
    }
}
