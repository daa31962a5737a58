//! Advertiser API keys
//!
//! 明文 key 只在签发时返回一次；库中保存 Argon2id 哈希和可索引的前缀。
//! 校验成功的 key 以 sha256(key) 为键缓存一段时间，避免每个 postback 都跑 Argon2。

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::errors::{AfftrackError, Result};
use crate::storage::SeaOrmStorage;
use crate::utils::generate_random_code;
use crate::utils::hashing::{hash_secret, sha256_hex, verify_secret};

use migration::entities::api_key;

pub const KEY_PREFIX: &str = "ak_live_";
const RANDOM_LEN: usize = 32;
/// KEY_PREFIX + 8 个随机字符
const LOOKUP_PREFIX_LEN: usize = 16;
const VERIFIED_CACHE_TTL_SECS: u64 = 60;

/// 已通过校验的调用方
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedKey {
    pub id: String,
    pub advertiser_id: Option<String>,
    /// postback 请求签名使用明文 key 作为 HMAC 密钥
    pub secret: String,
}

pub struct ApiKeyService {
    storage: Arc<SeaOrmStorage>,
    verified: Cache<String, AuthenticatedKey>,
}

fn lookup_prefix(raw: &str) -> Option<&str> {
    if !raw.starts_with(KEY_PREFIX) || raw.len() < LOOKUP_PREFIX_LEN {
        return None;
    }
    raw.get(..LOOKUP_PREFIX_LEN)
}

impl ApiKeyService {
    pub fn new(storage: Arc<SeaOrmStorage>) -> Self {
        Self {
            storage,
            verified: Cache::builder()
                .time_to_live(Duration::from_secs(VERIFIED_CACHE_TTL_SECS))
                .max_capacity(10_000)
                .build(),
        }
    }

    /// 签发新 key，返回 (明文, 记录)
    pub async fn issue(&self, advertiser_id: Option<&str>, name: &str) -> Result<(String, api_key::Model)> {
        let raw = format!("{}{}", KEY_PREFIX, generate_random_code(RANDOM_LEN));
        let prefix = lookup_prefix(&raw)
            .ok_or_else(|| AfftrackError::signing("generated key is too short"))?
            .to_string();

        let secret = raw.clone();
        let hash = tokio::task::spawn_blocking(move || hash_secret(&secret))
            .await
            .map_err(|e| AfftrackError::signing(format!("hash task failed: {}", e)))??;

        let model = self
            .storage
            .insert_api_key(advertiser_id, name, &prefix, &hash)
            .await?;
        info!("API key {} issued for advertiser {:?}", model.id, advertiser_id);
        Ok((raw, model))
    }

    pub async fn verify(&self, raw: &str) -> Result<AuthenticatedKey> {
        let raw = raw.trim();
        let Some(prefix) = lookup_prefix(raw) else {
            return Err(AfftrackError::invalid_api_key("malformed API key"));
        };

        let cache_key = sha256_hex(raw.as_bytes());
        if let Some(hit) = self.verified.get(&cache_key).await {
            return Ok(hit);
        }

        let candidates = self.storage.find_api_keys_by_prefix(prefix).await?;
        for candidate in candidates {
            let secret = raw.to_string();
            let hash = candidate.key_hash.clone();
            let matched = tokio::task::spawn_blocking(move || verify_secret(&secret, &hash))
                .await
                .map_err(|e| AfftrackError::signing(format!("verify task failed: {}", e)))?;

            match matched {
                Ok(true) => {
                    let key = AuthenticatedKey {
                        id: candidate.id.clone(),
                        advertiser_id: candidate.advertiser_id.clone(),
                        secret: raw.to_string(),
                    };
                    self.verified.insert(cache_key, key.clone()).await;
                    self.touch_in_background(candidate.id);
                    return Ok(key);
                }
                Ok(false) => continue,
                Err(e) => {
                    warn!("API key {} has an unreadable hash: {}", candidate.id, e);
                    continue;
                }
            }
        }

        debug!("API key with prefix {} did not verify", prefix);
        Err(AfftrackError::invalid_api_key("invalid API key"))
    }

    pub async fn revoke(&self, id: &str) -> Result<()> {
        self.storage.revoke_api_key(id).await?;
        // 缓存按明文哈希索引，无法定点失效
        self.verified.invalidate_all();
        Ok(())
    }

    fn touch_in_background(&self, id: String) {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.touch_api_key(&id).await {
                debug!("Failed to update last_used_at for {}: {}", id, e);
            }
        });
    }
}
