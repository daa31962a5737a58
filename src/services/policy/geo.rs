//! Geo rules
//!
//! 解析顺序：offer 级 → advertiser 级 → global，取最具体且存在规则的作用域，
//! 该作用域内 priority 最小的启用规则决定结果；没有任何规则时放行。
//! 国家未知时一律放行。

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::storage::{GeoMode, GeoScope, SeaOrmStorage};

use migration::entities::geo_rule;

const RULE_CACHE_TTL_SECS: u64 = 60;
const RULE_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeoDecision {
    pub allowed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<GeoScope>,
}

impl GeoDecision {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
            rule_id: None,
            scope: None,
        }
    }
}

fn parse_countries(raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(list) => list.into_iter().map(|c| c.trim().to_uppercase()).collect(),
        Err(e) => {
            warn!("Invalid geo rule countries {:?}: {}", raw, e);
            Vec::new()
        }
    }
}

fn match_country(rule: &geo_rule::Model, scope: GeoScope, country: &str) -> GeoDecision {
    let listed = parse_countries(&rule.countries)
        .iter()
        .any(|c| c == country);

    let (allowed, reason) = match rule.mode.parse::<GeoMode>() {
        Ok(GeoMode::Allow) if listed => (true, "country_in_allow_list"),
        Ok(GeoMode::Allow) => (false, "country_not_in_allow_list"),
        Ok(GeoMode::Block) if listed => (false, "country_in_block_list"),
        Ok(GeoMode::Block) => (true, "country_not_in_block_list"),
        Err(_) => (true, "unknown_mode"),
    };

    GeoDecision {
        allowed,
        reason: reason.to_string(),
        rule_id: Some(rule.id.clone()),
        scope: Some(scope),
    }
}

/// 纯函数版本：`rules` 为 offer 相关的所有启用规则
pub fn evaluate_geo_rules(
    rules: &[geo_rule::Model],
    offer_id: &str,
    advertiser_id: &str,
    country: Option<&str>,
) -> GeoDecision {
    let Some(country) = country.map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty()) else {
        return GeoDecision::allow("unknown_country");
    };

    let scopes = [
        (GeoScope::Offer, Some(offer_id)),
        (GeoScope::Advertiser, Some(advertiser_id)),
        (GeoScope::Global, None),
    ];

    for (scope, scope_id) in scopes {
        let winner = rules
            .iter()
            .filter(|r| r.status == "active" && r.scope_type == scope.as_str())
            .filter(|r| scope_id.is_none() || r.scope_id.as_deref() == scope_id)
            .min_by_key(|r| r.priority);

        if let Some(rule) = winner {
            return match_country(rule, scope, &country);
        }
    }

    GeoDecision::allow("no_rule")
}

pub struct GeoPolicy {
    storage: Arc<SeaOrmStorage>,
    /// "offer_id|advertiser_id" → 规则列表
    rules: Cache<String, Arc<Vec<geo_rule::Model>>>,
}

impl GeoPolicy {
    pub fn new(storage: Arc<SeaOrmStorage>) -> Self {
        Self {
            storage,
            rules: Cache::builder()
                .time_to_live(Duration::from_secs(RULE_CACHE_TTL_SECS))
                .max_capacity(RULE_CACHE_CAPACITY)
                .build(),
        }
    }

    async fn rules_for(&self, offer_id: &str, advertiser_id: &str) -> Result<Arc<Vec<geo_rule::Model>>> {
        let key = format!("{}|{}", offer_id, advertiser_id);
        if let Some(hit) = self.rules.get(&key).await {
            return Ok(hit);
        }
        let rules = Arc::new(self.storage.active_geo_rules_for(offer_id, advertiser_id).await?);
        self.rules.insert(key, rules.clone()).await;
        Ok(rules)
    }

    /// 规则读取失败时放行，点击链路不因规则表故障中断
    pub async fn check(&self, offer_id: &str, advertiser_id: &str, country: Option<&str>) -> GeoDecision {
        match self.rules_for(offer_id, advertiser_id).await {
            Ok(rules) => {
                let decision = evaluate_geo_rules(&rules, offer_id, advertiser_id, country);
                debug!(
                    "Geo decision for offer {} ({:?}): {} ({})",
                    offer_id, country, decision.allowed, decision.reason
                );
                decision
            }
            Err(e) => {
                warn!("Failed to load geo rules for offer {}: {}", offer_id, e);
                GeoDecision::allow("rules_unavailable")
            }
        }
    }

    pub fn invalidate_all(&self) {
        self.rules.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(id: &str, scope: GeoScope, scope_id: Option<&str>, mode: GeoMode, countries: &[&str], priority: i32) -> geo_rule::Model {
        geo_rule::Model {
            id: id.to_string(),
            name: id.to_string(),
            scope_type: scope.to_string(),
            scope_id: scope_id.map(String::from),
            mode: mode.to_string(),
            countries: serde_json::to_string(countries).unwrap(),
            priority,
            status: "active".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_rules_allows() {
        let d = evaluate_geo_rules(&[], "o1", "a1", Some("US"));
        assert!(d.allowed);
        assert_eq!(d.reason, "no_rule");
    }

    #[test]
    fn unknown_country_allows() {
        let rules = vec![rule("g", GeoScope::Global, None, GeoMode::Allow, &["US"], 0)];
        assert!(evaluate_geo_rules(&rules, "o1", "a1", None).allowed);
        assert!(evaluate_geo_rules(&rules, "o1", "a1", Some("")).allowed);
    }

    #[test]
    fn offer_scope_overrides_global() {
        let rules = vec![
            rule("g", GeoScope::Global, None, GeoMode::Block, &["US"], 0),
            rule("o", GeoScope::Offer, Some("o1"), GeoMode::Allow, &["US", "CA"], 10),
        ];
        let d = evaluate_geo_rules(&rules, "o1", "a1", Some("us"));
        assert!(d.allowed);
        assert_eq!(d.rule_id.as_deref(), Some("o"));
        assert_eq!(d.scope, Some(GeoScope::Offer));

        // 其他 offer 落到 global
        let d = evaluate_geo_rules(&rules, "o2", "a1", Some("US"));
        assert!(!d.allowed);
        assert_eq!(d.rule_id.as_deref(), Some("g"));
    }

    #[test]
    fn advertiser_scope_before_global() {
        let rules = vec![
            rule("g", GeoScope::Global, None, GeoMode::Allow, &["US"], 0),
            rule("a", GeoScope::Advertiser, Some("a1"), GeoMode::Block, &["DE"], 5),
        ];
        assert!(!evaluate_geo_rules(&rules, "o1", "a1", Some("DE")).allowed);
        assert!(evaluate_geo_rules(&rules, "o1", "a1", Some("FR")).allowed);
        assert!(!evaluate_geo_rules(&rules, "o1", "a2", Some("FR")).allowed);
    }

    #[test]
    fn lower_priority_wins_within_scope() {
        let rules = vec![
            rule("late", GeoScope::Global, None, GeoMode::Allow, &["BR"], 50),
            rule("early", GeoScope::Global, None, GeoMode::Block, &["BR"], 1),
        ];
        let d = evaluate_geo_rules(&rules, "o", "a", Some("BR"));
        assert!(!d.allowed);
        assert_eq!(d.rule_id.as_deref(), Some("early"));
        assert_eq!(d.reason, "country_in_block_list");
    }

    #[test]
    fn inactive_rules_ignored() {
        let mut r = rule("g", GeoScope::Global, None, GeoMode::Block, &["US"], 0);
        r.status = "inactive".to_string();
        assert!(evaluate_geo_rules(&[r], "o", "a", Some("US")).allowed);
    }
}
