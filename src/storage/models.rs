//! Domain types shared by storage, services and the HTTP layer
//!
//! 数据库里状态字段都以字符串保存，这里的枚举负责两者之间的转换。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use migration::entities::{conversion, webhook_dlq_item, webhook_execution, webhook_step_result};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
        )]
        #[serde(rename_all = "snake_case")]
        #[strum(serialize_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                self.as_ref()
            }
        }
    };
}

string_enum!(
    /// 转化状态：pending → approved|rejected，approved → paid
    ConversionStatus { Pending, Approved, Rejected, Paid }
);

impl ConversionStatus {
    pub fn can_transition_to(self, target: ConversionStatus) -> bool {
        matches!(
            (self, target),
            (ConversionStatus::Pending, ConversionStatus::Approved)
                | (ConversionStatus::Pending, ConversionStatus::Rejected)
                | (ConversionStatus::Approved, ConversionStatus::Paid)
        )
    }
}

string_enum!(AttributionStatus {
    Attributed,
    Unattributed,
    Expired,
    OfferMismatch,
});

string_enum!(
    /// 点击记录上的链接状态
    LinkStatus { Valid, Legacy, Expired }
);

string_enum!(TriggerType {
    Click,
    Conversion,
    Postback,
    Fraud,
});

string_enum!(
    /// pending → delivering → {delivered, retrying, failed_over, dead_lettered}
    ExecutionStatus {
        Pending,
        Delivering,
        Retrying,
        Delivered,
        FailedOver,
        DeadLettered,
    }
);

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Delivered | ExecutionStatus::FailedOver | ExecutionStatus::DeadLettered
        )
    }
}

string_enum!(StepStatus {
    Pending,
    Retrying,
    Delivered,
    FailedOver,
    DeadLettered,
    Skipped,
});

string_enum!(SignatureMode { None, Hmac, Jwt });

string_enum!(GeoScope {
    Offer,
    Advertiser,
    Global,
});

string_enum!(GeoMode { Allow, Block });

string_enum!(FraudKind {
    InvalidSignature,
    Replay,
    GeoBlocked,
    BotBlocked,
});

/// tracking code 解析出的推广关系
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingTarget {
    pub user_offer_id: String,
    pub user_id: String,
    pub offer_id: String,
    pub advertiser_id: String,
    pub tracking_code: String,
    pub destination_url: String,
    pub payout: f64,
    pub currency: String,
    pub active: bool,
}

/// 待写入的点击
#[derive(Debug, Clone, Default)]
pub struct NewClick {
    pub offer_id: String,
    pub user_offer_id: String,
    pub user_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub referrer: Option<String>,
    pub sub1: Option<String>,
    pub sub2: Option<String>,
    pub sub3: Option<String>,
    pub fingerprint: String,
    pub link_status: String,
}

#[derive(Debug, Clone)]
pub struct NewConversion {
    pub click_id: Option<String>,
    pub user_offer_id: Option<String>,
    /// 用于累加 users.total_conversions
    pub user_id: Option<String>,
    pub offer_id: String,
    pub external_conversion_id: String,
    pub amount: f64,
    pub commission: f64,
    pub currency: String,
    pub attribution_status: AttributionStatus,
    pub postback_status: Option<String>,
    pub postback_data: Option<String>,
    pub converted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewFraudEvent {
    pub kind: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub tracking_code: Option<String>,
    pub offer_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversion {
    pub id: String,
    pub click_id: Option<String>,
    pub user_offer_id: Option<String>,
    pub offer_id: String,
    pub external_conversion_id: String,
    pub amount: f64,
    pub commission: f64,
    pub currency: String,
    pub status: String,
    pub attribution_status: String,
    pub postback_status: Option<String>,
    pub rejection_reason: Option<String>,
    pub converted_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<conversion::Model> for Conversion {
    fn from(m: conversion::Model) -> Self {
        Self {
            id: m.id,
            click_id: m.click_id,
            user_offer_id: m.user_offer_id,
            offer_id: m.offer_id,
            external_conversion_id: m.external_conversion_id,
            amount: m.amount,
            commission: m.commission,
            currency: m.currency,
            status: m.status,
            attribution_status: m.attribution_status,
            postback_status: m.postback_status,
            rejection_reason: m.rejection_reason,
            converted_at: m.converted_at,
            approved_at: m.approved_at,
            rejected_at: m.rejected_at,
            paid_at: m.paid_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookExecution {
    pub id: String,
    pub pipeline_id: String,
    pub trigger_type: String,
    pub correlation_id: Option<String>,
    pub status: String,
    pub current_step: i32,
    pub attempt: i32,
    pub step_count: i32,
    pub only_step: Option<i32>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<webhook_execution::Model> for WebhookExecution {
    fn from(m: webhook_execution::Model) -> Self {
        Self {
            id: m.id,
            pipeline_id: m.pipeline_id,
            trigger_type: m.trigger_type,
            correlation_id: m.correlation_id,
            status: m.status,
            current_step: m.current_step,
            attempt: m.attempt,
            step_count: m.step_count,
            only_step: m.only_step,
            next_attempt_at: m.next_attempt_at,
            last_error: m.last_error,
            created_at: m.created_at,
            completed_at: m.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookStepResult {
    pub step_id: String,
    pub step_index: i32,
    pub status: String,
    pub attempt_count: i32,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<i64>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<webhook_step_result::Model> for WebhookStepResult {
    fn from(m: webhook_step_result::Model) -> Self {
        Self {
            step_id: m.step_id,
            step_index: m.step_index,
            status: m.status,
            attempt_count: m.attempt_count,
            last_status_code: m.last_status_code,
            last_error: m.last_error,
            last_duration_ms: m.last_duration_ms,
            next_retry_at: m.next_retry_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqItem {
    pub id: String,
    pub execution_id: String,
    pub pipeline_id: String,
    pub step_id: String,
    pub step_index: i32,
    pub trigger_type: String,
    pub request_url: String,
    pub last_error: Option<String>,
    pub last_status_code: Option<i32>,
    pub attempts: i32,
    pub failed_at: DateTime<Utc>,
    pub replay_count: i32,
    pub last_replayed_at: Option<DateTime<Utc>>,
}

impl From<webhook_dlq_item::Model> for DlqItem {
    fn from(m: webhook_dlq_item::Model) -> Self {
        Self {
            id: m.id,
            execution_id: m.execution_id,
            pipeline_id: m.pipeline_id,
            step_id: m.step_id,
            step_index: m.step_index,
            trigger_type: m.trigger_type,
            request_url: m.request_url,
            last_error: m.last_error,
            last_status_code: m.last_status_code,
            attempts: m.attempts,
            failed_at: m.failed_at,
            replay_count: m.replay_count,
            last_replayed_at: m.last_replayed_at,
        }
    }
}

/// 分页参数
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl Page {
    pub fn new(page: Option<u64>, page_size: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(20).clamp(1, 200),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn conversion_transitions() {
        use ConversionStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Paid));
        assert!(!Pending.can_transition_to(Paid));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Pending));
    }

    #[test]
    fn enums_use_snake_case_strings() {
        assert_eq!(AttributionStatus::OfferMismatch.as_str(), "offer_mismatch");
        assert_eq!(ExecutionStatus::DeadLettered.to_string(), "dead_lettered");
        assert_eq!(
            StepStatus::from_str("failed_over").unwrap(),
            StepStatus::FailedOver
        );
        assert_eq!(SignatureMode::from_str("jwt").unwrap(), SignatureMode::Jwt);
        assert!(TriggerType::from_str("unknown").is_err());
    }

    #[test]
    fn page_is_clamped() {
        let p = Page::new(Some(0), Some(10_000));
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, 200);
    }
}
