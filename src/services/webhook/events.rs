//! Events fed into the webhook pipeline
//!
//! 生产者只调用 `EventSink::emit`，立即返回；投递在后台完成。

use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::storage::TriggerType;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub trigger: TriggerType,
    pub offer_id: Option<String>,
    pub advertiser_id: Option<String>,
    /// click id / conversion id，用于关联投递历史
    pub correlation_id: Option<String>,
    /// 模板上下文中的命名空间（click / conversion / offer / ...）
    pub data: Map<String, Value>,
}

impl WebhookEvent {
    pub fn new(trigger: TriggerType) -> Self {
        Self {
            trigger,
            offer_id: None,
            advertiser_id: None,
            correlation_id: None,
            data: Map::new(),
        }
    }

    pub fn for_offer(mut self, offer_id: &str, advertiser_id: &str) -> Self {
        self.offer_id = Some(offer_id.to_string());
        self.advertiser_id = Some(advertiser_id.to_string());
        self
    }

    pub fn correlated(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_string());
        self
    }

    pub fn with(mut self, namespace: &str, value: Value) -> Self {
        self.data.insert(namespace.to_string(), value);
        self
    }

    /// 序列化为 execution.payload
    pub fn payload(&self) -> Value {
        json!({
            "trigger": self.trigger,
            "offer_id": self.offer_id,
            "advertiser_id": self.advertiser_id,
            "correlation_id": self.correlation_id,
            "data": self.data,
        })
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: WebhookEvent);
}

/// webhook 关闭时使用
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: WebhookEvent) {}
}

/// 测试用：记录所有事件
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<WebhookEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<WebhookEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, trigger: TriggerType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.trigger == trigger)
            .count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: WebhookEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
