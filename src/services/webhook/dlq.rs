//! Dead letters, delivery history and one-off step tests

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::delivery::{Attempt, RequestComposer};
use super::template::{ExecutionMeta, build_context, default_template, unresolved_placeholders};
use super::transport::WebhookTransport;
use crate::errors::{AfftrackError, Result};
use crate::storage::{
    DlqItem, ExecutionFilter, Page, Paginated, SeaOrmStorage, TriggerType, WebhookExecution,
    WebhookStepResult,
};

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: WebhookExecution,
    pub steps: Vec<WebhookStepResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepTestResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub request_url: String,
    /// 模板里在上下文中找不到的占位符
    pub unresolved: Vec<String>,
}

/// 单步测试使用的示例数据
pub fn sample_data(trigger: TriggerType) -> Map<String, Value> {
    let sample = json!({
        "click": {
            "id": "test-click-id",
            "ip": "203.0.113.10",
            "user_agent": "Mozilla/5.0 (afftrack step test)",
            "country": "US",
            "device": "desktop",
            "sub1": "test",
        },
        "conversion": {
            "id": "test-conversion-id",
            "external_id": "TEST-TXN-1",
            "click_id": "test-click-id",
            "amount": 49.99,
            "commission": 5.0,
            "currency": "USD",
            "status": "pending",
        },
        "offer": {"id": "test-offer-id", "advertiser_id": "test-advertiser-id"},
        "user_offer": {"id": "test-user-offer-id", "tracking_code": "test-code"},
        "postback": {"transaction_id": "TEST-TXN-1", "status": "approved"},
        "fraud": {
            "kind": "replay",
            "ip": "203.0.113.10",
            "tracking_code": "test-code",
            "offer_id": "test-offer-id",
            "details": {"nonce": "test-nonce"},
        },
        "trigger": trigger.as_str(),
    });
    match sample {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub struct DeliveryAdmin {
    storage: Arc<SeaOrmStorage>,
    transport: Arc<dyn WebhookTransport>,
    composer: Arc<RequestComposer>,
    notify: Arc<Notify>,
}

impl DeliveryAdmin {
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        transport: Arc<dyn WebhookTransport>,
        composer: Arc<RequestComposer>,
        notify: Arc<Notify>,
    ) -> Self {
        Self {
            storage,
            transport,
            composer,
            notify,
        }
    }

    pub async fn list_dlq(
        &self,
        pipeline_id: Option<&str>,
        page: Page,
    ) -> Result<Paginated<DlqItem>> {
        self.storage.list_dlq(pipeline_id, page).await
    }

    pub async fn get_dlq(&self, id: &str) -> Result<DlqItem> {
        self.storage
            .find_dlq_item(id)
            .await?
            .map(Into::into)
            .ok_or_else(|| AfftrackError::not_found(format!("DLQ item 不存在: {}", id)))
    }

    /// 手动重放：为失败的单个步骤新建 execution
    pub async fn replay_dlq(&self, id: &str) -> Result<WebhookExecution> {
        let item = self
            .storage
            .find_dlq_item(id)
            .await?
            .ok_or_else(|| AfftrackError::not_found(format!("DLQ item 不存在: {}", id)))?;

        let steps = self.storage.active_steps(&item.pipeline_id).await?;
        let still_active = steps
            .get(item.step_index.max(0) as usize)
            .is_some_and(|s| s.id == item.step_id);
        if !still_active {
            return Err(AfftrackError::validation(format!(
                "step {} is no longer active in pipeline {}",
                item.step_id, item.pipeline_id
            )));
        }

        let correlation_id = self
            .storage
            .find_execution(&item.execution_id)
            .await?
            .and_then(|e| e.correlation_id);
        let execution = self
            .storage
            .insert_execution(
                &item.pipeline_id,
                &item.trigger_type,
                correlation_id.as_deref(),
                &item.payload,
                steps.len() as i32,
                Some(item.step_index),
            )
            .await?;
        self.storage.mark_dlq_replayed(&item.id).await?;
        self.notify.notify_one();

        info!(
            "DLQ item {} replayed as execution {} (step {})",
            item.id, execution.id, item.step_index
        );
        Ok(execution.into())
    }

    pub async fn delete_dlq(&self, id: &str) -> Result<()> {
        if !self.storage.delete_dlq_item(id).await? {
            return Err(AfftrackError::not_found(format!("DLQ item 不存在: {}", id)));
        }
        info!("DLQ item {} deleted", id);
        Ok(())
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: Page,
    ) -> Result<Paginated<WebhookExecution>> {
        self.storage.list_executions(filter, page).await
    }

    pub async fn get_execution(&self, id: &str) -> Result<ExecutionDetail> {
        let execution = self
            .storage
            .find_execution(id)
            .await?
            .ok_or_else(|| AfftrackError::not_found(format!("execution 不存在: {}", id)))?;
        let steps = self
            .storage
            .step_results(id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        Ok(ExecutionDetail {
            execution: execution.into(),
            steps,
        })
    }

    /// 渲染、签名并发送一次；不重试、不落库
    pub async fn test_step(
        &self,
        step_id: &str,
        data: Option<Map<String, Value>>,
    ) -> Result<StepTestResult> {
        let step = self
            .storage
            .find_step(step_id)
            .await?
            .ok_or_else(|| AfftrackError::not_found(format!("step 不存在: {}", step_id)))?;
        let pipeline = self
            .storage
            .find_pipeline(&step.pipeline_id)
            .await?
            .ok_or_else(|| {
                AfftrackError::not_found(format!("pipeline 不存在: {}", step.pipeline_id))
            })?;
        let trigger =
            TriggerType::from_str(&pipeline.trigger_type).unwrap_or(TriggerType::Conversion);

        let test_id = format!("test-{}", uuid::Uuid::new_v4());
        let now = Utc::now();
        let data = data.unwrap_or_else(|| sample_data(trigger));
        let ctx = build_context(
            &data,
            &ExecutionMeta {
                execution_id: &test_id,
                pipeline_id: &pipeline.id,
                correlation_id: None,
                now,
            },
        );
        let request = self.composer.compose(
            &step,
            default_template(trigger),
            &ctx,
            &Attempt {
                execution_id: &test_id,
                pipeline_id: &pipeline.id,
                step_index: step.step_order,
                attempt: 1,
                advertiser_id: pipeline.advertiser_id.as_deref(),
                now,
            },
        )?;
        let request_url = request.url.clone();

        let mut unresolved = Vec::new();
        let templates = [
            Some(step.url.as_str()),
            Some(step.body_template.as_deref().unwrap_or(default_template(trigger))),
            step.headers.as_deref(),
        ];
        for template in templates.into_iter().flatten() {
            for key in unresolved_placeholders(template, &ctx) {
                if !unresolved.contains(&key) {
                    unresolved.push(key);
                }
            }
        }
        if !unresolved.is_empty() {
            debug!("Step {} references unknown placeholders: {:?}", step.id, unresolved);
        }

        let started = std::time::Instant::now();
        Ok(match self.transport.send(request).await {
            Ok(resp) => StepTestResult {
                success: resp.is_success(),
                status_code: Some(resp.status),
                latency_ms: resp.duration.as_millis() as u64,
                error: (!resp.is_success()).then(|| format!("HTTP {}", resp.status)),
                request_url,
                unresolved,
            },
            Err(e) => StepTestResult {
                success: false,
                status_code: None,
                latency_ms: started.elapsed().as_millis() as u64,
                error: Some(format!("{:#}", e)),
                request_url,
                unresolved,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_data_covers_every_namespace() {
        let data = sample_data(TriggerType::Fraud);
        for ns in ["click", "conversion", "offer", "user_offer", "postback", "fraud"] {
            assert!(data.contains_key(ns), "missing {}", ns);
        }
        assert_eq!(data["trigger"], "fraud");
    }

    #[test]
    fn sample_data_resolves_default_templates() {
        for trigger in [
            TriggerType::Click,
            TriggerType::Conversion,
            TriggerType::Postback,
            TriggerType::Fraud,
        ] {
            let ctx = build_context(
                &sample_data(trigger),
                &ExecutionMeta {
                    execution_id: "e1",
                    pipeline_id: "p1",
                    correlation_id: None,
                    now: Utc::now(),
                },
            );
            assert!(
                unresolved_placeholders(default_template(trigger), &ctx).is_empty(),
                "{}",
                trigger
            );
        }
    }
}
