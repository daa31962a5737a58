//! Background delivery worker
//!
//! - 轮询 + Notify 唤醒，抢占到期的 execution（pending / retrying）
//! - Semaphore 限制并发 execution 数量
//! - 同一 execution 内步骤严格按顺序投递
//! - 每次尝试后持久化进度，进程重启不丢失重试

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{Notify, Semaphore, watch};
use tracing::{debug, error, info, warn};

use super::delivery::{Attempt, RequestComposer};
use super::retry::RetryPolicy;
use super::template::{ExecutionMeta, build_context, default_template};
use super::transport::{WebhookRequest, WebhookTransport};
use crate::config::WebhookConfig;
use crate::errors::Result;
use crate::storage::{
    ExecutionProgress, ExecutionStatus, SeaOrmStorage, StepResultUpdate, StepStatus, TriggerType,
};

use migration::entities::{webhook_execution, webhook_pipeline, webhook_step};

/// 处理出错（存储故障等）后多久再试
const ERROR_RETRY_DELAY_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub pool_size: usize,
    pub poll_interval: Duration,
    pub batch_size: u64,
}

impl WorkerOptions {
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            pool_size: config.worker_pool_size.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            batch_size: config.batch_size.max(1),
        }
    }
}

/// 单次尝试的结果
struct AttemptResult {
    request: Option<WebhookRequest>,
    status_code: Option<i32>,
    duration_ms: Option<i64>,
    error: Option<String>,
}

impl AttemptResult {
    fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

pub struct WebhookWorker {
    storage: Arc<SeaOrmStorage>,
    transport: Arc<dyn WebhookTransport>,
    composer: Arc<RequestComposer>,
    retry: RetryPolicy,
    options: WorkerOptions,
    semaphore: Arc<Semaphore>,
    notify: Arc<Notify>,
}

impl WebhookWorker {
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        transport: Arc<dyn WebhookTransport>,
        composer: Arc<RequestComposer>,
        retry: RetryPolicy,
        options: WorkerOptions,
        notify: Arc<Notify>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(options.pool_size)),
            storage,
            transport,
            composer,
            retry,
            options,
            notify,
        }
    }

    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// 主循环，`shutdown` 置为 true 后退出并等待在途 execution 落盘
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Webhook worker started (pool size {}, poll every {:?})",
            self.options.pool_size, self.options.poll_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.dispatch_due().await {
                error!("Webhook worker poll failed: {}", e);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        // 拿到全部 permit 即表示在途任务都已结束
        let _ = self
            .semaphore
            .acquire_many(self.options.pool_size as u32)
            .await;
        info!("Webhook worker stopped");
    }

    /// 抢占到期 execution 并各自 spawn 处理，返回本轮启动的数量
    pub async fn dispatch_due(self: &Arc<Self>) -> Result<usize> {
        let available = self.semaphore.available_permits() as u64;
        if available == 0 {
            return Ok(0);
        }

        let claimed = self
            .storage
            .claim_due_executions(Utc::now(), available.min(self.options.batch_size))
            .await?;
        let count = claimed.len();

        for execution in claimed {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(self);
            tokio::spawn(async move {
                let _ = worker.process_or_release(execution).await;
                drop(permit);
            });
        }
        Ok(count)
    }

    /// 在当前任务中串行处理，直到没有到期的 execution
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        loop {
            let claimed = self
                .storage
                .claim_due_executions(Utc::now(), self.options.batch_size)
                .await?;
            if claimed.is_empty() {
                return Ok(processed);
            }
            for execution in claimed {
                processed += 1;
                self.process_or_release(execution).await?;
            }
        }
    }

    /// 出错时把 execution 放回 retrying，避免停在 delivering 直到重启
    async fn process_or_release(&self, execution: webhook_execution::Model) -> Result<()> {
        let id = execution.id.clone();
        let Err(e) = self.process_execution(execution).await else {
            return Ok(());
        };
        error!("Webhook execution {} failed: {}", id, e);

        let retry_at = Utc::now() + chrono::Duration::seconds(ERROR_RETRY_DELAY_SECS);
        match self
            .storage
            .release_execution(&id, retry_at, &e.to_string())
            .await
        {
            Ok(true) => warn!("Webhook execution {} released, retrying at {}", id, retry_at),
            Ok(false) => debug!("Webhook execution {} was no longer delivering", id),
            Err(release_err) => error!(
                "Failed to release webhook execution {}: {}; it resumes on next start",
                id, release_err
            ),
        }
        Err(e)
    }

    pub async fn process_execution(&self, execution: webhook_execution::Model) -> Result<()> {
        let Some(pipeline) = self.storage.find_pipeline(&execution.pipeline_id).await? else {
            warn!(
                "Pipeline {} of execution {} no longer exists",
                execution.pipeline_id, execution.id
            );
            return self
                .finish(
                    &execution,
                    ExecutionStatus::DeadLettered,
                    execution.current_step,
                    Some("pipeline not found".into()),
                )
                .await;
        };
        let steps = self.storage.active_steps(&pipeline.id).await?;

        let payload: Value = serde_json::from_str(&execution.payload)?;
        let data = match payload.get("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let advertiser_id = payload
            .get("advertiser_id")
            .and_then(Value::as_str)
            .map(String::from);
        let trigger =
            TriggerType::from_str(&execution.trigger_type).unwrap_or(TriggerType::Conversion);
        let ctx = build_context(
            &data,
            &ExecutionMeta {
                execution_id: &execution.id,
                pipeline_id: &pipeline.id,
                correlation_id: execution.correlation_id.as_deref(),
                now: Utc::now(),
            },
        );

        let first = execution.only_step.unwrap_or(0).max(0) as usize;
        let end = match execution.only_step {
            Some(i) => (i.max(0) as usize + 1).min(steps.len()),
            None => steps.len(),
        };
        let mut index = (execution.current_step.max(0) as usize).max(first);
        let mut attempts_made = execution.attempt.max(0);
        let mut last_error: Option<String> = None;

        while index < end {
            let step = &steps[index];
            let step_index = index as i32;

            loop {
                attempts_made += 1;
                let result = self
                    .attempt(
                        &execution,
                        &pipeline,
                        step,
                        step_index,
                        attempts_made,
                        trigger,
                        &ctx,
                        advertiser_id.as_deref(),
                    )
                    .await;

                if result.succeeded() {
                    self.record_step(
                        &execution,
                        step,
                        step_index,
                        StepStatus::Delivered,
                        attempts_made,
                        &result,
                        None,
                    )
                    .await?;
                    debug!(
                        "Execution {} step {} delivered (attempt {})",
                        execution.id, step_index, attempts_made
                    );
                    break;
                }

                last_error = result.error.clone();
                if !self.retry.is_exhausted(attempts_made as u32) {
                    let delay = self.retry.delay_for_attempt(attempts_made as u32 + 1);
                    if delay.is_zero() {
                        self.record_step(
                            &execution,
                            step,
                            step_index,
                            StepStatus::Retrying,
                            attempts_made,
                            &result,
                            None,
                        )
                        .await?;
                        continue;
                    }

                    let next = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    self.record_step(
                        &execution,
                        step,
                        step_index,
                        StepStatus::Retrying,
                        attempts_made,
                        &result,
                        Some(next),
                    )
                    .await?;
                    self.storage
                        .update_execution(
                            &execution.id,
                            &ExecutionProgress {
                                status: ExecutionStatus::Retrying,
                                current_step: step_index,
                                attempt: attempts_made,
                                next_attempt_at: Some(next),
                                last_error: last_error.clone(),
                                completed_at: None,
                            },
                        )
                        .await?;
                    debug!(
                        "Execution {} step {} will retry in {:?} (attempt {} failed: {:?})",
                        execution.id, step_index, delay, attempts_made, last_error
                    );
                    return Ok(());
                }

                let final_status = self
                    .exhaust(&execution, &pipeline, step, step_index, attempts_made, &result)
                    .await?;

                if step.stop_on_failure {
                    for skipped in (index + 1)..end {
                        self.storage
                            .upsert_step_result(&StepResultUpdate {
                                execution_id: execution.id.clone(),
                                step_id: steps[skipped].id.clone(),
                                step_index: skipped as i32,
                                status: StepStatus::Skipped.to_string(),
                                attempt_count: 0,
                                last_status_code: None,
                                last_error: Some(format!("step {} {}", step_index, final_status)),
                                last_duration_ms: None,
                                next_retry_at: None,
                            })
                            .await?;
                    }
                    index = end;
                }
                break;
            }

            index = index.max(step_index as usize + 1);
            attempts_made = 0;
            if index < end {
                self.storage
                    .update_execution(
                        &execution.id,
                        &ExecutionProgress {
                            status: ExecutionStatus::Delivering,
                            current_step: index as i32,
                            attempt: 0,
                            next_attempt_at: None,
                            last_error: last_error.clone(),
                            completed_at: None,
                        },
                    )
                    .await?;
            }
        }

        let status = self.terminal_status(&execution.id, first, end).await?;
        self.finish(&execution, status, end as i32, last_error).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        execution: &webhook_execution::Model,
        pipeline: &webhook_pipeline::Model,
        step: &webhook_step::Model,
        step_index: i32,
        attempt: i32,
        trigger: TriggerType,
        ctx: &Value,
        advertiser_id: Option<&str>,
    ) -> AttemptResult {
        let composed = self.composer.compose(
            step,
            default_template(trigger),
            ctx,
            &Attempt {
                execution_id: &execution.id,
                pipeline_id: &pipeline.id,
                step_index,
                attempt,
                advertiser_id,
                now: Utc::now(),
            },
        );
        let request = match composed {
            Ok(r) => r,
            Err(e) => {
                return AttemptResult {
                    request: None,
                    status_code: None,
                    duration_ms: None,
                    error: Some(e.to_string()),
                };
            }
        };
        self.send(request).await
    }

    async fn send(&self, request: WebhookRequest) -> AttemptResult {
        match self.transport.send(request.clone()).await {
            Ok(resp) => AttemptResult {
                status_code: Some(resp.status as i32),
                duration_ms: Some(resp.duration.as_millis() as i64),
                error: (!resp.is_success()).then(|| {
                    if resp.body_snippet.is_empty() {
                        format!("HTTP {}", resp.status)
                    } else {
                        format!("HTTP {}: {}", resp.status, resp.body_snippet)
                    }
                }),
                request: Some(request),
            },
            Err(e) => AttemptResult {
                request: Some(request),
                status_code: None,
                duration_ms: None,
                error: Some(format!("{:#}", e)),
            },
        }
    }

    /// 重试耗尽：尝试 failover，失败则写入死信
    async fn exhaust(
        &self,
        execution: &webhook_execution::Model,
        pipeline: &webhook_pipeline::Model,
        step: &webhook_step::Model,
        step_index: i32,
        attempts: i32,
        last: &AttemptResult,
    ) -> Result<StepStatus> {
        if let (Some(failover_url), Some(original)) = (
            pipeline.failover_url.as_deref().filter(|u| !u.is_empty()),
            last.request.as_ref(),
        ) {
            let request =
                self.composer
                    .failover_request(original, failover_url, &step.signature_mode);
            let result = self.send(request).await;
            if result.succeeded() {
                warn!(
                    "Execution {} step {} failed over to {}",
                    execution.id, step_index, failover_url
                );
                self.record_step(
                    execution,
                    step,
                    step_index,
                    StepStatus::FailedOver,
                    attempts,
                    &result,
                    None,
                )
                .await?;
                return Ok(StepStatus::FailedOver);
            }
            warn!(
                "Failover for execution {} step {} failed: {:?}",
                execution.id, step_index, result.error
            );
        }

        let request_url = last
            .request
            .as_ref()
            .map(|r| r.url.clone())
            .unwrap_or_else(|| step.url.clone());
        let item = self
            .storage
            .insert_dlq_item(
                execution,
                &step.id,
                step_index,
                &request_url,
                last.error.clone(),
                last.status_code,
                attempts,
            )
            .await?;
        warn!(
            "Execution {} step {} dead-lettered after {} attempts (DLQ {})",
            execution.id, step_index, attempts, item.id
        );
        self.record_step(
            execution,
            step,
            step_index,
            StepStatus::DeadLettered,
            attempts,
            last,
            None,
        )
        .await?;
        Ok(StepStatus::DeadLettered)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_step(
        &self,
        execution: &webhook_execution::Model,
        step: &webhook_step::Model,
        step_index: i32,
        status: StepStatus,
        attempts: i32,
        result: &AttemptResult,
        next_retry_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        self.storage
            .upsert_step_result(&StepResultUpdate {
                execution_id: execution.id.clone(),
                step_id: step.id.clone(),
                step_index,
                status: status.to_string(),
                attempt_count: attempts,
                last_status_code: result.status_code,
                last_error: result.error.clone(),
                last_duration_ms: result.duration_ms,
                next_retry_at,
            })
            .await
    }

    /// 任一步骤进入死信 → dead_lettered；全部送达 → delivered；否则 failed_over
    async fn terminal_status(
        &self,
        execution_id: &str,
        first: usize,
        end: usize,
    ) -> Result<ExecutionStatus> {
        let results = self.storage.step_results(execution_id).await?;
        let statuses: Vec<StepStatus> = results
            .iter()
            .filter(|r| (r.step_index as usize) >= first && (r.step_index as usize) < end)
            .filter_map(|r| StepStatus::from_str(&r.status).ok())
            .collect();

        Ok(if statuses.contains(&StepStatus::DeadLettered) {
            ExecutionStatus::DeadLettered
        } else if statuses.iter().all(|s| *s == StepStatus::Delivered) {
            ExecutionStatus::Delivered
        } else {
            ExecutionStatus::FailedOver
        })
    }

    async fn finish(
        &self,
        execution: &webhook_execution::Model,
        status: ExecutionStatus,
        current_step: i32,
        last_error: Option<String>,
    ) -> Result<()> {
        self.storage
            .update_execution(
                &execution.id,
                &ExecutionProgress {
                    status,
                    current_step,
                    attempt: 0,
                    next_attempt_at: None,
                    last_error,
                    completed_at: Some(Utc::now()),
                },
            )
            .await?;
        info!("Webhook execution {} finished: {}", execution.id, status);
        Ok(())
    }
}
