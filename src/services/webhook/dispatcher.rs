//! Event → webhook execution
//!
//! `emit` 立即返回，execution 的写入在独立任务里马上进行，不经过内存队列。
//! 每个命中的 pipeline 写入一条 execution，然后唤醒 worker；
//! 关闭时 `drain` 等待仍在写入的事件落盘。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::{debug, error, trace};

use super::events::{EventSink, WebhookEvent};
use crate::errors::Result;
use crate::storage::SeaOrmStorage;

use migration::entities::{webhook_execution, webhook_pipeline};

/// 选出事件应触发的 pipeline
///
/// 只取最具体的一层：offer 级 > advertiser 级 > 全局。
/// 输入已按 priority 排序，输出保持顺序。
pub fn select_pipelines(
    pipelines: Vec<webhook_pipeline::Model>,
    offer_id: Option<&str>,
    advertiser_id: Option<&str>,
) -> Vec<webhook_pipeline::Model> {
    let mut offer_scoped = Vec::new();
    let mut advertiser_scoped = Vec::new();
    let mut global = Vec::new();

    for p in pipelines {
        match (p.offer_id.as_deref(), p.advertiser_id.as_deref()) {
            (Some(o), _) => {
                if Some(o) == offer_id {
                    offer_scoped.push(p);
                }
            }
            (None, Some(a)) => {
                if Some(a) == advertiser_id {
                    advertiser_scoped.push(p);
                }
            }
            (None, None) => global.push(p),
        }
    }

    if !offer_scoped.is_empty() {
        offer_scoped
    } else if !advertiser_scoped.is_empty() {
        advertiser_scoped
    } else {
        global
    }
}

pub struct WebhookDispatcher {
    storage: Arc<SeaOrmStorage>,
    notify: Arc<Notify>,
    /// 尚未写完的事件数
    in_flight: AtomicUsize,
    idle: Notify,
}

/// 写入任务结束（包括 panic）时计数减一
struct InFlight(Arc<WebhookDispatcher>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl WebhookDispatcher {
    pub fn new(storage: Arc<SeaOrmStorage>, notify: Arc<Notify>) -> Self {
        Self {
            storage,
            notify,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn sink(self: &Arc<Self>) -> Arc<DispatchSink> {
        Arc::new(DispatchSink {
            dispatcher: self.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// 等待所有已 emit 的事件写入 execution
    pub async fn drain(&self) {
        loop {
            let idle = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// 为事件写入 execution 记录并唤醒 worker
    pub async fn enqueue(&self, event: &WebhookEvent) -> Result<Vec<webhook_execution::Model>> {
        let candidates = self.storage.active_pipelines_for_trigger(event.trigger).await?;
        let selected = select_pipelines(
            candidates,
            event.offer_id.as_deref(),
            event.advertiser_id.as_deref(),
        );
        if selected.is_empty() {
            trace!("No webhook pipeline for {} event", event.trigger);
            return Ok(Vec::new());
        }

        let payload = serde_json::to_string(&event.payload())?;
        let mut executions = Vec::with_capacity(selected.len());
        for pipeline in selected {
            let steps = self.storage.active_steps(&pipeline.id).await?;
            if steps.is_empty() {
                debug!("Pipeline {} has no active steps, skipping", pipeline.id);
                continue;
            }
            let execution = self
                .storage
                .insert_execution(
                    &pipeline.id,
                    event.trigger.as_str(),
                    event.correlation_id.as_deref(),
                    &payload,
                    steps.len() as i32,
                    None,
                )
                .await?;
            debug!(
                "Queued webhook execution {} for pipeline {} ({})",
                execution.id, pipeline.name, event.trigger
            );
            executions.push(execution);
        }

        if !executions.is_empty() {
            self.notify.notify_one();
        }
        Ok(executions)
    }
}

pub struct DispatchSink {
    dispatcher: Arc<WebhookDispatcher>,
}

impl EventSink for DispatchSink {
    fn emit(&self, event: WebhookEvent) {
        let dispatcher = self.dispatcher.clone();
        dispatcher.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(dispatcher.clone());
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = dispatcher.enqueue(&event).await {
                error!(
                    "Failed to queue webhook executions for {} event {:?}: {}",
                    event.trigger, event.correlation_id, e
                );
            }
        });
    }
}
