//! Webhook 投递流水线集成测试
//!
//! 使用临时 SQLite + 脚本化 transport，覆盖：
//! 顺序投递、重试、死信、failover、stop_on_failure、手动重放、worker 主循环。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::{Notify, watch};

use afftrack::config::{DatabaseConfig, WebhookRetryConfig};
use afftrack::services::webhook::{
    DeliveryAdmin, EventSink, RequestComposer, RetryPolicy, WebhookDispatcher, WebhookEvent,
    WebhookRequest,
    WebhookResponse, WebhookSigner, WebhookTransport, WebhookWorker, WorkerOptions,
};
use afftrack::storage::backend::SeaOrmStorage;
use afftrack::storage::{NewPipeline, NewStep, Page, TriggerType};

use migration::entities::{webhook_execution, webhook_pipeline};

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Clone, Copy)]
enum Reply {
    Status(u16),
    NetworkError,
}

/// 按 URL 返回预设响应；队列耗尽后使用该 URL 的默认响应（默认 200）
#[derive(Default)]
struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<String, Reply>>,
    sent: Mutex<Vec<WebhookRequest>>,
}

impl ScriptedTransport {
    fn queue(&self, url: &str, replies: &[Reply]) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(replies.iter().copied());
    }

    fn always(&self, url: &str, reply: Reply) {
        self.defaults.lock().unwrap().insert(url.to_string(), reply);
    }

    fn sent(&self) -> Vec<WebhookRequest> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_urls(&self) -> Vec<String> {
        self.sent().into_iter().map(|r| r.url).collect()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn send(&self, request: WebhookRequest) -> anyhow::Result<WebhookResponse> {
        let reply = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(|q| q.pop_front())
            .or_else(|| self.defaults.lock().unwrap().get(&request.url).copied())
            .unwrap_or(Reply::Status(200));
        self.sent.lock().unwrap().push(request);

        match reply {
            Reply::Status(status) => Ok(WebhookResponse {
                status,
                duration: Duration::from_millis(3),
                body_snippet: String::new(),
            }),
            Reply::NetworkError => Err(anyhow::anyhow!("connection refused")),
        }
    }
}

// =============================================================================
// Setup
// =============================================================================

const HOOK_A: &str = "https://a.example.com/hook";
const HOOK_B: &str = "https://b.example.com/hook";
const FAILOVER: &str = "https://failover.example.com/hook";

struct Harness {
    storage: Arc<SeaOrmStorage>,
    transport: Arc<ScriptedTransport>,
    composer: Arc<RequestComposer>,
    notify: Arc<Notify>,
    _dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webhooks_test.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let storage = SeaOrmStorage::new(&url, "sqlite", &DatabaseConfig::default())
            .await
            .unwrap();

        let signer = Arc::new(WebhookSigner::new("default-key", "afftok-webhooks", 300));
        Self {
            storage: Arc::new(storage),
            transport: Arc::new(ScriptedTransport::default()),
            composer: Arc::new(RequestComposer::new(signer, Duration::from_secs(5))),
            notify: Arc::new(Notify::new()),
            _dir: dir,
        }
    }

    fn worker(&self, retry: RetryPolicy) -> Arc<WebhookWorker> {
        Arc::new(WebhookWorker::new(
            self.storage.clone(),
            self.transport.clone(),
            self.composer.clone(),
            retry,
            WorkerOptions {
                pool_size: 2,
                poll_interval: Duration::from_millis(20),
                batch_size: 10,
            },
            self.notify.clone(),
        ))
    }

    fn admin(&self) -> DeliveryAdmin {
        DeliveryAdmin::new(
            self.storage.clone(),
            self.transport.clone(),
            self.composer.clone(),
            self.notify.clone(),
        )
    }

    async fn pipeline(&self, failover_url: Option<&str>) -> webhook_pipeline::Model {
        self.storage
            .create_pipeline(&NewPipeline {
                name: "conversions".into(),
                trigger: TriggerType::Conversion,
                offer_id: None,
                advertiser_id: None,
                failover_url: failover_url.map(String::from),
                priority: 0,
            })
            .await
            .unwrap()
    }

    async fn step(&self, pipeline_id: &str, order: i32, url: &str, stop_on_failure: bool) {
        let mut step = NewStep::post(pipeline_id, order, url);
        step.body_template = Some(r#"{"id":"{{conversion.id}}","amount":{{conversion.amount}}}"#.into());
        step.stop_on_failure = stop_on_failure;
        self.storage.create_step(&step).await.unwrap();
    }

    async fn fire(&self) -> webhook_execution::Model {
        let event = WebhookEvent::new(TriggerType::Conversion)
            .for_offer("offer-1", "adv-1")
            .correlated("conv-1")
            .with("conversion", json!({ "id": "conv-1", "amount": 12.5 }));
        let dispatcher = WebhookDispatcher::new(self.storage.clone(), self.notify.clone());
        let mut executions = dispatcher.enqueue(&event).await.unwrap();
        assert_eq!(executions.len(), 1);
        executions.remove(0)
    }

    async fn execution(&self, id: &str) -> webhook_execution::Model {
        self.storage.find_execution(id).await.unwrap().unwrap()
    }

    async fn step_statuses(&self, execution_id: &str) -> Vec<String> {
        self.storage
            .step_results(execution_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect()
    }
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_steps_are_delivered_in_order() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    // 故意倒序创建，投递顺序以 step_order 为准
    h.step(&pipeline.id, 2, HOOK_B, false).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;

    let execution = h.fire().await;
    let processed = h.worker(RetryPolicy::immediate(3)).drain().await.unwrap();
    assert_eq!(processed, 1);

    assert_eq!(h.transport.sent_urls(), vec![HOOK_A, HOOK_B]);
    let stored = h.execution(&execution.id).await;
    assert_eq!(stored.status, "delivered");
    assert!(stored.completed_at.is_some());
    assert_eq!(h.step_statuses(&execution.id).await, vec!["delivered", "delivered"]);

    let sent = h.transport.sent();
    let first = &sent[0];
    assert_eq!(first.body, r#"{"id":"conv-1","amount":12.5}"#);
    assert_eq!(
        first.header("X-Afftok-Delivery-ID"),
        Some(format!("{}:0", execution.id).as_str())
    );
    assert_eq!(first.header("X-Afftok-Retry-Count"), Some("0"));
    assert_eq!(first.header("Content-Type"), Some("application/json"));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;
    h.transport
        .queue(HOOK_A, &[Reply::Status(503), Reply::NetworkError]);

    let execution = h.fire().await;
    h.worker(RetryPolicy::immediate(3)).drain().await.unwrap();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].header("X-Afftok-Retry-Count"), Some("2"));

    let results = h.storage.step_results(&execution.id).await.unwrap();
    assert_eq!(results[0].status, "delivered");
    assert_eq!(results[0].attempt_count, 3);
    assert_eq!(h.execution(&execution.id).await.status, "delivered");
    assert_eq!(h.storage.count_dlq_items().await.unwrap(), 0);
}

#[tokio::test]
async fn test_delayed_retry_is_persisted_and_not_due() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;
    h.transport.always(HOOK_A, Reply::Status(500));

    let retry = RetryPolicy::from_config(&WebhookRetryConfig {
        max_attempts: 3,
        schedule_secs: vec![0, 60, 120],
        initial_delay_ms: 0,
        multiplier: 2.0,
        max_delay_ms: 0,
    });
    let execution = h.fire().await;
    h.worker(retry).drain().await.unwrap();

    // 第一次失败后进入 retrying，60 秒后才到期
    assert_eq!(h.transport.sent().len(), 1);
    let stored = h.execution(&execution.id).await;
    assert_eq!(stored.status, "retrying");
    assert_eq!(stored.attempt, 1);
    assert!(stored.next_attempt_at.unwrap() > chrono::Utc::now() + chrono::Duration::seconds(30));
    assert_eq!(h.step_statuses(&execution.id).await, vec!["retrying"]);
}

// =============================================================================
// Exhaustion
// =============================================================================

#[tokio::test]
async fn test_exhausted_step_is_dead_lettered_and_later_steps_run() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;
    h.step(&pipeline.id, 2, HOOK_B, false).await;
    h.transport.always(HOOK_A, Reply::Status(500));

    let execution = h.fire().await;
    h.worker(RetryPolicy::immediate(2)).drain().await.unwrap();

    assert_eq!(h.transport.sent_urls(), vec![HOOK_A, HOOK_A, HOOK_B]);
    assert_eq!(h.step_statuses(&execution.id).await, vec!["dead_lettered", "delivered"]);
    assert_eq!(h.execution(&execution.id).await.status, "dead_lettered");

    let dlq = h.admin().list_dlq(Some(&pipeline.id), Page::new(None, None)).await.unwrap();
    assert_eq!(dlq.total, 1);
    assert_eq!(dlq.items[0].step_index, 0);
    assert_eq!(dlq.items[0].attempts, 2);
    assert_eq!(dlq.items[0].last_status_code, Some(500));
    assert_eq!(dlq.items[0].request_url, HOOK_A);
}

#[tokio::test]
async fn test_failover_delivery_marks_step_failed_over() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(Some(FAILOVER)).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;
    h.transport.always(HOOK_A, Reply::NetworkError);

    let execution = h.fire().await;
    h.worker(RetryPolicy::immediate(2)).drain().await.unwrap();

    assert_eq!(h.transport.sent_urls(), vec![HOOK_A, HOOK_A, FAILOVER]);
    assert_eq!(h.step_statuses(&execution.id).await, vec!["failed_over"]);
    assert_eq!(h.execution(&execution.id).await.status, "failed_over");
    assert_eq!(h.storage.count_dlq_items().await.unwrap(), 0);

    // 未签名步骤在 failover 时使用默认 key 做 HMAC
    let failover = h.transport.sent().pop().unwrap();
    let signature = failover.header("X-Afftok-Signature").unwrap();
    assert!(WebhookSigner::verify_hmac("default-key", &failover.body, signature));
}

#[tokio::test]
async fn test_failed_failover_dead_letters() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(Some(FAILOVER)).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;
    h.transport.always(HOOK_A, Reply::Status(502));
    h.transport.always(FAILOVER, Reply::Status(500));

    let execution = h.fire().await;
    h.worker(RetryPolicy::immediate(1)).drain().await.unwrap();

    assert_eq!(h.step_statuses(&execution.id).await, vec!["dead_lettered"]);
    assert_eq!(h.storage.count_dlq_items().await.unwrap(), 1);
}

#[tokio::test]
async fn test_stop_on_failure_skips_remaining_steps() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, true).await;
    h.step(&pipeline.id, 2, HOOK_B, false).await;
    h.transport.always(HOOK_A, Reply::Status(400));

    let execution = h.fire().await;
    h.worker(RetryPolicy::immediate(1)).drain().await.unwrap();

    assert_eq!(h.transport.sent_urls(), vec![HOOK_A]);
    assert_eq!(h.step_statuses(&execution.id).await, vec!["dead_lettered", "skipped"]);
    assert_eq!(h.execution(&execution.id).await.status, "dead_lettered");
}

// =============================================================================
// Dead-letter administration
// =============================================================================

#[tokio::test]
async fn test_replay_redelivers_only_the_failed_step() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;
    h.step(&pipeline.id, 2, HOOK_B, false).await;
    h.transport.queue(HOOK_B, &[Reply::Status(500)]);

    let worker = h.worker(RetryPolicy::immediate(1));
    let original = h.fire().await;
    worker.drain().await.unwrap();
    assert_eq!(h.step_statuses(&original.id).await, vec!["delivered", "dead_lettered"]);

    let admin = h.admin();
    let dlq = admin.list_dlq(None, Page::new(None, None)).await.unwrap();
    let item_id = dlq.items[0].id.clone();

    let replay = admin.replay_dlq(&item_id).await.unwrap();
    assert_eq!(replay.only_step, Some(1));
    assert_eq!(replay.correlation_id.as_deref(), Some("conv-1"));

    worker.drain().await.unwrap();
    assert_eq!(h.transport.sent_urls(), vec![HOOK_A, HOOK_B, HOOK_B]);
    assert_eq!(h.execution(&replay.id).await.status, "delivered");

    let detail = admin.get_execution(&replay.id).await.unwrap();
    assert_eq!(detail.steps.len(), 1);
    assert_eq!(detail.steps[0].step_index, 1);

    let item = admin.get_dlq(&item_id).await.unwrap();
    assert_eq!(item.replay_count, 1);
    assert!(item.last_replayed_at.is_some());

    admin.delete_dlq(&item_id).await.unwrap();
    assert!(admin.get_dlq(&item_id).await.is_err());
    assert!(admin.delete_dlq(&item_id).await.is_err());
}

#[tokio::test]
async fn test_step_test_sends_once_without_persisting() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;
    h.transport.always(HOOK_A, Reply::Status(500));
    let step = h.storage.active_steps(&pipeline.id).await.unwrap().remove(0);

    let result = h.admin().test_step(&step.id, None).await.unwrap();
    assert!(!result.success);
    assert!(result.unresolved.is_empty());
    assert_eq!(result.status_code, Some(500));
    assert_eq!(h.transport.sent().len(), 1);

    let history = h
        .admin()
        .list_executions(&Default::default(), Page::new(None, None))
        .await
        .unwrap();
    assert_eq!(history.total, 0);
}

// =============================================================================
// Worker loop
// =============================================================================

#[tokio::test]
async fn test_worker_loop_delivers_and_stops_on_shutdown() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(h.worker(RetryPolicy::immediate(3)).run(shutdown_rx));

    let execution = h.fire().await;
    let mut status = String::new();
    for _ in 0..100 {
        status = h.execution(&execution.id).await.status;
        if status == "delivered" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "delivered");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_interrupted_execution_is_recovered() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;

    let execution = h.fire().await;
    // 模拟崩溃：已抢占但未完成
    let claimed = h
        .storage
        .claim_due_executions(chrono::Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(h.execution(&execution.id).await.status, "delivering");

    assert_eq!(h.storage.recover_in_flight_executions().await.unwrap(), 1);
    assert_eq!(h.execution(&execution.id).await.status, "retrying");

    h.worker(RetryPolicy::immediate(1)).drain().await.unwrap();
    assert_eq!(h.execution(&execution.id).await.status, "delivered");
}

#[tokio::test]
async fn test_emitted_events_are_persisted_before_drain_returns() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;

    let dispatcher = Arc::new(WebhookDispatcher::new(h.storage.clone(), h.notify.clone()));
    let sink = dispatcher.sink();
    for n in 0..5 {
        sink.emit(
            WebhookEvent::new(TriggerType::Conversion)
                .for_offer("offer-1", "adv-1")
                .correlated(&format!("conv-{}", n))
                .with("conversion", json!({ "id": format!("conv-{}", n), "amount": 1.0 })),
        );
    }
    drop(sink);

    tokio::time::timeout(Duration::from_secs(5), dispatcher.drain())
        .await
        .expect("dispatcher did not drain");
    assert_eq!(dispatcher.in_flight(), 0);

    let history = h
        .admin()
        .list_executions(&Default::default(), Page::new(None, None))
        .await
        .unwrap();
    assert_eq!(history.total, 5);
}

#[tokio::test]
async fn test_failed_processing_returns_execution_to_retrying() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    h.step(&pipeline.id, 1, HOOK_A, false).await;

    // payload 不是合法 JSON，处理时出错
    let execution = h
        .storage
        .insert_execution(&pipeline.id, "conversion", None, "{broken", 1, None)
        .await
        .unwrap();

    let before = chrono::Utc::now();
    assert!(h.worker(RetryPolicy::immediate(3)).drain().await.is_err());

    let stored = h.execution(&execution.id).await;
    assert_eq!(stored.status, "retrying");
    assert!(stored.next_attempt_at.unwrap() > before);
    assert!(stored.last_error.is_some());
    assert!(h.transport.sent().is_empty());

    // 未到期，不会被再次抢占
    let claimed = h
        .storage
        .claim_due_executions(chrono::Utc::now(), 10)
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn test_step_test_reports_unknown_placeholders() {
    let h = Harness::new().await;
    let pipeline = h.pipeline(None).await;
    let mut step = NewStep::post(&pipeline.id, 1, "https://a.example.com/{{offer.slug}}");
    step.body_template = Some(r#"{"id":"{{conversion.id}}","ref":"{{conversion.reference}}"}"#.into());
    let step = h.storage.create_step(&step).await.unwrap();

    let result = h.admin().test_step(&step.id, None).await.unwrap();
    assert!(result.success);
    assert_eq!(result.unresolved, vec!["offer.slug", "conversion.reference"]);
    assert_eq!(result.request_url, "https://a.example.com/");
}
