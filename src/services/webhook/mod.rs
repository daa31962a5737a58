//! Webhook delivery pipeline
//!
//! 事件 → dispatcher 写入 execution → worker 按步骤投递（重试 / failover / 死信）。

pub mod delivery;
pub mod dispatcher;
pub mod dlq;
pub mod events;
pub mod retry;
pub mod signing;
pub mod template;
pub mod transport;
pub mod worker;

pub use delivery::RequestComposer;
pub use dispatcher::{DispatchSink, WebhookDispatcher};
pub use dlq::{DeliveryAdmin, ExecutionDetail, StepTestResult};
pub use events::{EventSink, NullEventSink, RecordingEventSink, WebhookEvent};
pub use retry::RetryPolicy;
pub use signing::WebhookSigner;
pub use transport::{UreqTransport, WebhookRequest, WebhookResponse, WebhookTransport};
pub use worker::{WebhookWorker, WorkerOptions};
