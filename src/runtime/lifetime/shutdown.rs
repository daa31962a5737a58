use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::runtime::lifetime::startup::StartupContext;
use crate::services::webhook::WebhookDispatcher;
use crate::storage::SeaOrmStorage;

/// 关闭超时时间（秒）
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// 等待 webhook worker 落盘的超时时间（秒）
const TASK_TIMEOUT_SECS: u64 = 10;

pub async fn listen_for_shutdown() {
    // 等待 Ctrl+C 信号
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, draining webhook deliveries...");
        }
        Err(e) => {
            warn!(
                "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
                e
            );
        }
    }
}

/// 等待事件写完 execution、通知 worker 停止并等待在途投递落盘，然后关闭连接池
pub async fn perform_shutdown(startup: StartupContext) {
    let StartupContext {
        storage,
        worker,
        dispatcher,
        shutdown_tx,
        ..
    } = startup;
    let result = timeout(
        Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        perform_shutdown_tasks(storage, dispatcher, shutdown_tx, worker),
    )
    .await;

    match result {
        Ok(()) => info!("All shutdown tasks completed successfully"),
        Err(_) => error!(
            "Shutdown tasks timed out after {} seconds! Forcing exit.",
            SHUTDOWN_TIMEOUT_SECS
        ),
    }
}

async fn perform_shutdown_tasks(
    storage: Arc<SeaOrmStorage>,
    dispatcher: Option<Arc<WebhookDispatcher>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
) {
    if let Some(dispatcher) = dispatcher {
        let pending = dispatcher.in_flight();
        match timeout(Duration::from_secs(TASK_TIMEOUT_SECS), dispatcher.drain()).await {
            Ok(()) => info!("Webhook events persisted ({} were in flight)", pending),
            Err(_) => error!(
                "{} webhook events were not persisted within {} seconds",
                dispatcher.in_flight(),
                TASK_TIMEOUT_SECS
            ),
        }
    }

    let _ = shutdown_tx.send(true);

    if let Some(handle) = worker {
        match timeout(Duration::from_secs(TASK_TIMEOUT_SECS), handle).await {
            Ok(Ok(())) => info!("Webhook worker drained"),
            Ok(Err(e)) => error!("Webhook worker task failed: {}", e),
            Err(_) => error!(
                "Webhook worker drain timed out after {} seconds, pending attempts resume on next start",
                TASK_TIMEOUT_SECS
            ),
        }
    }

    if let Err(e) = storage.close().await {
        error!("Failed to close database pool: {}", e);
    }
}
