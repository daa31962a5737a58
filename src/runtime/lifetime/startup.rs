use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::cache::create_reservation_store;
use crate::config::StaticConfig;
use crate::services::webhook::{
    DeliveryAdmin, EventSink, NullEventSink, RequestComposer, RetryPolicy, UreqTransport,
    WebhookDispatcher, WebhookSigner, WebhookTransport, WebhookWorker, WorkerOptions,
};
use crate::services::{ApiKeyService, AttributionService, ClickService, GeoIpProvider, ReplayGuard};
use crate::storage::{SeaOrmStorage, StorageFactory};

pub struct StartupContext {
    pub state: AppState,
    pub storage: Arc<SeaOrmStorage>,
    pub worker: Option<JoinHandle<()>>,
    /// 关闭时等待事件写完 execution
    pub dispatcher: Option<Arc<WebhookDispatcher>>,
    pub shutdown_tx: watch::Sender<bool>,
}

/// 准备服务器启动的上下文
/// 包括存储、预留存储、各业务服务以及 webhook worker
pub async fn prepare_server_startup() -> Result<StartupContext> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install rustls crypto provider: {:?}", e))?;

    let config = crate::config::get_config();

    let storage = StorageFactory::create()
        .await
        .context("Failed to create storage backend")?;
    info!("Using storage backend: {}", storage.backend_name());

    let transport: Arc<dyn WebhookTransport> = Arc::new(UreqTransport::new());
    let context = assemble(&config, storage, transport).await?;

    info!(
        "Pre-startup processing completed in {} ms",
        start_time.elapsed().as_millis()
    );
    Ok(context)
}

/// 在已连接的存储之上组装全部服务
///
/// webhook 启用时会恢复中断的 execution 并启动 worker。
pub async fn assemble(
    config: &StaticConfig,
    storage: Arc<SeaOrmStorage>,
    transport: Arc<dyn WebhookTransport>,
) -> Result<StartupContext> {
    let reservations = create_reservation_store(&config.cache)
        .await
        .context("Failed to create reservation store")?;
    let replay_guard = Arc::new(ReplayGuard::new(
        reservations,
        Duration::from_millis(config.cache.timeout_ms),
    ));
    let geoip = Arc::new(GeoIpProvider::new(&config.geoip));

    let notify = Arc::new(Notify::new());
    let dispatcher = config
        .webhook
        .enabled
        .then(|| Arc::new(WebhookDispatcher::new(storage.clone(), notify.clone())));
    let events: Arc<dyn EventSink> = match &dispatcher {
        Some(dispatcher) => dispatcher.sink(),
        None => {
            warn!("Webhook delivery is disabled, events will be dropped");
            Arc::new(NullEventSink)
        }
    };

    let clicks = Arc::new(ClickService::new(
        config,
        storage.clone(),
        replay_guard.clone(),
        geoip,
        events.clone(),
    ));
    let attribution = Arc::new(AttributionService::new(
        &config.attribution,
        storage.clone(),
        replay_guard,
        events,
    ));
    let api_keys = Arc::new(ApiKeyService::new(storage.clone()));

    let signer = Arc::new(WebhookSigner::from_config(&config.webhook));
    let composer = Arc::new(RequestComposer::new(
        signer,
        Duration::from_millis(config.webhook.default_timeout_ms),
    ));
    let deliveries = Arc::new(DeliveryAdmin::new(
        storage.clone(),
        transport.clone(),
        composer.clone(),
        notify.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = if config.webhook.enabled {
        let recovered = storage
            .recover_in_flight_executions()
            .await
            .context("Failed to recover in-flight webhook executions")?;
        if recovered > 0 {
            warn!("Recovered {} interrupted webhook executions", recovered);
        }

        let worker = Arc::new(WebhookWorker::new(
            storage.clone(),
            transport,
            composer,
            RetryPolicy::from_config(&config.webhook.retry),
            WorkerOptions::from_config(&config.webhook),
            notify,
        ));
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        None
    };

    let state = AppState {
        storage: storage.clone(),
        clicks,
        attribution,
        api_keys,
        deliveries,
        trusted_proxies: Arc::new(config.tracking.trusted_proxies.clone()),
        started_at: Utc::now(),
    };

    Ok(StartupContext {
        state,
        storage,
        worker,
        dispatcher,
        shutdown_tx,
    })
}
