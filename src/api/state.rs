//! Shared handler state

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::services::webhook::DeliveryAdmin;
use crate::services::{ApiKeyService, AttributionService, ClickService};
use crate::storage::SeaOrmStorage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<SeaOrmStorage>,
    pub clicks: Arc<ClickService>,
    pub attribution: Arc<AttributionService>,
    pub api_keys: Arc<ApiKeyService>,
    pub deliveries: Arc<DeliveryAdmin>,
    pub trusted_proxies: Arc<Vec<String>>,
    pub started_at: DateTime<Utc>,
}
