//! Service layer
//!
//! HTTP handlers、CLI 与后台任务共用的业务逻辑。

pub mod api_keys;
pub mod attribution;
pub mod click_service;
pub mod geoip;
pub mod link_signing;
pub mod policy;
pub mod replay_guard;
pub mod webhook;

pub use api_keys::{ApiKeyService, AuthenticatedKey};
pub use attribution::{AttributionService, ConversionReceipt, PostbackRequest};
pub use click_service::{ClickAction, ClickDisposition, ClickOutcome, ClickRequest, ClickService};
pub use geoip::{GeoInfo, GeoIpLookup, GeoIpProvider};
pub use link_signing::{LinkReason, LinkSigner, LinkValidation};
pub use replay_guard::{Reservation, ReplayGuard};
