//! GeoIP 服务模块
//!
//! 点击没有携带国家头时，用来解析访问者国家：
//! - MaxMind GeoLite2 本地数据库
//! - 外部 API (ip-api.com)，需显式开启

mod external_api;
mod maxmind;
mod provider;

pub use provider::{GeoInfo, GeoIpLookup, GeoIpProvider};
