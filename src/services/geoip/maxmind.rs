//! 本地 GeoLite2-City.mmdb 查询，不产生网络请求

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use maxminddb::Reader;
use tracing::trace;

use super::provider::{GeoInfo, GeoIpLookup};

pub struct MaxMindProvider {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindProvider {
    pub fn new(path: &str) -> Result<Self, maxminddb::MaxMindDbError> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

#[async_trait]
impl GeoIpLookup for MaxMindProvider {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let ip_addr: IpAddr = ip.parse().ok()?;
        let record: maxminddb::geoip2::City = self.reader.lookup(ip_addr).ok()?.decode().ok()??;

        let info = GeoInfo {
            country: record.country.iso_code.map(String::from),
            city: record.city.names.english.map(|s| s.to_string()),
        };
        trace!("MaxMind lookup for {}: {:?}", ip, info);

        // 库里没有任何信息时视为未命中
        if info.country.is_none() && info.city.is_none() {
            return None;
        }
        Some(info)
    }

    fn name(&self) -> &'static str {
        "MaxMind"
    }
}
