//! Bot scoring
//!
//! 启发式打分（0-100+）：UA 特征、缺失的浏览器头、数据中心网段、同 IP 突发请求。
//! 只有 `is_bot` 且置信度超过 `block_confidence` 才拦截点击。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;

use crate::config::BotConfig;
use crate::utils::ip::ip_in_any_cidr;

const AUTOMATION_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "java/",
    "okhttp",
    "libwww",
    "httpclient",
    "axios",
    "node-fetch",
    "scrapy",
    "headless",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
];

/// 请求中与 bot 判断相关的信号
#[derive(Debug, Clone, Default)]
pub struct BotSignals<'a> {
    pub user_agent: &'a str,
    pub ip: Option<&'a str>,
    pub has_accept_language: bool,
    pub has_accept_encoding: bool,
    pub has_accept: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotVerdict {
    pub score: u32,
    pub confidence: f64,
    pub is_bot: bool,
    pub block: bool,
    pub reasons: Vec<&'static str>,
}

pub struct BotPolicy {
    config: BotConfig,
    /// IP → 窗口内请求数，条目在窗口结束后过期
    bursts: Cache<String, Arc<AtomicU64>>,
}

impl BotPolicy {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            config: config.clone(),
            bursts: Cache::builder()
                .time_to_live(Duration::from_secs(config.burst_window_secs.max(1)))
                .max_capacity(100_000)
                .build(),
        }
    }

    fn record_request(&self, ip: &str) -> u64 {
        let counter = self
            .bursts
            .get_with(ip.to_string(), || Arc::new(AtomicU64::new(0)));
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn verdict(&self, score: u32, confidence: f64, reasons: Vec<&'static str>) -> BotVerdict {
        let is_bot = score >= self.config.score_threshold;
        BotVerdict {
            score,
            confidence,
            is_bot,
            block: is_bot && confidence > self.config.block_confidence,
            reasons,
        }
    }

    pub fn evaluate(&self, signals: &BotSignals<'_>) -> BotVerdict {
        if !self.config.enabled {
            return BotVerdict {
                score: 0,
                confidence: 0.0,
                is_bot: false,
                block: false,
                reasons: Vec::new(),
            };
        }

        let burst = signals.ip.map(|ip| self.record_request(ip)).unwrap_or(0);

        let ua = signals.user_agent.trim();
        if ua.is_empty() {
            return self.verdict(100, 0.9, vec!["empty_user_agent"]);
        }

        let lower = ua.to_lowercase();
        if AUTOMATION_MARKERS.iter().any(|m| lower.contains(m)) {
            return self.verdict(100, 0.95, vec!["automation_user_agent"]);
        }

        let mut score = 0u32;
        let mut reasons = Vec::new();
        let mut add = |points: u32, reason: &'static str| {
            score += points;
            reasons.push(reason);
        };

        if !signals.has_accept_language {
            add(20, "missing_accept_language");
        }
        if !signals.has_accept_encoding {
            add(15, "missing_accept_encoding");
        }
        if !signals.has_accept {
            add(15, "missing_accept");
        }
        if ua.len() < 20 {
            add(25, "short_user_agent");
        }
        if !lower.contains("mozilla") && !lower.contains("opera") {
            add(20, "non_browser_user_agent");
        }
        if let Some(ip) = signals.ip
            && ip_in_any_cidr(ip, &self.config.datacenter_cidrs)
        {
            add(30, "datacenter_ip");
        }
        if burst > self.config.burst_limit {
            add(25, "request_burst");
        }

        let confidence = f64::from(score.min(100)) / 100.0;
        self.verdict(score, confidence, reasons)
    }
}
