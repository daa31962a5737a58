//! Outbound HTTP transport
//!
//! `WebhookTransport` 是 worker 与网络之间的接缝，测试里替换为脚本化实现。
//! 默认实现基于 ureq（同步），在 spawn_blocking 中执行；
//! 按超时时间缓存 Agent，避免每次请求重建连接池。

use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;
use ureq::Agent;

/// 响应体只保留前若干字节用于错误信息
const BODY_SNIPPET_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timeout: Duration,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub duration: Duration,
    pub body_snippet: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 网络错误、超时返回 Err；收到任意 HTTP 响应都返回 Ok
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: WebhookRequest) -> anyhow::Result<WebhookResponse>;
}

#[derive(Default)]
pub struct UreqTransport {
    agents: DashMap<u64, Agent>,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn agent_for(&self, timeout: Duration) -> Agent {
        let key = timeout.as_millis() as u64;
        self.agents
            .entry(key)
            .or_insert_with(|| {
                Agent::config_builder()
                    .timeout_global(Some(timeout))
                    .http_status_as_error(false)
                    .build()
                    .into()
            })
            .clone()
    }

    fn send_blocking(agent: Agent, request: WebhookRequest) -> anyhow::Result<WebhookResponse> {
        let started = Instant::now();
        let method = request.method.to_ascii_uppercase();

        let result = match method.as_str() {
            "GET" | "DELETE" => {
                let mut builder = if method == "GET" {
                    agent.get(&request.url)
                } else {
                    agent.delete(&request.url)
                };
                for (k, v) in &request.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.call()
            }
            "POST" | "PUT" | "PATCH" => {
                let mut builder = match method.as_str() {
                    "POST" => agent.post(&request.url),
                    "PUT" => agent.put(&request.url),
                    _ => agent.patch(&request.url),
                };
                for (k, v) in &request.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                builder.send(request.body.as_bytes())
            }
            other => return Err(anyhow!("unsupported HTTP method: {}", other)),
        };

        let mut resp = result.with_context(|| format!("{} {} failed", method, request.url))?;
        let status = resp.status().as_u16();
        let mut body_snippet = resp.body_mut().read_to_string().unwrap_or_default();
        if body_snippet.len() > BODY_SNIPPET_LIMIT {
            let mut cut = BODY_SNIPPET_LIMIT;
            while !body_snippet.is_char_boundary(cut) {
                cut -= 1;
            }
            body_snippet.truncate(cut);
        }

        Ok(WebhookResponse {
            status,
            duration: started.elapsed(),
            body_snippet,
        })
    }
}

#[async_trait]
impl WebhookTransport for UreqTransport {
    async fn send(&self, request: WebhookRequest) -> anyhow::Result<WebhookResponse> {
        trace!("Webhook {} {}", request.method, request.url);
        let agent = self.agent_for(request.timeout);
        tokio::task::spawn_blocking(move || Self::send_blocking(agent, request))
            .await
            .context("webhook transport task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = WebhookRequest {
            method: "POST".into(),
            url: "http://localhost".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: String::new(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn agents_are_cached_per_timeout() {
        let transport = UreqTransport::new();
        transport.agent_for(Duration::from_secs(1));
        transport.agent_for(Duration::from_secs(1));
        transport.agent_for(Duration::from_secs(2));
        assert_eq!(transport.agents.len(), 2);
    }

    #[tokio::test]
    async fn unsupported_method_is_an_error() {
        let transport = UreqTransport::new();
        let result = transport
            .send(WebhookRequest {
                method: "TRACE".into(),
                url: "http://127.0.0.1:9".into(),
                headers: vec![],
                body: String::new(),
                timeout: Duration::from_millis(100),
            })
            .await;
        assert!(result.is_err());
    }
}
