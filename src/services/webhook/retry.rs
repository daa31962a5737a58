//! Delivery retry schedule

use std::time::Duration;

use crate::config::WebhookRetryConfig;

/// attempt 从 1 开始计数
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &WebhookRetryConfig) -> Self {
        Self {
            schedule: config
                .schedule_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier.max(1.0),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// 不等待、立即重试，测试用
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            schedule: Vec::new(),
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 n 次尝试前需要等待的时间
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.schedule.first().copied().unwrap_or(Duration::ZERO);
        }
        if !self.schedule.is_empty() {
            // schedule 比 max_attempts 短时沿用最后一档
            let idx = (attempt as usize - 1).min(self.schedule.len() - 1);
            return self.schedule[idx];
        }

        let factor = self.multiplier.powi(attempt as i32 - 2);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WebhookRetryConfig::default())
    }
}
