use serde::{Deserialize, Serialize};

/// 静态配置（从 TOML 加载，启动时使用）
///
/// - server: 服务器地址、端口、CPU 数量
/// - database: 数据库连接与重试
/// - cache: 防重放 / 去重使用的存储
/// - logging: 日志配置
/// - tracking / geoip / bot: 点击链路
/// - attribution: postback 归因
/// - webhook: 投递流水线
/// - rate_limit / admin: HTTP 接口
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > config.toml > 默认值
    /// ENV 前缀：AFF，分隔符：__
    /// 示例：AFF__SERVER__PORT=9999
    pub fn load_from(path: &str) -> Self {
        use config::{Config, Environment, File};

        let builder = Config::builder()
            // 1. 从 TOML 文件加载（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 从环境变量覆盖
            .add_source(
                Environment::with_prefix("AFF")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tracking.trusted_proxies")
                    .with_list_parse_key("bot.datacenter_cidrs")
                    .with_list_parse_key("webhook.retry.schedule_secs")
                    .try_parsing(true),
            );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<StaticConfig>() {
                Ok(config) => {
                    if std::path::Path::new(path).exists() {
                        eprintln!("[INFO] Configuration loaded from: {}", path);
                    }
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] Failed to deserialize config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to build config: {}", e);
                Self::default()
            }
        }
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        let sample_config = Self::default();
        toml::to_string_pretty(&sample_config)
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: usize,
}

/// 数据库连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_database_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_database_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// 点击 / 转化写入的超时上限
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// 缓存系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// memory | redis
    #[serde(rename = "type")]
    #[serde(default = "default_cache_type")]
    pub cache_type: String,
    /// test-and-set 的超时上限
    #[serde(default = "default_cache_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

/// 内存缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_capacity")]
    pub max_capacity: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

/// 点击追踪配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// 链接签名密钥（HMAC-SHA256）
    #[serde(default)]
    pub link_secret: String,
    #[serde(default = "default_link_ttl_secs")]
    pub link_ttl_secs: u64,
    /// 允许的未来时间偏差
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
    /// 是否接受只有 tracking code 的旧格式链接
    #[serde(default = "default_true")]
    pub allow_legacy_links: bool,
    #[serde(default)]
    pub fallback_url: Option<String>,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    /// 重定向时追加的 click id 参数名，空字符串表示不追加
    #[serde(default = "default_click_id_param")]
    pub click_id_param: String,
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    #[serde(default = "default_true")]
    pub store_ip: bool,
}

/// GeoIP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// MaxMindDB 文件路径 (GeoLite2-City.mmdb)
    #[serde(default)]
    pub maxminddb_path: Option<String>,
    /// 外部 GeoIP API URL，使用 {ip} 作为占位符
    #[serde(default = "default_geoip_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub use_external_api: bool,
}

/// Bot 检测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 分数达到该值视为 bot
    #[serde(default = "default_bot_score_threshold")]
    pub score_threshold: u32,
    /// 置信度高于该值才拦截
    #[serde(default = "default_bot_block_confidence")]
    pub block_confidence: f64,
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u64,
    #[serde(default = "default_datacenter_cidrs")]
    pub datacenter_cidrs: Vec<String>,
}

/// 归因配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    #[serde(default = "default_signature_window_secs")]
    pub signature_window_secs: i64,
    #[serde(default)]
    pub require_signature: bool,
}

/// Webhook 投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_webhook_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,
    #[serde(default = "default_jwt_ttl_secs")]
    pub jwt_ttl_secs: i64,
    #[serde(default)]
    pub default_signing_key: String,
    #[serde(default)]
    pub retry: WebhookRetryConfig,
}

/// 重试策略
///
/// `schedule_secs` 非空时按表取值，否则按指数退避计算。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_schedule_secs")]
    pub schedule_secs: Vec<u64>,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_clicks_per_minute")]
    pub clicks_per_minute: u32,
    #[serde(default = "default_postbacks_per_minute")]
    pub postbacks_per_minute: u32,
}

/// 管理接口配置，token 为空时禁用
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    #[serde(default)]
    pub token: String,
}

// ============================================================
// Default value functions
// ============================================================

fn default_true() -> bool {
    true
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_cpu_count() -> usize {
    num_cpus::get()
}

fn default_database_url() -> String {
    "sqlite://afftrack.db?mode=rwc".to_string()
}

fn default_database_pool_size() -> u32 {
    10
}

fn default_database_timeout() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_write_timeout_ms() -> u64 {
    1500
}

fn default_cache_type() -> String {
    "memory".to_string()
}

fn default_cache_timeout_ms() -> u64 {
    250
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_key_prefix() -> String {
    "afftrack:".to_string()
}

fn default_memory_capacity() -> u64 {
    100_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

fn default_link_ttl_secs() -> u64 {
    300
}

fn default_clock_skew_secs() -> u64 {
    60
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_click_id_param() -> String {
    "click_id".to_string()
}

fn default_geoip_api_url() -> String {
    "http://ip-api.com/json/{ip}?fields=countryCode,city".to_string()
}

fn default_bot_score_threshold() -> u32 {
    70
}

fn default_bot_block_confidence() -> f64 {
    0.85
}

fn default_burst_window_secs() -> u64 {
    10
}

fn default_burst_limit() -> u64 {
    20
}

fn default_datacenter_cidrs() -> Vec<String> {
    [
        "104.16.0.0/12",
        "172.64.0.0/13",
        "34.0.0.0/8",
        "35.0.0.0/8",
        "52.0.0.0/8",
        "54.0.0.0/8",
        "13.0.0.0/8",
        "20.0.0.0/8",
        "157.240.0.0/16",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_window_days() -> i64 {
    30
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_signature_window_secs() -> i64 {
    300
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> u64 {
    32
}

fn default_webhook_timeout_ms() -> u64 {
    30_000
}

fn default_jwt_issuer() -> String {
    "afftok-webhooks".to_string()
}

fn default_jwt_ttl_secs() -> i64 {
    300
}

fn default_max_attempts() -> u32 {
    6
}

fn default_retry_schedule_secs() -> Vec<u64> {
    vec![0, 5, 10, 30, 60, 300]
}

fn default_initial_delay_ms() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_clicks_per_minute() -> u32 {
    30
}

fn default_postbacks_per_minute() -> u32 {
    100
}

// ============================================================
// Default implementations
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            cpu_count: default_cpu_count(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_database_pool_size(),
            timeout: default_database_timeout(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            timeout_ms: default_cache_timeout_ms(),
            redis: RedisConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_memory_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            link_secret: String::new(),
            link_ttl_secs: default_link_ttl_secs(),
            clock_skew_secs: default_clock_skew_secs(),
            allow_legacy_links: true,
            fallback_url: None,
            dedup_window_secs: default_dedup_window_secs(),
            click_id_param: default_click_id_param(),
            trusted_proxies: Vec::new(),
            store_ip: true,
        }
    }
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maxminddb_path: None,
            api_url: default_geoip_api_url(),
            use_external_api: false,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            score_threshold: default_bot_score_threshold(),
            block_confidence: default_bot_block_confidence(),
            burst_window_secs: default_burst_window_secs(),
            burst_limit: default_burst_limit(),
            datacenter_cidrs: default_datacenter_cidrs(),
        }
    }
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            default_currency: default_currency(),
            signature_window_secs: default_signature_window_secs(),
            require_signature: false,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_pool_size: default_worker_pool_size(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            default_timeout_ms: default_webhook_timeout_ms(),
            jwt_issuer: default_jwt_issuer(),
            jwt_ttl_secs: default_jwt_ttl_secs(),
            default_signing_key: String::new(),
            retry: WebhookRetryConfig::default(),
        }
    }
}

impl Default for WebhookRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            schedule_secs: default_retry_schedule_secs(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clicks_per_minute: default_clicks_per_minute(),
            postbacks_per_minute: default_postbacks_per_minute(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses_back() {
        let sample = StaticConfig::generate_sample_config();
        let parsed: StaticConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.server.port, 8080);
        assert_eq!(parsed.webhook.retry.schedule_secs, vec![0, 5, 10, 30, 60, 300]);
        assert_eq!(parsed.bot.datacenter_cidrs.len(), 9);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let parsed: StaticConfig = toml::from_str(
            r#"
            [tracking]
            link_secret = "s3cret"
            link_ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(parsed.tracking.link_secret, "s3cret");
        assert_eq!(parsed.tracking.link_ttl_secs, 60);
        assert_eq!(parsed.tracking.dedup_window_secs, 300);
        assert_eq!(parsed.attribution.window_days, 30);
        assert_eq!(parsed.cache.cache_type, "memory");
    }
}
