use std::fmt;

#[derive(Debug, Clone)]
pub enum AfftrackError {
    CacheConnection(String),
    DatabaseConfig(String),
    DatabaseConnection(String),
    DatabaseOperation(String),
    FileOperation(String),
    Validation(String),
    NotFound(String),
    Serialization(String),
    MalformedLink(String),
    InvalidSignature(String),
    ReplayDetected(String),
    GeoBlocked(String),
    BotBlocked(String),
    InvalidApiKey(String),
    Forbidden(String),
    DuplicateConversion(String),
    InvalidStateTransition(String),
    DeliveryFailure(String),
    Signing(String),
}

impl AfftrackError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            AfftrackError::CacheConnection(_) => "E001",
            AfftrackError::DatabaseConfig(_) => "E002",
            AfftrackError::DatabaseConnection(_) => "E003",
            AfftrackError::DatabaseOperation(_) => "E004",
            AfftrackError::FileOperation(_) => "E005",
            AfftrackError::Validation(_) => "E006",
            AfftrackError::NotFound(_) => "E007",
            AfftrackError::Serialization(_) => "E008",
            AfftrackError::MalformedLink(_) => "E010",
            AfftrackError::InvalidSignature(_) => "E011",
            AfftrackError::ReplayDetected(_) => "E012",
            AfftrackError::GeoBlocked(_) => "E013",
            AfftrackError::BotBlocked(_) => "E014",
            AfftrackError::InvalidApiKey(_) => "E020",
            AfftrackError::Forbidden(_) => "E021",
            AfftrackError::DuplicateConversion(_) => "E022",
            AfftrackError::InvalidStateTransition(_) => "E023",
            AfftrackError::DeliveryFailure(_) => "E030",
            AfftrackError::Signing(_) => "E031",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            AfftrackError::CacheConnection(_) => "Cache Connection Error",
            AfftrackError::DatabaseConfig(_) => "Database Configuration Error",
            AfftrackError::DatabaseConnection(_) => "Database Connection Error",
            AfftrackError::DatabaseOperation(_) => "Database Operation Error",
            AfftrackError::FileOperation(_) => "File Operation Error",
            AfftrackError::Validation(_) => "Validation Error",
            AfftrackError::NotFound(_) => "Resource Not Found",
            AfftrackError::Serialization(_) => "Serialization Error",
            AfftrackError::MalformedLink(_) => "Malformed Link",
            AfftrackError::InvalidSignature(_) => "Invalid Signature",
            AfftrackError::ReplayDetected(_) => "Replay Detected",
            AfftrackError::GeoBlocked(_) => "Geo Blocked",
            AfftrackError::BotBlocked(_) => "Bot Blocked",
            AfftrackError::InvalidApiKey(_) => "Invalid API Key",
            AfftrackError::Forbidden(_) => "Forbidden",
            AfftrackError::DuplicateConversion(_) => "Duplicate Conversion",
            AfftrackError::InvalidStateTransition(_) => "Invalid State Transition",
            AfftrackError::DeliveryFailure(_) => "Delivery Failure",
            AfftrackError::Signing(_) => "Signing Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            AfftrackError::CacheConnection(msg)
            | AfftrackError::DatabaseConfig(msg)
            | AfftrackError::DatabaseConnection(msg)
            | AfftrackError::DatabaseOperation(msg)
            | AfftrackError::FileOperation(msg)
            | AfftrackError::Validation(msg)
            | AfftrackError::NotFound(msg)
            | AfftrackError::Serialization(msg)
            | AfftrackError::MalformedLink(msg)
            | AfftrackError::InvalidSignature(msg)
            | AfftrackError::ReplayDetected(msg)
            | AfftrackError::GeoBlocked(msg)
            | AfftrackError::BotBlocked(msg)
            | AfftrackError::InvalidApiKey(msg)
            | AfftrackError::Forbidden(msg)
            | AfftrackError::DuplicateConversion(msg)
            | AfftrackError::InvalidStateTransition(msg)
            | AfftrackError::DeliveryFailure(msg)
            | AfftrackError::Signing(msg) => msg,
        }
    }

    /// API 响应中使用的字符串错误码
    pub fn api_code(&self) -> &'static str {
        match self {
            AfftrackError::Validation(_) | AfftrackError::MalformedLink(_) => "VALIDATION_ERROR",
            AfftrackError::NotFound(_) => "NOT_FOUND",
            AfftrackError::InvalidSignature(_) | AfftrackError::ReplayDetected(_) => {
                "INVALID_SIGNATURE"
            }
            AfftrackError::InvalidApiKey(_) => "INVALID_API_KEY",
            AfftrackError::Forbidden(_)
            | AfftrackError::GeoBlocked(_)
            | AfftrackError::BotBlocked(_) => "FORBIDDEN",
            AfftrackError::DuplicateConversion(_) => "DUPLICATE_TRANSACTION",
            AfftrackError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            _ => "INTERNAL_ERROR",
        }
    }

    /// 对应的 HTTP 状态码
    pub fn http_status(&self) -> u16 {
        match self {
            AfftrackError::Validation(_) | AfftrackError::MalformedLink(_) => 400,
            AfftrackError::InvalidSignature(_)
            | AfftrackError::ReplayDetected(_)
            | AfftrackError::InvalidApiKey(_) => 401,
            AfftrackError::Forbidden(_)
            | AfftrackError::GeoBlocked(_)
            | AfftrackError::BotBlocked(_) => 403,
            AfftrackError::NotFound(_) => 404,
            AfftrackError::DuplicateConversion(_) | AfftrackError::InvalidStateTransition(_) => 409,
            _ => 500,
        }
    }

    /// 格式化为彩色输出（用于 Server 模式）
    #[cfg(feature = "server")]
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出（用于 CLI 模式）
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for AfftrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for AfftrackError {}

// 便捷的构造函数
impl AfftrackError {
    pub fn cache_connection<T: Into<String>>(msg: T) -> Self {
        AfftrackError::CacheConnection(msg.into())
    }

    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        AfftrackError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        AfftrackError::DatabaseConnection(msg.into())
    }

    pub fn database_operation<T: Into<String>>(msg: T) -> Self {
        AfftrackError::DatabaseOperation(msg.into())
    }

    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        AfftrackError::FileOperation(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        AfftrackError::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        AfftrackError::NotFound(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        AfftrackError::Serialization(msg.into())
    }

    pub fn malformed_link<T: Into<String>>(msg: T) -> Self {
        AfftrackError::MalformedLink(msg.into())
    }

    pub fn invalid_signature<T: Into<String>>(msg: T) -> Self {
        AfftrackError::InvalidSignature(msg.into())
    }

    pub fn replay_detected<T: Into<String>>(msg: T) -> Self {
        AfftrackError::ReplayDetected(msg.into())
    }

    pub fn geo_blocked<T: Into<String>>(msg: T) -> Self {
        AfftrackError::GeoBlocked(msg.into())
    }

    pub fn bot_blocked<T: Into<String>>(msg: T) -> Self {
        AfftrackError::BotBlocked(msg.into())
    }

    pub fn invalid_api_key<T: Into<String>>(msg: T) -> Self {
        AfftrackError::InvalidApiKey(msg.into())
    }

    pub fn forbidden<T: Into<String>>(msg: T) -> Self {
        AfftrackError::Forbidden(msg.into())
    }

    pub fn duplicate_conversion<T: Into<String>>(msg: T) -> Self {
        AfftrackError::DuplicateConversion(msg.into())
    }

    pub fn invalid_state_transition<T: Into<String>>(msg: T) -> Self {
        AfftrackError::InvalidStateTransition(msg.into())
    }

    pub fn delivery_failure<T: Into<String>>(msg: T) -> Self {
        AfftrackError::DeliveryFailure(msg.into())
    }

    pub fn signing<T: Into<String>>(msg: T) -> Self {
        AfftrackError::Signing(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<sea_orm::DbErr> for AfftrackError {
    fn from(err: sea_orm::DbErr) -> Self {
        AfftrackError::DatabaseOperation(err.to_string())
    }
}

impl From<std::io::Error> for AfftrackError {
    fn from(err: std::io::Error) -> Self {
        AfftrackError::FileOperation(err.to_string())
    }
}

impl From<serde_json::Error> for AfftrackError {
    fn from(err: serde_json::Error) -> Self {
        AfftrackError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for AfftrackError {
    fn from(err: redis::RedisError) -> Self {
        AfftrackError::CacheConnection(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AfftrackError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AfftrackError::Signing(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AfftrackError>;
