//! User-Agent 解析（woothee）

use woothee::parser::Parser;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUserAgent {
    /// desktop / mobile / bot / appliance / unknown
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    /// woothee 识别为 crawler
    pub is_crawler: bool,
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn parse_user_agent(ua: &str) -> ParsedUserAgent {
    if ua.trim().is_empty() {
        return ParsedUserAgent::default();
    }

    let result = Parser::new().parse(ua).unwrap_or_default();
    let device = match result.category {
        "pc" => "desktop",
        "smartphone" | "mobilephone" => "mobile",
        "crawler" => "bot",
        "appliance" => "appliance",
        _ => "unknown",
    };

    ParsedUserAgent {
        device: Some(device.to_string()),
        browser: known(result.name),
        os: known(result.os),
        is_crawler: result.category == "crawler",
    }
}
