//! `{{namespace.field}}` template rendering
//!
//! 纯函数：`(template, context) → String`。
//! - 路径逐级在 JSON 对象中查找，数组支持数字下标
//! - 字符串原样输出，数字 / 布尔 `to_string`，null 或缺失输出空串
//! - 对象 / 数组输出 JSON
//! - 未闭合的 `{{` 原样保留
//!
//! `render_json` 用于内置默认模板，替换值一律按 JSON 编码。

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::storage::TriggerType;

// 默认模板用 `render_json` 渲染：占位符不带引号，替换为值的 JSON 编码
pub const DEFAULT_CONVERSION_TEMPLATE: &str = r#"{
  "event": "conversion",
  "conversion_id": {{conversion.id}},
  "external_id": {{conversion.external_id}},
  "click_id": {{conversion.click_id}},
  "amount": {{conversion.amount}},
  "commission": {{conversion.commission}},
  "currency": {{conversion.currency}},
  "status": {{conversion.status}},
  "user_offer_id": {{user_offer.id}},
  "offer_id": {{offer.id}},
  "timestamp": {{timestamp}},
  "correlation_id": {{correlation_id}}
}"#;

pub const DEFAULT_CLICK_TEMPLATE: &str = r#"{
  "event": "click",
  "click_id": {{click.id}},
  "ip": {{click.ip}},
  "user_agent": {{click.user_agent}},
  "country": {{click.country}},
  "device": {{click.device}},
  "user_offer_id": {{user_offer.id}},
  "offer_id": {{offer.id}},
  "timestamp": {{timestamp}},
  "correlation_id": {{correlation_id}}
}"#;

pub const DEFAULT_POSTBACK_TEMPLATE: &str = r#"{
  "event": "postback",
  "conversion_id": {{conversion.id}},
  "transaction_id": {{postback.transaction_id}},
  "amount": {{conversion.amount}},
  "status": {{postback.status}},
  "offer_id": {{offer.id}},
  "timestamp": {{timestamp}},
  "correlation_id": {{correlation_id}}
}"#;

pub const DEFAULT_FRAUD_TEMPLATE: &str = r#"{
  "event": "fraud",
  "kind": {{fraud.kind}},
  "ip": {{fraud.ip}},
  "tracking_code": {{fraud.tracking_code}},
  "offer_id": {{fraud.offer_id}},
  "details": {{fraud.details}},
  "timestamp": {{timestamp}},
  "correlation_id": {{correlation_id}}
}"#;

pub fn default_template(trigger: TriggerType) -> &'static str {
    match trigger {
        TriggerType::Click => DEFAULT_CLICK_TEMPLATE,
        TriggerType::Conversion => DEFAULT_CONVERSION_TEMPLATE,
        TriggerType::Postback => DEFAULT_POSTBACK_TEMPLATE,
        TriggerType::Fraud => DEFAULT_FRAUD_TEMPLATE,
    }
}

/// 执行级别的顶层字段
#[derive(Debug, Clone)]
pub struct ExecutionMeta<'a> {
    pub execution_id: &'a str,
    pub pipeline_id: &'a str,
    pub correlation_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// 事件数据 + 顶层字段 → 模板上下文
pub fn build_context(data: &Map<String, Value>, meta: &ExecutionMeta<'_>) -> Value {
    let mut ctx = data.clone();
    ctx.insert("timestamp".into(), json!(meta.now.timestamp()));
    ctx.insert("timestamp_iso".into(), json!(meta.now.to_rfc3339()));
    ctx.insert(
        "correlation_id".into(),
        json!(meta.correlation_id.unwrap_or(meta.execution_id)),
    );
    ctx.insert("task_id".into(), json!(meta.execution_id));
    ctx.insert("execution_id".into(), json!(meta.execution_id));
    ctx.insert("pipeline_id".into(), json!(meta.pipeline_id));
    Value::Object(ctx)
}

fn lookup<'v>(ctx: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(ctx, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn format_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn format_json(value: Option<&Value>) -> String {
    value.unwrap_or(&Value::Null).to_string()
}

/// 步骤模板：字符串原样替换
pub fn render(template: &str, ctx: &Value) -> String {
    substitute(template, ctx, format_value)
}

/// 默认模板：每个占位符替换为 JSON 值（字符串带引号并转义，缺失为 `null`）
pub fn render_json(template: &str, ctx: &Value) -> String {
    substitute(template, ctx, format_json)
}

fn substitute(template: &str, ctx: &Value, format: fn(Option<&Value>) -> String) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                out.push_str(&format(lookup(ctx, key)));
                rest = &after[end + 2..];
            }
            None => {
                // 未闭合：剩余部分原样输出
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// 模板中引用的所有占位符（去重，按出现顺序）
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let key = after[..end].trim().to_string();
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
        rest = &after[end + 2..];
    }
    keys
}

/// 在上下文中找不到的占位符（值为 null 视为已解析）
pub fn unresolved_placeholders(template: &str, ctx: &Value) -> Vec<String> {
    placeholders(template)
        .into_iter()
        .filter(|key| lookup(ctx, key).is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Value {
        json!({
            "conversion": {"id": "c1", "amount": 49.99, "approved": true, "tags": ["a", "b"], "meta": {"k": "v"}},
            "click": {"id": "k1", "country": null},
            "timestamp": 1700000000
        })
    }

    #[test]
    fn substitutes_nested_paths() {
        let out = render("id={{conversion.id}} amt={{ conversion.amount }} ts={{timestamp}}", &ctx());
        assert_eq!(out, "id=c1 amt=49.99 ts=1700000000");
    }

    #[test]
    fn missing_and_null_render_empty() {
        assert_eq!(render("[{{click.country}}][{{nope.x}}][{{click.id.deeper}}]", &ctx()), "[][][]");
    }

    #[test]
    fn non_scalar_values_render_as_json() {
        assert_eq!(render("{{conversion.tags}}", &ctx()), r#"["a","b"]"#);
        assert_eq!(render("{{conversion.meta}}", &ctx()), r#"{"k":"v"}"#);
        assert_eq!(render("{{conversion.tags.1}}", &ctx()), "b");
        assert_eq!(render("{{conversion.approved}}", &ctx()), "true");
    }

    #[test]
    fn unclosed_placeholder_is_literal() {
        assert_eq!(render("a {{conversion.id}} b {{oops", &ctx()), "a c1 b {{oops");
        assert_eq!(render("no placeholders", &ctx()), "no placeholders");
    }

    #[test]
    fn default_templates_render_valid_json() {
        let data = json!({
            "conversion": {"id": "c1", "external_id": "T1", "amount": 10, "commission": 2.5, "currency": "USD", "status": "pending"},
            "offer": {"id": "o1"},
            "user_offer": {"id": "uo1"}
        });
        let meta = ExecutionMeta {
            execution_id: "e1",
            pipeline_id: "p1",
            correlation_id: Some("c1"),
            now: Utc::now(),
        };
        let ctx = build_context(data.as_object().unwrap(), &meta);
        let body = render_json(default_template(TriggerType::Conversion), &ctx);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["conversion_id"], "c1");
        assert_eq!(parsed["amount"], 10);
        assert_eq!(parsed["correlation_id"], "c1");
        assert!(parsed["click_id"].is_null());
    }

    #[test]
    fn default_click_template_escapes_hostile_strings() {
        let ua = r#"Mozilla/5.0 "quoted" \ back\slash", "injected": "yes"#;
        let data = json!({
            "click": {"id": "k1", "ip": "203.0.113.9", "user_agent": ua, "country": null},
            "offer": {"id": "o1"}
        });
        let meta = ExecutionMeta {
            execution_id: "e1",
            pipeline_id: "p1",
            correlation_id: None,
            now: Utc::now(),
        };
        let ctx = build_context(data.as_object().unwrap(), &meta);
        for trigger in [TriggerType::Click, TriggerType::Conversion, TriggerType::Postback, TriggerType::Fraud] {
            let body = render_json(default_template(trigger), &ctx);
            assert!(serde_json::from_str::<Value>(&body).is_ok(), "{} body: {}", trigger, body);
        }

        let body = render_json(default_template(TriggerType::Click), &ctx);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["user_agent"], ua);
        assert!(parsed.get("injected").is_none());
        assert!(parsed["country"].is_null());
        assert!(parsed["user_offer_id"].is_null());
    }

    #[test]
    fn unresolved_placeholders_ignore_null_values() {
        assert_eq!(
            unresolved_placeholders("{{click.id}} {{click.country}} {{click.city}} {{nope}}", &ctx()),
            vec!["click.city".to_string(), "nope".to_string()]
        );
    }

    #[test]
    fn context_has_execution_fields() {
        let meta = ExecutionMeta {
            execution_id: "e1",
            pipeline_id: "p1",
            correlation_id: None,
            now: Utc::now(),
        };
        let ctx = build_context(&Map::new(), &meta);
        assert_eq!(render("{{task_id}}/{{pipeline_id}}/{{correlation_id}}", &ctx), "e1/p1/e1");
    }

    #[test]
    fn placeholder_extraction() {
        assert_eq!(
            placeholders("{{a.b}} {{ c }} {{a.b}} {{unclosed"),
            vec!["a.b".to_string(), "c".to_string()]
        );
    }
}
