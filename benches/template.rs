//! Webhook 模板渲染基准测试

use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::{Map, Value, json};
use std::hint::black_box;

use afftrack::services::webhook::template::{
    ExecutionMeta, build_context, default_template, placeholders, render, render_json,
    unresolved_placeholders,
};
use afftrack::storage::TriggerType;

fn conversion_data() -> Map<String, Value> {
    let value = json!({
        "conversion": {
            "id": "conv-1",
            "click_id": "click-1",
            "amount": 49.99,
            "commission": 7.5,
            "currency": "USD",
            "status": "pending",
        },
        "offer": { "id": "offer-1", "advertiser_id": "adv-1" },
        "user": { "id": "user-1" },
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn bench_build_context(c: &mut Criterion) {
    let data = conversion_data();
    let meta = ExecutionMeta {
        execution_id: "exec-1",
        pipeline_id: "pipe-1",
        correlation_id: Some("conv-1"),
        now: Utc::now(),
    };

    c.bench_function("template/build_context", |b| {
        b.iter(|| build_context(black_box(&data), &meta));
    });
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("template/render");
    let meta = ExecutionMeta {
        execution_id: "exec-1",
        pipeline_id: "pipe-1",
        correlation_id: None,
        now: Utc::now(),
    };
    let ctx = build_context(&conversion_data(), &meta);

    let default = default_template(TriggerType::Conversion);
    group.bench_function("default_conversion", |b| {
        b.iter(|| render_json(black_box(default), &ctx));
    });

    let custom = r#"{"txn":"{{conversion.id}}","payout":{{conversion.commission}},"missing":"{{nope.path}}"}"#;
    group.bench_function("custom_with_missing", |b| {
        b.iter(|| render(black_box(custom), &ctx));
    });

    let plain = "no placeholders here at all";
    group.bench_function("no_placeholders", |b| {
        b.iter(|| render(black_box(plain), &ctx));
    });

    group.finish();
}

fn bench_placeholders(c: &mut Criterion) {
    let default = default_template(TriggerType::Conversion);
    c.bench_function("template/placeholders", |b| {
        b.iter(|| placeholders(black_box(default)));
    });

    let ctx = build_context(
        &conversion_data(),
        &ExecutionMeta {
            execution_id: "exec-1",
            pipeline_id: "pipe-1",
            correlation_id: None,
            now: Utc::now(),
        },
    );
    c.bench_function("template/unresolved", |b| {
        b.iter(|| unresolved_placeholders(black_box(default), &ctx));
    });
}

criterion_group!(benches, bench_build_context, bench_render, bench_placeholders);
criterion_main!(benches);
