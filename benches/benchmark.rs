use criterion::{black_box, criterion_group, criterion_main, Criterion};
use courier::{
    event::{trigger::merge_params, Callback},
    message::{Message, MethodSchema, ParamKind},
    Address, Params, Request,
};
use serde_json::json;

fn sample_params() -> Params {
    let mut params = Params::new();
    params.insert("monitorId".to_string(), json!("3f0c6a"));
    params.insert("result".to_string(), json!({"temperature": 21.5, "unit": "C"}));
    params
}

fn bench_request_codec(c: &mut Criterion) {
    let request = Request::call("callbackPush", sample_params()).unwrap();
    let payload = request.encode().unwrap();

    c.bench_function("request encode", |b| b.iter(|| black_box(&request).encode()));
    c.bench_function("message decode", |b| {
        b.iter(|| Message::decode(black_box(&payload)))
    });
}

fn bench_schema_validation(c: &mut Criterion) {
    let schema = MethodSchema::new("callbackPush")
        .optional("result", ParamKind::Any)
        .param("monitorId", ParamKind::String);
    let params = sample_params();

    c.bench_function("schema validate", |b| {
        b.iter(|| schema.validate(black_box(&params)))
    });
}

fn bench_merge_params(c: &mut Criterion) {
    let mut stored = Params::new();
    stored.insert("$push".to_string(), json!({"monitorId": "3f0c6a", "method": "read"}));
    let subscription = Callback {
        id: "sub-1".to_string(),
        url: Address::local("display"),
        method: "doPush".to_string(),
        params: Some(stored),
    };
    let mut event = Params::new();
    event.insert("value".to_string(), json!(21.5));

    c.bench_function("merge subscription params", |b| {
        b.iter(|| merge_params(black_box(&subscription), black_box(&event)))
    });
}

criterion_group!(
    benches,
    bench_request_codec,
    bench_schema_validation,
    bench_merge_params
);
criterion_main!(benches);
