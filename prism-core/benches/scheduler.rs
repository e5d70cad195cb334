//! Scheduler benchmarks: raw ingest throughput, computed cascades and the
//! coalesced notification pass.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use prism_core::reactive::{SubscribeConfig, SubscriptionTarget};
use prism_core::Prism;

fn state_set(c: &mut Criterion) {
    let ctx = Prism::new();
    let state = ctx.state(json!(0));
    let mut i = 0i64;

    c.bench_function("state_set", |b| {
        b.iter(|| {
            i += 1;
            state.set(json!(black_box(i)));
        })
    });
}

fn computed_cascade(c: &mut Criterion) {
    let ctx = Prism::new();
    let source = ctx.state(json!(0));

    // A chain of five derived values, each reading the previous one.
    let mut upstream = ctx.computed({
        let source = source.clone();
        move |_| json!(source.value().as_i64().unwrap() + 1)
    });
    for _ in 0..4 {
        let previous = upstream.clone();
        upstream = ctx.computed(move |_| json!(previous.value().as_i64().unwrap() + 1));
    }

    let mut i = 0i64;
    c.bench_function("computed_cascade_depth_5", |b| {
        b.iter(|| {
            i += 1;
            source.set(json!(black_box(i)));
        })
    });
}

fn notify_flush(c: &mut Criterion) {
    let ctx = Prism::new();
    let state = ctx.state(json!(0));
    ctx.sub_controller().subscribe_with_array(
        &ctx,
        SubscriptionTarget::callback(|| {}),
        &[state.observer()],
        SubscribeConfig::default(),
    );

    let mut i = 0i64;
    c.bench_function("set_and_flush", |b| {
        b.iter(|| {
            i += 1;
            state.set(json!(black_box(i)));
            ctx.flush();
        })
    });
}

criterion_group!(benches, state_set, computed_cascade, notify_flush);
criterion_main!(benches);
