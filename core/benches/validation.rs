//! Validator throughput benchmarks.
//!
//! Run with: `cargo bench -p engagement-core`

#![allow(missing_docs)]
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use engagement_core::EventValidator;
use serde_json::{json, Value};

fn facebook_bottom(i: usize) -> Value {
    json!({
        "eventId": format!("fb_bottom_{i}"),
        "timestamp": "2025-09-01T12:00:00Z",
        "source": "facebook",
        "funnelStage": "bottom",
        "eventType": "checkout.complete",
        "data": {
            "user": {
                "userId": format!("u{i}"),
                "name": "Jane",
                "age": 28,
                "gender": "female",
                "location": { "country": "US", "city": "NYC" }
            },
            "engagement": {
                "adId": "ad_1",
                "campaignId": "cmp_1",
                "clickPosition": "center",
                "device": "mobile",
                "browser": "Safari",
                "purchaseAmount": "99.99"
            }
        }
    })
}

fn tiktok_top_invalid(i: usize) -> Value {
    json!({
        "eventId": format!("ttk_top_{i}"),
        "timestamp": "2025-09-01T12:00:00Z",
        "source": "tiktok",
        "funnelStage": "top",
        "eventType": "purchase",
        "data": {
            "user": { "userId": format!("t{i}"), "username": "x", "followers": -3 },
            "engagement": {
                "watchTime": 3,
                "percentageWatched": 140,
                "device": "Windows",
                "country": "DE",
                "videoId": "v"
            }
        }
    })
}

fn bench_validate(c: &mut Criterion) {
    let validator = EventValidator::new();
    let mut group = c.benchmark_group("validate_batch");

    for size in [10_usize, 100, 1_000] {
        let batch: Vec<Value> = (0..size)
            .map(|i| if i % 4 == 0 { tiktok_top_invalid(i) } else { facebook_bottom(i) })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| validator.validate(black_box(batch)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_validate);
criterion_main!(benches);
