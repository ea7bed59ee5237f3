//! Benchmarks for route derivation
//!
//! Every relayed request parses its capture and builds a backend URL.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Method;
use url::Url;

use relay_core::{RouteCapture, RouteDescriptor};

fn bench_capture_parse(c: &mut Criterion) {
    c.bench_function("capture_parse", |b| {
        b.iter(|| RouteCapture::parse(black_box(Some("/accounts/42/invoices/2024-01"))))
    });
}

fn bench_backend_url(c: &mut Criterion) {
    let base = Url::parse("https://api.example.com").unwrap();
    let mut group = c.benchmark_group("backend_url");

    for (label, query) in [
        ("no_query", None),
        ("short_query", Some("limit=5")),
        ("long_query", Some("limit=50&cursor=eyJpZCI6MTIzfQ&sort=-created&filter=open&q=a%20b")),
    ] {
        group.bench_function(BenchmarkId::new("derive", label), |b| {
            b.iter(|| {
                let route = RouteDescriptor::from_parts(
                    RouteCapture::parse(Some("/accounts/42/invoices")),
                    black_box(query),
                    Method::GET,
                    Bytes::new(),
                )
                .unwrap();
                route.backend_url(&base).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_capture_parse, bench_backend_url);
criterion_main!(benches);
