use criterion::{black_box, criterion_group, criterion_main, Criterion};

use postshot::cache_probe::cache_key;
use postshot::request::{parse_path, QueryParams, RenderRequest};

const FULL_QUERY: &str = "hideCard=1&hideThread=true&scale=1.5&lang=zh-Hant&theme=dark&tz=-5&t2iSkipSensitiveWarning=1";

fn bench_validate(c: &mut Criterion) {
    c.bench_function("validate_full_query", |b| {
        b.iter(|| {
            let path = parse_path(black_box("/1585449374071148544.png")).unwrap();
            let query = QueryParams::parse(Some(black_box(FULL_QUERY)));
            RenderRequest::validate(path, &query).unwrap()
        })
    });
}

fn bench_cache_key(c: &mut Criterion) {
    let request = RenderRequest::validate(
        parse_path("/1585449374071148544.jpg").unwrap(),
        &QueryParams::parse(Some(FULL_QUERY)),
    )
    .unwrap();
    c.bench_function("cache_key_full_query", |b| {
        b.iter(|| cache_key(black_box(&request)))
    });
}

criterion_group!(benches, bench_validate, bench_cache_key);
criterion_main!(benches);
