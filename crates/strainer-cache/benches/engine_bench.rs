use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Request, Response, StatusCode};

use strainer_cache::{origin_fn, BoxError, CacheEngine, MetaBucket, StoredEntry};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn get(path: &str) -> Request<Bytes> {
    Request::get(format!("http://bench.local{path}"))
        .header(header::USER_AGENT, "criterion/0.5")
        .body(Bytes::new())
        .unwrap()
}

fn bench_hit_path(c: &mut Criterion) {
    let rt = runtime();
    let engine = CacheEngine::builder(origin_fn(|_req| async {
        let mut res = Response::new(Bytes::from(vec![b'x'; 4096]));
        res.headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
        Ok::<_, BoxError>(res)
    }))
    .build();

    rt.block_on(async {
        for i in 0..1_000 {
            engine.call(get(&format!("/item/{i}"))).await.unwrap();
        }
    });

    let mut group = c.benchmark_group("engine");
    group.bench_function("hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 1_000;
            let res = rt.block_on(engine.call(get(&format!("/item/{i}")))).unwrap();
            black_box(res);
        });
    });
    group.bench_function("pass", |b| {
        b.iter(|| {
            let req = Request::post("http://bench.local/form")
                .body(Bytes::from_static(b"a=1"))
                .unwrap();
            black_box(rt.block_on(engine.call(req)).unwrap());
        });
    });
    group.finish();
}

fn bench_variant_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for variants in [1usize, 8, 64] {
        let mut bucket = MetaBucket::default();
        for v in 0..variants {
            let mut req = HeaderMap::new();
            req.insert(
                header::ACCEPT_LANGUAGE,
                HeaderValue::from_str(&format!("lang-{v}")).unwrap(),
            );
            let mut res = HeaderMap::new();
            res.insert(header::VARY, HeaderValue::from_static("Accept-Language"));
            bucket.upsert(StoredEntry::new(&req, StatusCode::OK, res));
        }

        // Worst case: the oldest variant sits at the end.
        let mut wanted = HeaderMap::new();
        wanted.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("lang-0"));

        group.bench_with_input(BenchmarkId::from_parameter(variants), &bucket, |b, bucket| {
            b.iter(|| black_box(bucket.resolve(black_box(&wanted)).is_some()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hit_path, bench_variant_resolution);
criterion_main!(benches);
