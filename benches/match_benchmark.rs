//! Hot-path benchmark: compile a synthetic rule set once, then measure
//! match_request throughput over a mixed URL workload.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ubx::{compile_filter_lists, Engine};

fn build_engine() -> Engine {
    let mut list = String::new();
    for i in 0..2000 {
        list.push_str(&format!("||tracker{:04}.test^\n", i));
    }
    for i in 0..500 {
        list.push_str(&format!("/pixel{:03}/*$image\n", i));
    }
    list.push_str("@@||news.example.com^$document\n");
    list.push_str("*$removeparam=gclid\n");
    list.push_str("##.ad\n");

    let out = compile_filter_lists(&[list.as_str()]).expect("compile");
    let engine = Engine::new();
    engine.init(out.snapshot).expect("init");
    engine
}

fn bench_match_request(c: &mut Criterion) {
    let engine = build_engine();
    let urls = [
        ("https://tracker0042.test/collect.js", "script"),
        ("https://cdn.shop.example.com/app/main.css", "stylesheet"),
        ("https://img.news.example.com/photo.jpg", "image"),
        ("https://tracker1999.test/p.gif", "image"),
        ("https://api.shop.example.com/v1/items?page=2", "xmlhttprequest"),
    ];

    c.bench_function("match_request_mixed", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let (url, kind) = urls[i % urls.len()];
            i += 1;
            black_box(engine.match_request(
                black_box(url),
                kind,
                Some("https://shop.example.com/"),
                1,
                0,
                i as u64,
            ))
        })
    });
}

fn bench_cosmetics(c: &mut Criterion) {
    let engine = build_engine();
    c.bench_function("match_cosmetics", |b| {
        b.iter(|| {
            black_box(engine.match_cosmetics(
                black_box("https://shop.example.com/"),
                "main_frame",
                None,
                1,
                0,
                1,
            ))
        })
    });
}

criterion_group!(benches, bench_match_request, bench_cosmetics);
criterion_main!(benches);
