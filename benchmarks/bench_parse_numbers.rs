use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use loadstat::buffer::CharBuffer;
use loadstat::numbers::{parse_double, parse_int, parse_long};
use loadstat::registry::RecordTypeRegistry;

fn bench_parse_int_fast_path(c: &mut Criterion) {
    let text = CharBuffer::from("R,Home,1711962000123,20").view(7, 13);
    c.bench_function("parse_long_fast_path", |b| {
        b.iter(|| {
            black_box(parse_long(black_box(&text)).ok());
        });
    });

    let code = CharBuffer::from("200");
    c.bench_function("parse_int_fast_path", |b| {
        b.iter(|| {
            black_box(parse_int(black_box(&code)).ok());
        });
    });
}

fn bench_parse_int_vs_std(c: &mut Criterion) {
    let text = CharBuffer::from("1711962000123");
    c.bench_function("parse_long_via_std", |b| {
        b.iter(|| {
            black_box(black_box(&text).to_text().parse::<i64>().ok());
        });
    });
}

fn bench_parse_double(c: &mut Criterion) {
    let fast = CharBuffer::from("1234.567");
    c.bench_function("parse_double_fast_path", |b| {
        b.iter(|| {
            black_box(parse_double(black_box(&fast)).ok());
        });
    });

    let fallback = CharBuffer::from("1.234567e3");
    c.bench_function("parse_double_fallback", |b| {
        b.iter(|| {
            black_box(parse_double(black_box(&fallback)).ok());
        });
    });
}

fn bench_create_request_record(c: &mut Criterion) {
    let registry = RecordTypeRegistry::standard();
    let line = CharBuffer::from(
        "R,Checkout.3,1711962000123,42,false,1021,5320,200,https://shop.example/checkout,text/html,POST",
    );
    let mut fields = Vec::with_capacity(32);
    c.bench_function("create_request_record", |b| {
        b.iter(|| {
            black_box(registry.create_from_line_with(black_box(&line), &mut fields).ok());
        });
    });
}

criterion_group!(
    benches,
    bench_parse_int_fast_path,
    bench_parse_int_vs_std,
    bench_parse_double,
    bench_create_request_record
);
criterion_main!(benches);
