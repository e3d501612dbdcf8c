use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use thorax::journal::models::JournalEntry;
use thorax::transformer::transformer::{IdentityPolicy, Transformer, try_parse_timestamp};

fn sample_page(size: usize) -> Vec<JournalEntry> {
    (0..size)
        .map(|i| JournalEntry {
            entry_url: format!("https://spire.bugout.dev/journals/j/entries/{i}"),
            title: format!("entry {i}"),
            tags: vec![
                format!("client:client-{}", i % 17),
                format!("session:session-{i}"),
                format!("username:user-{}", i % 17),
                "crash".to_string(),
                "os:linux".to_string(),
            ],
            created_at: format!("2023-01-01 00:{:02}:{:02}.123456+00:00", (i / 60) % 60, i % 60),
            ..Default::default()
        })
        .collect()
}

fn bench_transform(c: &mut Criterion) {
    let page = sample_page(1000);

    let client = Transformer::new(IdentityPolicy::Client);
    c.bench_function("transform_page_client_1000", |b| {
        b.iter(|| client.transform_page(black_box(&page)))
    });

    let session = Transformer::new(IdentityPolicy::Session);
    c.bench_function("transform_page_session_1000", |b| {
        b.iter(|| session.transform_page(black_box(&page)))
    });

    c.bench_function("parse_timestamp", |b| {
        b.iter(|| try_parse_timestamp(black_box("2023-01-01T00:00:00.123456+00:00")))
    });
}

criterion_group!(benches, bench_transform);
criterion_main!(benches);
