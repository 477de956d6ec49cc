//! Batch rendering throughput for INSERT DATA / DELETE DATA updates.
//!
//! Run with: cargo bench --bench batch_render

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use triplecache::cache::buffer::MutationBuffer;
use triplecache::cache::serializer::{render_batch, UpdateVerb};
use triplecache::{Literal, Resource, Triple, Value};

/// Buffer of `size` triples spread over `graphs` named graphs plus the default graph.
fn filled_buffer(size: usize, graphs: usize) -> MutationBuffer {
    let mut buffer = MutationBuffer::new(usize::MAX, Duration::from_secs(60));
    for i in 0..size {
        let context = match i % (graphs + 1) {
            0 => None,
            g => Some(Resource::iri(format!("http://example.org/graph/{}", g))),
        };
        let object = if i % 2 == 0 {
            Value::iri(format!("http://example.org/o{}", i % 100))
        } else {
            Value::Literal(Literal::language_tagged(format!("label \"{}\"", i), "en"))
        };
        buffer.push(Triple::new(
            Resource::iri(format!("http://example.org/s{}", i)),
            "http://example.org/p",
            object,
            context,
        ));
    }
    buffer
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_batch");

    for size in [50usize, 750, 5_000] {
        let buffer = filled_buffer(size, 4);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("insert", size), &buffer, |b, buffer| {
            b.iter(|| render_batch(UpdateVerb::Insert, black_box(buffer)));
        });
        group.bench_with_input(BenchmarkId::new("delete", size), &buffer, |b, buffer| {
            b.iter(|| render_batch(UpdateVerb::Delete, black_box(buffer)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_render);
criterion_main!(benches);
