// Gossip buffer benchmarks for the Roster protocol.
//
// The buffer sits on the hot path of every probe and every RPC handler,
// so add/merge and gather need to stay cheap at realistic event counts.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use roster_protocol::{GossipBuffer, GossipEntry, GossipKind};

fn entry(i: usize, incarnation: u64) -> GossipEntry {
    GossipEntry {
        kind: GossipKind::Alive,
        address: format!("tcp://10.0.0.{}:7000", i % 251),
        provider_id: (i % 4) as u16,
        incarnation,
    }
}

fn filled_buffer(events: usize, group_size: usize) -> GossipBuffer {
    let buffer = GossipBuffer::new();
    buffer.set_group_size(group_size);
    for i in 0..events {
        buffer.add(entry(i, 1));
    }
    buffer
}

fn bench_add_fresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("gossip/add_fresh");
    for pending in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(pending), &pending, |b, &n| {
            let buffer = filled_buffer(n, 64);
            let mut next = n;
            b.iter(|| {
                next += 1;
                buffer.add(entry(next, 1));
            });
        });
    }
    group.finish();
}

fn bench_add_merge(c: &mut Criterion) {
    // Merging against an existing entry is the common case in a stable
    // group: the same few events keep arriving from different peers.
    let buffer = filled_buffer(64, 64);

    c.bench_function("gossip/add_merge_duplicate", |b| {
        b.iter(|| buffer.add(entry(32, 1)));
    });
}

fn bench_gather(c: &mut Criterion) {
    let mut group = c.benchmark_group("gossip/gather8");
    for pending in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(pending), &pending, |b, &n| {
            // A big group keeps max_gossip high enough that gather never
            // runs the budget dry mid-benchmark.
            let buffer = filled_buffer(n, 1 << 20);
            b.iter(|| buffer.gather(8));
        });
    }
    group.finish();
}

fn bench_cleanup(c: &mut Criterion) {
    c.bench_function("gossip/cleanup_half_spent", |b| {
        b.iter_batched(
            || {
                let buffer = filled_buffer(128, 2); // budget of 3
                // Exhaust half the entries.
                for _ in 0..3 {
                    buffer.gather(64);
                }
                buffer
            },
            |buffer| buffer.cleanup(),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_add_fresh,
    bench_add_merge,
    bench_gather,
    bench_cleanup,
);
criterion_main!(benches);
