//! Event queue throughput benchmarks.
//!
//! The queue is on the hot path of every run: each request costs at
//! least three schedule/pop pairs. These benchmarks track the cost of
//! the ordered insert and of draining under mixed priorities.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use maquette_engine::{EventKind, EventQueue};
use maquette_types::SimTime;

fn arrival() -> EventKind {
    EventKind::RequestArrival {
        service_id: "svc".to_string(),
        endpoint_path: "/bench".to_string(),
    }
}

fn schedule_throughput(c: &mut Criterion) {
    c.bench_function("schedule_10k_ordered", |b| {
        b.iter(|| {
            let queue = EventQueue::new();
            for i in 0..10_000u64 {
                queue.schedule(SimTime::from_nanos(i * 1_000), arrival());
            }
            black_box(queue.len())
        });
    });

    c.bench_function("schedule_10k_reversed", |b| {
        b.iter(|| {
            let queue = EventQueue::new();
            for i in (0..10_000u64).rev() {
                queue.schedule(SimTime::from_nanos(i * 1_000), arrival());
            }
            black_box(queue.len())
        });
    });
}

fn drain_throughput(c: &mut Criterion) {
    c.bench_function("drain_10k_mixed_priorities", |b| {
        b.iter_batched(
            || {
                let queue = EventQueue::new();
                for i in 0..10_000u64 {
                    queue.schedule_with_priority(
                        SimTime::from_nanos((i % 97) * 1_000),
                        (i % 7) as u32,
                        arrival(),
                    );
                }
                queue
            },
            |queue| {
                let mut count = 0;
                while let Some(event) = queue.pop() {
                    count += black_box(event.priority as usize);
                }
                count
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, schedule_throughput, drain_throughput);
criterion_main!(benches);
