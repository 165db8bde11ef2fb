//! Benchmarks for the pending-job queue and the scheduler round trip.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spool_core::jobs::{JobError, JobId, JobPriority, PriorityQueue};
use spool_core::{Scheduler, SchedulerConfig};

const PRIORITIES: [JobPriority; 4] = [
    JobPriority::Low,
    JobPriority::Normal,
    JobPriority::Medium,
    JobPriority::High,
];

fn filled_queue(size: u64) -> PriorityQueue<u64> {
    let mut queue = PriorityQueue::new();
    for i in 0..size {
        queue.insert(JobId(i), PRIORITIES[(i % 4) as usize], i);
    }
    queue
}

fn bench_queue_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_insert");
    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| black_box(filled_queue(size)));
        });
    }
    group.finish();
}

fn bench_queue_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_pop");
    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled_queue(size),
                |mut queue| {
                    while let Some(item) = queue.pop_front() {
                        black_box(item);
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_queue_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_remove");
    for size in [100u64, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled_queue(size),
                |mut queue| black_box(queue.remove(JobId(size / 2))),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_scheduler_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_round_trip");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for concurrency in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(100));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                let scheduler: Scheduler<u64> = rt
                    .block_on(async { Scheduler::new(SchedulerConfig::new(concurrency)) })
                    .unwrap();
                b.to_async(&rt).iter(|| {
                    let scheduler = scheduler.clone();
                    async move {
                        let handles: Vec<_> = (0..100u64)
                            .map(|i| scheduler.submit(move |_| async move { Ok::<_, JobError>(i) }))
                            .collect();
                        black_box(futures::future::join_all(handles).await)
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_queue_insert,
    bench_queue_pop,
    bench_queue_remove,
    bench_scheduler_round_trip
);
criterion_main!(benches);
