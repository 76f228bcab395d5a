//! Benchmarks for the preemption-candidate heap (§4.3, §5 property 3): push
//! throughput and best-target selection under a busy pool. Adapted from the
//! source codebase's `benches/performance_claims.rs` criterion harness,
//! narrowed from full-runtime scheduling claims to this crate's own
//! `PreemptionQueue`.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use mcp_orchestrator::router::priority_queue::{PreemptionCandidate, PreemptionQueue};
use mcp_orchestrator::types::Priority;

fn candidate(n: usize, priority: Priority) -> PreemptionCandidate {
    PreemptionCandidate {
        consumer_id: format!("worker-{n}"),
        priority,
        claimed_at: Utc::now(),
    }
}

fn bench_push(c: &mut Criterion) {
    c.bench_function("preemption_queue_push_1000", |b| {
        b.iter_batched(
            PreemptionQueue::new,
            |mut queue| {
                for n in 0..1000 {
                    queue.push(candidate(n, Priority::Low));
                }
                queue
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_best_target(c: &mut Criterion) {
    let mut queue = PreemptionQueue::new();
    for n in 0..1000 {
        let priority = if n % 10 == 0 { Priority::Normal } else { Priority::Low };
        queue.push(candidate(n, priority));
    }

    c.bench_function("preemption_queue_best_target_1000", |b| {
        b.iter(|| queue.best_target(Priority::Critical));
    });
}

fn bench_pop_best_target(c: &mut Criterion) {
    c.bench_function("preemption_queue_pop_best_target_1000", |b| {
        b.iter_batched(
            || {
                let mut queue = PreemptionQueue::new();
                for n in 0..1000 {
                    queue.push(candidate(n, Priority::Low));
                }
                queue
            },
            |mut queue| {
                while queue.pop_best_target(Priority::Critical).is_some() {}
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_push, bench_best_target, bench_pop_best_target);
criterion_main!(benches);
