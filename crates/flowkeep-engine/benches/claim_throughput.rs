//! Claim throughput benchmark
//!
//! Benchmarks the critical path for `ExecutionStore::claim_runnable_executions`: insert a
//! batch of runnable executions, then drain them via claim, matching the teacher's
//! task_claiming/single and task_claiming/concurrent shape but against execution rows
//! instead of task-queue rows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;
use uuid::Uuid;

use flowkeep_engine::model::{Execution, ExecutionState, ExecutionStatus};
use flowkeep_engine::persistence::{ExecutionStore, InMemoryExecutionStore};

fn runnable_execution(workflow_id: Uuid) -> Execution {
    let now = Utc::now();
    Execution {
        execution_id: Uuid::now_v7(),
        workflow_id,
        workflow_version: 1,
        status: ExecutionStatus::Running,
        state: ExecutionState::default(),
        version: 0,
        lease_owner: None,
        lease_expires_at: None,
        next_runnable_at: Some(now),
        parent_execution_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn bench_claim_single(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("claim_throughput/single");
    group.throughput(Throughput::Elements(1));

    for batch_size in [1, 5, 10] {
        group.bench_with_input(
            BenchmarkId::new("batch", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let store = Arc::new(InMemoryExecutionStore::new());
                    let workflow_id = Uuid::now_v7();
                    let execution_count = (iters * batch_size as u64).max(100);
                    for _ in 0..execution_count {
                        store
                            .create_execution(runnable_execution(workflow_id))
                            .await
                            .unwrap();
                    }

                    let start = Instant::now();
                    let mut claimed_total = 0u64;
                    while claimed_total < execution_count {
                        let claimed = store
                            .claim_runnable_executions(
                                "bench-worker",
                                batch_size,
                                Duration::from_secs(30),
                                Utc::now(),
                            )
                            .await
                            .unwrap();
                        claimed_total += claimed.len() as u64;
                        for leased in claimed {
                            store
                                .release_lease(leased.execution.execution_id, "bench-worker")
                                .await
                                .unwrap();
                        }
                    }
                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

fn bench_claim_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("claim_throughput/concurrent");
    group.sample_size(20);

    for workers in [2, 4, 8] {
        let execution_count = 2000u64;
        group.throughput(Throughput::Elements(execution_count));
        group.bench_with_input(
            BenchmarkId::new("workers", workers),
            &workers,
            |b, &workers| {
                b.to_async(&rt).iter(|| async {
                    let store = Arc::new(InMemoryExecutionStore::new());
                    let workflow_id = Uuid::now_v7();
                    for _ in 0..execution_count {
                        store
                            .create_execution(runnable_execution(workflow_id))
                            .await
                            .unwrap();
                    }

                    let claimed_total = Arc::new(AtomicU64::new(0));
                    let mut handles = Vec::new();
                    for worker_id in 0..workers {
                        let store = store.clone();
                        let claimed_total = claimed_total.clone();
                        handles.push(tokio::spawn(async move {
                            let worker_name = format!("bench-worker-{worker_id}");
                            loop {
                                if claimed_total.load(Ordering::Relaxed) >= execution_count {
                                    break;
                                }
                                let claimed = store
                                    .claim_runnable_executions(
                                        &worker_name,
                                        1,
                                        Duration::from_secs(30),
                                        Utc::now(),
                                    )
                                    .await
                                    .unwrap();
                                if claimed.is_empty() {
                                    tokio::task::yield_now().await;
                                    continue;
                                }
                                for leased in claimed {
                                    store
                                        .release_lease(leased.execution.execution_id, &worker_name)
                                        .await
                                        .unwrap();
                                    claimed_total.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }));
                    }
                    for handle in handles {
                        handle.await.unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_claim_single, bench_claim_concurrent);
criterion_main!(benches);
