//! Worker concurrency benchmark
//!
//! Mirrors the teacher's task_claiming/concurrent shape, but drives full
//! `ExecutionEngine::execute_step` calls end to end instead of bare store claims: each
//! worker loops claim -> execute_step -> (claim again if still runnable) until every
//! execution it's racing against has reached a terminal status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use flowkeep_engine::external::ExternalServices;
use flowkeep_engine::model::{Edge, GraphConfig, NodeKind, Workflow, WorkflowNode};
use flowkeep_engine::persistence::{ExecutionStore, InMemoryExecutionStore};
use flowkeep_engine::{Dispatcher, EngineConfig, ExecutionEngine};

fn node(id: &str, kind: NodeKind) -> WorkflowNode {
    WorkflowNode {
        node_id: id.to_string(),
        kind,
        config: Value::Null,
        position: None,
    }
}

fn edge(from: &str, to: &str) -> Edge {
    Edge {
        from: from.to_string(),
        to: to.to_string(),
        branch: None,
    }
}

/// A single-node workflow (`trigger` -> `catch`, immediately terminal) so the benchmark
/// measures claim/dispatch/save overhead rather than any particular handler's work.
fn trivial_graph() -> GraphConfig {
    GraphConfig {
        nodes: vec![node("trigger", NodeKind::Trigger), node("end", NodeKind::Catch)],
        edges: vec![edge("trigger", "end")],
    }
}

async fn setup(execution_count: u64) -> (Arc<ExecutionEngine>, Vec<Uuid>) {
    let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
    let dispatcher = Arc::new(Dispatcher::with_builtin_handlers(
        store.clone(),
        ExternalServices::default(),
    ));
    let workflow_id = Uuid::now_v7();
    store
        .create_workflow_version(Workflow {
            workflow_id,
            version: 1,
            graph: trivial_graph(),
            trigger_config: Value::Null,
            is_active: true,
            owner_id: None,
        })
        .await
        .unwrap();
    let engine = Arc::new(ExecutionEngine::new(store, dispatcher, EngineConfig::default()));

    let mut execution_ids = Vec::with_capacity(execution_count as usize);
    for _ in 0..execution_count {
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();
        execution_ids.push(execution.execution_id);
    }
    (engine, execution_ids)
}

fn bench_worker_pool(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("worker_concurrency/executions");
    group.sample_size(20);

    for workers in [1, 4, 8, 16] {
        let execution_count = 2000u64;
        group.throughput(Throughput::Elements(execution_count));
        group.bench_with_input(
            BenchmarkId::new("workers", workers),
            &workers,
            |b, &workers| {
                b.to_async(&rt).iter(|| async {
                    let (engine, execution_ids) = setup(execution_count).await;
                    let remaining = Arc::new(AtomicU64::new(execution_ids.len() as u64));

                    let mut handles = Vec::new();
                    for _ in 0..workers {
                        let engine = engine.clone();
                        let remaining = remaining.clone();
                        handles.push(tokio::spawn(async move {
                            loop {
                                if remaining.load(Ordering::Relaxed) == 0 {
                                    break;
                                }
                                let leased = engine
                                    .store()
                                    .claim_runnable_executions(
                                        "bench-worker",
                                        1,
                                        Duration::from_secs(30),
                                        Utc::now(),
                                    )
                                    .await
                                    .unwrap();
                                let Some(leased) = leased.into_iter().next() else {
                                    if remaining.load(Ordering::Relaxed) == 0 {
                                        break;
                                    }
                                    tokio::task::yield_now().await;
                                    continue;
                                };
                                let execution = engine
                                    .execute_step(leased, CancellationToken::new())
                                    .await
                                    .unwrap();
                                if execution.status.is_terminal() {
                                    remaining.fetch_sub(1, Ordering::Relaxed);
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

criterion_group!(benches, bench_worker_pool);
criterion_main!(benches);
