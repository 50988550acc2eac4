//! End-to-end scenarios driven against the in-memory store: a linear happy path, retry
//! then success, retry exhaustion, a signal wait/resume, a parallel fan-out/join, and a
//! mid-flight terminate race. Each exercises `ExecutionEngine` the way the worker loop
//! does — claim, `execute_step`, repeat — rather than calling engine internals directly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use flowkeep_engine::activity::Dispatcher;
use flowkeep_engine::engine::{EngineConfig, EngineError, ExecutionEngine};
use flowkeep_engine::external::{CodeRunResult, CodeRunner, ExternalError, ExternalServices};
use flowkeep_engine::model::{
    Edge, Execution, ExecutionStatus, GraphConfig, NodeKind, NodeResultStatus, Workflow, WorkflowNode,
};
use flowkeep_engine::persistence::{ExecutionStore, InMemoryExecutionStore, StoreError};
use flowkeep_engine::reliability::RetryPolicy;

fn node(id: &str, kind: NodeKind, config: Value) -> WorkflowNode {
    WorkflowNode {
        node_id: id.to_string(),
        kind,
        config,
        position: None,
    }
}

fn edge(from: &str, to: &str, branch: Option<&str>) -> Edge {
    Edge {
        from: from.to_string(),
        to: to.to_string(),
        branch: branch.map(str::to_string),
    }
}

async fn engine_with_workflow(
    graph: GraphConfig,
    external: ExternalServices,
    config: EngineConfig,
) -> (ExecutionEngine, Uuid) {
    let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
    let dispatcher = Arc::new(Dispatcher::with_builtin_handlers(store.clone(), external));
    let workflow_id = Uuid::now_v7();
    let workflow = Workflow {
        workflow_id,
        version: 1,
        graph,
        trigger_config: Value::Null,
        is_active: true,
        owner_id: None,
    };
    store.create_workflow_version(workflow).await.unwrap();
    let engine = ExecutionEngine::new(store, dispatcher, config);
    (engine, workflow_id)
}

/// Drives the claim/execute_step loop to a terminal or signal-parked status. Unlike a
/// worker that waits out real backoff delays, this passes a `now` pushed an hour ahead of
/// every claim call so a `failed`-with-pending-retry execution is immediately runnable —
/// `InMemoryExecutionStore::claim_runnable_executions` only ever compares against the
/// caller-supplied `now`, never the wall clock, so this is exercising the same code path a
/// real worker would hit after actually waiting.
async fn run_to_terminal(engine: &ExecutionEngine, execution_id: Uuid, max_steps: usize) -> Execution {
    for _ in 0..max_steps {
        let execution = engine.store().get_execution(execution_id).await.unwrap();
        if execution.status.is_terminal() || execution.status == ExecutionStatus::WaitingSignal {
            return execution;
        }
        let claim_now = Utc::now() + chrono::Duration::hours(1);
        let leased = engine
            .store()
            .claim_runnable_executions("test-worker", 1, Duration::from_secs(30), claim_now)
            .await
            .unwrap();
        let Some(leased) = leased.into_iter().next() else {
            return execution;
        };
        engine
            .execute_step(leased, CancellationToken::new())
            .await
            .unwrap();
    }
    engine.store().get_execution(execution_id).await.unwrap()
}

/// Always succeeds with a fixed `parsed_json`, standing in for an `http_request` call
/// that would otherwise need a live endpoint.
struct FixedCodeRunner {
    parsed_json: Value,
}

#[async_trait]
impl CodeRunner for FixedCodeRunner {
    async fn run(
        &self,
        _language: &str,
        _source: &str,
        _input: &Value,
        _timeout: Duration,
    ) -> Result<CodeRunResult, ExternalError> {
        Ok(CodeRunResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            memory_bytes: None,
            parsed_json: Some(self.parsed_json.clone()),
        })
    }
}

/// Fails with a non-zero exit for its first `fail_until` calls, then succeeds. Counts
/// calls so tests can assert exactly how many attempts the retry policy drove.
struct CountingCodeRunner {
    calls: AtomicU32,
    fail_until: u32,
}

impl CountingCodeRunner {
    fn new(fail_until: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_until,
        }
    }
}

#[async_trait]
impl CodeRunner for CountingCodeRunner {
    async fn run(
        &self,
        _language: &str,
        _source: &str,
        _input: &Value,
        _timeout: Duration,
    ) -> Result<CodeRunResult, ExternalError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_until {
            Ok(CodeRunResult {
                stdout: String::new(),
                stderr: format!("transient failure on attempt {call}"),
                exit_code: 1,
                memory_bytes: None,
                parsed_json: None,
            })
        } else {
            Ok(CodeRunResult {
                stdout: "ok".to_string(),
                stderr: String::new(),
                exit_code: 0,
                memory_bytes: None,
                parsed_json: Some(json!({"status": "ok"})),
            })
        }
    }
}

/// Sleeps before returning success, giving a concurrent `terminate` enough time to win
/// the race against this node's in-flight `execute_step`.
struct SleepyCodeRunner {
    delay: Duration,
}

#[async_trait]
impl CodeRunner for SleepyCodeRunner {
    async fn run(
        &self,
        _language: &str,
        _source: &str,
        _input: &Value,
        _timeout: Duration,
    ) -> Result<CodeRunResult, ExternalError> {
        tokio::time::sleep(self.delay).await;
        Ok(CodeRunResult {
            stdout: "done".to_string(),
            stderr: String::new(),
            exit_code: 0,
            memory_bytes: None,
            parsed_json: None,
        })
    }
}

fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        backoff_coefficient: 1.0,
        jitter: 0.0,
        non_retryable_errors: vec![],
    }
}

#[tokio::test]
async fn s1_linear_happy_path_completes() {
    // `a` stands in for an http_request call returning {"status_code": 200, "x": 1}; the
    // surrounding condition/catch shape is exactly S1's.
    let graph = GraphConfig {
        nodes: vec![
            node("trigger", NodeKind::Trigger, Value::Null),
            node("a", NodeKind::Code, json!({"language": "python", "source": "call_endpoint()"})),
            node(
                "b",
                NodeKind::Condition,
                json!({"expression": "a_output.parsed_json.x == 1"}),
            ),
            node("c", NodeKind::Catch, Value::Null),
        ],
        edges: vec![
            edge("trigger", "a", None),
            edge("a", "b", None),
            edge("b", "c", Some("true")),
        ],
    };
    let external = ExternalServices {
        code_runner: Arc::new(FixedCodeRunner {
            parsed_json: json!({"status_code": 200, "x": 1}),
        }),
        ..ExternalServices::default()
    };
    let (engine, workflow_id) = engine_with_workflow(graph, external, EngineConfig::default()).await;
    let execution = engine.create_execution(workflow_id, json!({})).await.unwrap();

    let execution = run_to_terminal(&engine, execution.execution_id, 10).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(
        execution.state.variables["a_output"]["parsed_json"]["status_code"],
        json!(200)
    );
    assert_eq!(execution.state.variables["b_output"]["branch"], json!("true"));
    assert_eq!(
        execution.state.completed_node_ids,
        vec!["trigger".to_string(), "a".to_string(), "b".to_string(), "c".to_string()]
    );
}

#[tokio::test]
async fn s2_node_retries_then_succeeds() {
    let graph = GraphConfig {
        nodes: vec![
            node("trigger", NodeKind::Trigger, Value::Null),
            node("a", NodeKind::Code, json!({"language": "python", "source": "flaky()"})),
        ],
        edges: vec![edge("trigger", "a", None)],
    };
    let runner = Arc::new(CountingCodeRunner::new(2));
    let external = ExternalServices {
        code_runner: runner.clone(),
        ..ExternalServices::default()
    };
    let config = EngineConfig {
        retry_policy: fast_retry_policy(3),
    };
    let (engine, workflow_id) = engine_with_workflow(graph, external, config).await;
    let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

    let execution = run_to_terminal(&engine, execution.execution_id, 10).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 3);

    let result = execution.state.node_results.get("a").unwrap();
    assert_eq!(result.status, NodeResultStatus::Success);
    assert_eq!(result.attempt, 3);

    // The append-only log, not node_results (which only keeps the latest attempt), is
    // where the two earlier failed attempts survive.
    let logs = engine.store().list_logs(execution.execution_id).await.unwrap();
    let a_logs: Vec<_> = logs.iter().filter(|l| l.node_id.as_deref() == Some("a")).collect();
    assert_eq!(a_logs.len(), 3);
    let failed_logs = a_logs
        .iter()
        .filter(|l| l.message.contains("transient failure"))
        .count();
    assert_eq!(failed_logs, 2);
}

#[tokio::test]
async fn s3_node_exhausts_retries_and_fails_execution() {
    let graph = GraphConfig {
        nodes: vec![
            node("trigger", NodeKind::Trigger, Value::Null),
            node("a", NodeKind::Code, json!({"language": "python", "source": "always_fails()"})),
        ],
        edges: vec![edge("trigger", "a", None)],
    };
    let runner = Arc::new(CountingCodeRunner::new(u32::MAX));
    let external = ExternalServices {
        code_runner: runner.clone(),
        ..ExternalServices::default()
    };
    let config = EngineConfig {
        retry_policy: fast_retry_policy(2),
    };
    let (engine, workflow_id) = engine_with_workflow(graph, external, config).await;
    let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

    let execution = run_to_terminal(&engine, execution.execution_id, 10).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    assert!(execution
        .state
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("status 1"));
}

#[tokio::test]
async fn s4_execution_parks_on_wait_signal_and_resumes_on_delivery() {
    let graph = GraphConfig {
        nodes: vec![
            node("trigger", NodeKind::Trigger, Value::Null),
            node(
                "wait",
                NodeKind::WaitSignal,
                json!({"signal_type": "approval"}),
            ),
            node("d", NodeKind::Catch, Value::Null),
        ],
        edges: vec![edge("trigger", "wait", None), edge("wait", "d", None)],
    };
    let (engine, workflow_id) =
        engine_with_workflow(graph, ExternalServices::default(), EngineConfig::default()).await;
    let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

    let execution = run_to_terminal(&engine, execution.execution_id, 5).await;
    assert_eq!(execution.status, ExecutionStatus::WaitingSignal);

    engine
        .process_signal(execution.execution_id, "approval", json!({"approved": true}))
        .await
        .unwrap();

    let execution = run_to_terminal(&engine, execution.execution_id, 5).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.state.variables["signal_approval"]["approved"], json!(true));
    assert_eq!(
        execution.state.completed_node_ids,
        vec!["trigger".to_string(), "wait".to_string(), "d".to_string()]
    );
}

#[tokio::test]
async fn s5_parallel_fanout_all_waits_for_every_branch_then_joins() {
    let graph = GraphConfig {
        nodes: vec![
            node("trigger", NodeKind::Trigger, Value::Null),
            node(
                "fanout",
                NodeKind::ParallelFanout,
                json!({"join_node_id": "join", "wait_mode": "all"}),
            ),
            node("x", NodeKind::Catch, Value::Null),
            node("y", NodeKind::Catch, Value::Null),
            node("z", NodeKind::Catch, Value::Null),
            node("join", NodeKind::ParallelJoin, Value::Null),
            node("end", NodeKind::Catch, Value::Null),
        ],
        edges: vec![
            edge("trigger", "fanout", None),
            edge("fanout", "x", None),
            edge("fanout", "y", None),
            edge("fanout", "z", None),
            edge("join", "end", None),
        ],
    };
    let (engine, workflow_id) =
        engine_with_workflow(graph, ExternalServices::default(), EngineConfig::default()).await;
    let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

    let execution = run_to_terminal(&engine, execution.execution_id, 10).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    for branch in ["x", "y", "z"] {
        assert!(execution.state.completed_node_ids.contains(&branch.to_string()));
        assert!(execution.state.node_results.contains_key(branch));
    }
    let join_output = &execution.state.variables["join_output"];
    assert!(join_output.get("x").is_some());
    assert!(join_output.get("y").is_some());
    assert!(join_output.get("z").is_some());
}

#[tokio::test]
async fn s6_terminate_wins_the_race_against_a_mid_flight_node() {
    let graph = GraphConfig {
        nodes: vec![
            node("trigger", NodeKind::Trigger, Value::Null),
            node("a", NodeKind::Code, json!({"language": "python", "source": "sleep_then_ok()"})),
        ],
        edges: vec![edge("trigger", "a", None)],
    };
    let external = ExternalServices {
        code_runner: Arc::new(SleepyCodeRunner {
            delay: Duration::from_millis(150),
        }),
        ..ExternalServices::default()
    };
    let (engine, workflow_id) = engine_with_workflow(graph, external, EngineConfig::default()).await;
    let engine = Arc::new(engine);
    let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

    // Step past `trigger` so `a` is current_node_id and about to be claimed.
    let leased = engine
        .store()
        .claim_runnable_executions("w1", 1, Duration::from_secs(30), Utc::now())
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let after_trigger = engine
        .execute_step(leased, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(after_trigger.status, ExecutionStatus::Running);
    assert_eq!(after_trigger.state.current_node_id.as_deref(), Some("a"));

    // Claim `a` and start its (slow) dispatch on a background task, holding the version
    // this worker observed at claim time.
    let leased = engine
        .store()
        .claim_runnable_executions("w1", 1, Duration::from_secs(30), Utc::now())
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    let engine_for_step = engine.clone();
    let step_handle = tokio::spawn(async move {
        engine_for_step
            .execute_step(leased, CancellationToken::new())
            .await
    });

    // Give the background step time to start its sleep, then terminate out from under it.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let terminated = engine
        .terminate(execution.execution_id, Some("user abort".to_string()))
        .await
        .unwrap();
    assert_eq!(terminated.status, ExecutionStatus::Terminated);

    let step_result = step_handle.await.unwrap();
    assert!(matches!(
        step_result,
        Err(EngineError::Store(StoreError::ConcurrencyConflict { .. }))
    ));

    let final_execution = engine.store().get_execution(execution.execution_id).await.unwrap();
    assert_eq!(final_execution.status, ExecutionStatus::Terminated);
    assert_eq!(final_execution.state.error_message.as_deref(), Some("user abort"));
    assert!(!final_execution.state.completed_node_ids.contains(&"a".to_string()));
    assert!(!final_execution.state.node_results.contains_key("a"));
}
