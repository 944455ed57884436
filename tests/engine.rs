/// End-to-end engine tests: schedules, queued runs, routing, cancellation
/// and health, all through the public façade.

use runway::config::{Config, DatabaseConfig, EngineConfig, HealthConfig, QueueConfig};
use runway::{
    Connection, Engine, EngineError, ExecutionStatus, HealthStatus, NodeDef, WorkflowExecution,
    WorkflowGraph,
};
use serde_json::{json, Value};
use std::time::Duration;

fn test_config() -> Config {
    Config {
        engine: EngineConfig {
            tick_interval_secs: 3600,
            execution_timeout_secs: 10,
            node_timeout_secs: 5,
        },
        queue: QueueConfig { backoff_base_ms: 10, max_attempts: 2 },
        database: DatabaseConfig { schedule_db_url: "sqlite::memory:".to_string() },
        health: HealthConfig { healthy_pct: 95.0, degraded_pct: 50.0, unhealthy_pct: 20.0 },
    }
}

async fn engine() -> Engine {
    Engine::new(test_config()).await.unwrap()
}

fn node(id: &str, type_name: &str, parameters: Value) -> NodeDef {
    serde_json::from_value(json!({
        "id": id,
        "type": type_name,
        "parameters": parameters,
    }))
    .unwrap()
}

fn edge(source: &str, source_output: &str, target: &str, target_input: &str) -> Connection {
    serde_json::from_value(json!({
        "source": source,
        "sourceOutput": source_output,
        "target": target,
        "targetInput": target_input,
    }))
    .unwrap()
}

fn workflow(id: &str, nodes: Vec<NodeDef>, connections: Vec<Connection>) -> WorkflowGraph {
    WorkflowGraph {
        id: id.to_string(),
        name: id.to_string(),
        nodes,
        connections,
        vars: serde_json::Map::new(),
    }
}

/// Poll until the execution reaches a terminal status.
async fn wait_terminal(engine: &Engine, execution_id: &str) -> WorkflowExecution {
    for _ in 0..500 {
        if let Ok(status) = engine.get_execution_status(execution_id) {
            if status.is_terminal() {
                return engine.get_execution_results(execution_id).unwrap();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution '{execution_id}' never reached a terminal status");
}

#[tokio::test]
async fn linear_run_preserves_item_order_end_to_end() {
    let engine = engine().await;
    engine
        .register_workflow(workflow(
            "wf-linear",
            vec![
                node("start", "manual.trigger", json!({})),
                node("tag", "transform.set", json!({"fields": {"seen": true}})),
            ],
            vec![edge("start", "main", "tag", "main")],
        ))
        .unwrap();

    let input = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];
    let execution_id = engine.run_workflow("wf-linear", input).await.unwrap();
    let result = wait_terminal(&engine, &execution_id).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    let ns: Vec<i64> = result.output_data.iter().map(|i| i["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, vec![1, 2, 3]);
    engine.shutdown().await;
}

#[tokio::test]
async fn branch_and_merge_route_without_loss_or_overlap() {
    let engine = engine().await;
    engine
        .register_workflow(workflow(
            "wf-routes",
            vec![
                node("start", "manual.trigger", json!({})),
                node("split", "branch.if", json!({"condition": "{{ $json.n > 1 }}"})),
                node("high", "transform.set", json!({"fields": {"lane": "high"}})),
                node("low", "transform.set", json!({"fields": {"lane": "low"}})),
                node("joined", "merge.join", json!({"strategy": "append"})),
            ],
            vec![
                edge("start", "main", "split", "main"),
                edge("split", "true", "high", "main"),
                edge("split", "false", "low", "main"),
                edge("high", "main", "joined", "a"),
                edge("low", "main", "joined", "b"),
            ],
        ))
        .unwrap();

    let input = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})];
    let execution_id = engine.run_workflow("wf-routes", input).await.unwrap();
    let result = wait_terminal(&engine, &execution_id).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.output_data.len(), 3);
    // Declared connection order: the "high" lane feeds the merge first.
    let lanes: Vec<&str> = result.output_data.iter().map(|i| i["lane"].as_str().unwrap()).collect();
    assert_eq!(lanes, vec!["high", "high", "low"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn failing_node_fails_fast_without_downstream_results() {
    let engine = engine().await;
    engine
        .register_workflow(workflow(
            "wf-fail",
            vec![
                node("start", "manual.trigger", json!({})),
                node("boom", "transform.code", json!({"script": "error('kaput')"})),
                node("after", "transform.set", json!({"fields": {"x": 1}})),
            ],
            vec![
                edge("start", "main", "boom", "main"),
                edge("boom", "main", "after", "main"),
            ],
        ))
        .unwrap();

    let execution_id = engine.run_workflow("wf-fail", vec![json!({})]).await.unwrap();
    let result = wait_terminal(&engine, &execution_id).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("boom"));
    assert!(!result.node_results.iter().any(|r| r.node_id == "after"));
    engine.shutdown().await;
}

#[tokio::test]
async fn continue_on_fail_routes_the_error_item_downstream() {
    let engine = engine().await;
    let mut failing = node("boom", "transform.code", json!({"script": "error('kaput')"}));
    failing.continue_on_fail = true;
    engine
        .register_workflow(workflow(
            "wf-cof",
            vec![
                node("start", "manual.trigger", json!({})),
                failing,
                node("after", "transform.set", json!({"fields": {"handled": true}})),
            ],
            vec![
                edge("start", "main", "boom", "main"),
                edge("boom", "main", "after", "main"),
            ],
        ))
        .unwrap();

    let execution_id = engine.run_workflow("wf-cof", vec![json!({})]).await.unwrap();
    let result = wait_terminal(&engine, &execution_id).await;

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.output_data.len(), 1);
    assert!(result.output_data[0]["error"].as_str().unwrap().contains("kaput"));
    assert_eq!(result.output_data[0]["handled"], json!(true));
    engine.shutdown().await;
}

#[tokio::test]
async fn execution_timeout_finalizes_as_timeout() {
    let mut config = test_config();
    config.engine.execution_timeout_secs = 0;
    let engine = Engine::new(config).await.unwrap();
    engine
        .register_workflow(workflow(
            "wf-slow",
            vec![
                node("start", "manual.trigger", json!({})),
                node("tag", "transform.set", json!({"fields": {"x": 1}})),
            ],
            vec![edge("start", "main", "tag", "main")],
        ))
        .unwrap();

    let execution_id = engine.run_workflow("wf-slow", vec![json!({})]).await.unwrap();
    let result = wait_terminal(&engine, &execution_id).await;

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    engine.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_queued_run_prevents_it_from_starting() {
    let engine = engine().await;
    engine
        .register_workflow(workflow(
            "wf-queued",
            vec![node("start", "manual.trigger", json!({}))],
            vec![],
        ))
        .unwrap();
    // Stop the worker loop first so the job stays queued.
    engine.shutdown().await;

    let execution_id = engine.run_workflow("wf-queued", vec![json!({})]).await.unwrap();
    assert!(engine.cancel_execution(&execution_id).await.unwrap());
    // The run never started, so there is no execution record.
    assert!(matches!(
        engine.get_execution_status(&execution_id),
        Err(EngineError::NotFound(_))
    ));
    assert!(!engine.cancel_execution(&execution_id).await.unwrap());
}

#[tokio::test]
async fn second_active_schedule_per_workflow_conflicts() {
    let engine = engine().await;
    let first = engine
        .create_schedule("wf-sched", "*/5 * * * *", None, true)
        .await
        .unwrap();
    assert!(first.next_execution.is_some());

    assert!(matches!(
        engine.create_schedule("wf-sched", "0 * * * *", None, true).await,
        Err(EngineError::Conflict(_))
    ));

    engine.deactivate_schedule(&first.id).await.unwrap();
    engine.create_schedule("wf-sched", "0 * * * *", None, true).await.unwrap();
    assert_eq!(engine.list_schedules().await.unwrap().len(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn execute_node_runs_one_transform_ad_hoc() {
    let engine = engine().await;
    let outputs = engine
        .execute_node(
            "transform.set",
            &json!({"fields": {"double": "{{ $json.n * 2 }}"}}),
            vec![json!({"n": 4})],
        )
        .await
        .unwrap();
    assert_eq!(outputs["main"][0]["double"], json!(8));
    engine.shutdown().await;
}

#[tokio::test]
async fn execute_batch_returns_outcomes_in_request_order() {
    let engine = engine().await;
    let outcomes = engine
        .execute_batch(vec![
            runway::NodeRunRequest {
                type_name: "transform.set".to_string(),
                parameters: json!({"fields": {"a": 1}}),
                items: vec![json!({})],
            },
            runway::NodeRunRequest {
                type_name: "no.such.node".to_string(),
                parameters: json!({}),
                items: vec![],
            },
            runway::NodeRunRequest {
                type_name: "transform.filter".to_string(),
                parameters: json!({"condition": "{{ $json.keep }}"}),
                items: vec![json!({"keep": true}), json!({"keep": false})],
            },
        ])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].as_ref().unwrap()["main"][0]["a"], json!(1));
    assert!(outcomes[1].is_err());
    assert_eq!(outcomes[2].as_ref().unwrap()["main"].len(), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn health_degrades_with_failing_runs() {
    let engine = engine().await;
    assert_eq!(engine.health().status, HealthStatus::Healthy);

    engine
        .register_workflow(workflow(
            "wf-health",
            vec![
                node("start", "manual.trigger", json!({})),
                node("boom", "transform.code", json!({"script": "error('down')"})),
            ],
            vec![edge("start", "main", "boom", "main")],
        ))
        .unwrap();
    let execution_id = engine.run_workflow("wf-health", vec![json!({})]).await.unwrap();
    wait_terminal(&engine, &execution_id).await;

    let health = engine.health();
    assert_eq!(health.processed, 1);
    assert_eq!(health.succeeded, 0);
    assert_eq!(health.status, HealthStatus::Critical);
    engine.shutdown().await;
}
