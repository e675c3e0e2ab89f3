//! Service-level flows: authoring, idempotent commits, runs, and the
//! webhook ingress path (S5).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;

use shipsec_core::component::ComponentRegistry;
use shipsec_core::graph::Graph;
use shipsec_core::port::ContractRegistry;
use shipsec_engine::{Engine, NodeOutput, NodeStatus, RunStatus, TriggerInfo};
use shipsec_runtime::{components, ComponentRuntime, InlineRegistry};
use shipsec_server::db::{run_migrations, DatabasePool};
use shipsec_server::service::{AppState, ServiceError};
use shipsec_server::sink::DbLogSink;
use shipsec_server::webhook::{MappingRule, MappingSource, WebhookError};
use shipsec_server::{ShipsecConfig, SqliteJournal};

async fn test_state() -> AppState {
    let pool: DatabasePool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();

    let mut registry = ComponentRegistry::new();
    let mut inline = InlineRegistry::new();
    components::install(&mut registry, &mut inline).unwrap();

    let runtime = ComponentRuntime::new(inline)
        .with_log_sink(Arc::new(DbLogSink::spawn(pool.clone())));
    let engine = Engine::new(
        Arc::new(runtime),
        Arc::new(SqliteJournal::new(pool.clone())),
    );

    AppState {
        pool,
        engine,
        registry: Arc::new(registry),
        contracts: Arc::new(ContractRegistry::new()),
        config: ShipsecConfig::from_env().unwrap(),
    }
}

fn webhook_graph() -> Graph {
    let mut graph = Graph::new("", "webhook target");
    let entry = graph.add_node("entry", "core.entry");
    entry.config.params.insert(
        "runtime_inputs".into(),
        json!([
            {"id": "repo_name", "type": "text"},
            {"id": "is_push", "type": "text"}
        ]),
    );
    graph.add_node("log", "core.log");
    graph.add_edge("e1", ("entry", "repo_name"), ("log", "value"));
    graph
}

fn github_rules() -> Vec<MappingRule> {
    vec![
        MappingRule {
            target: "repo_name".to_string(),
            source: MappingSource::Payload {
                pointer: "/repository/full_name".to_string(),
            },
            equals: None,
        },
        MappingRule {
            target: "is_push".to_string(),
            source: MappingSource::Header {
                name: "x-github-event".to_string(),
            },
            equals: Some("push".to_string()),
        },
    ]
}

#[tokio::test]
async fn test_commit_is_idempotent_by_hash() {
    let state = test_state().await;
    let workflow = state
        .create_workflow("pipeline", None, Some(webhook_graph()))
        .await
        .unwrap();

    let first = state.commit(&workflow.id).await.unwrap();
    let second = state.commit(&workflow.id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.version, 1);
}

#[tokio::test]
async fn test_run_without_commit_is_rejected() {
    let state = test_state().await;
    let workflow = state
        .create_workflow("pipeline", None, Some(webhook_graph()))
        .await
        .unwrap();

    let err = state
        .start_run(
            &workflow.id,
            serde_json::Map::new(),
            None,
            None,
            TriggerInfo::api(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NoCommittedVersion(_)));
}

#[tokio::test]
async fn test_start_run_captures_config_for_rerun() {
    let state = test_state().await;
    let workflow = state
        .create_workflow("pipeline", None, Some(webhook_graph()))
        .await
        .unwrap();
    let version = state.commit(&workflow.id).await.unwrap();

    let mut inputs = serde_json::Map::new();
    inputs.insert("repo_name".into(), json!("org/repo"));
    inputs.insert("is_push".into(), json!("true"));
    let run_id = state
        .start_run(&workflow.id, inputs, None, None, TriggerInfo::api())
        .await
        .unwrap();

    assert_eq!(
        state.engine.wait_until_terminal(&run_id).await.unwrap(),
        RunStatus::Completed
    );

    let config = state.run_config(&run_id).await.unwrap();
    assert_eq!(config.version_id, version.id);
    let inputs: Value = serde_json::from_str(&config.inputs).unwrap();
    assert_eq!(inputs["repo_name"], "org/repo");
}

// S5: the inbound delivery maps payload and headers onto the entry's
// runtime inputs and the run completes.
#[tokio::test]
async fn test_webhook_ingress_end_to_end() {
    let state = test_state().await;
    let workflow = state
        .create_workflow("pipeline", None, Some(webhook_graph()))
        .await
        .unwrap();
    state.commit(&workflow.id).await.unwrap();
    state
        .register_webhook("github-push", &workflow.id, &github_rules())
        .await
        .unwrap();

    let payload = json!({"repository": {"full_name": "org/repo"}});
    let mut headers = HashMap::new();
    headers.insert("x-github-event".to_string(), "push".to_string());

    let run_id = state
        .trigger_webhook("github-push", &payload, &headers)
        .await
        .unwrap();

    assert_eq!(
        state.engine.wait_until_terminal(&run_id).await.unwrap(),
        RunStatus::Completed
    );

    let run = state.engine.run_state(&run_id).unwrap();
    assert_eq!(run.nodes["entry"].status, NodeStatus::Success);
    match run.nodes["entry"].output.as_ref().unwrap() {
        NodeOutput::Outputs { outputs } => {
            assert_eq!(outputs["repo_name"], "org/repo");
            assert_eq!(outputs["is_push"], "true");
        }
        other => panic!("unexpected output {:?}", other),
    }
    assert_eq!(run.trigger.source.as_deref(), Some("github-push"));
}

#[tokio::test]
async fn test_webhook_rejects_inputs_failing_schema() {
    let state = test_state().await;
    let workflow = state
        .create_workflow("pipeline", None, Some(webhook_graph()))
        .await
        .unwrap();
    state.commit(&workflow.id).await.unwrap();
    // Only one of the two required runtime inputs is mapped.
    state
        .register_webhook("partial", &workflow.id, &github_rules()[1..])
        .await
        .unwrap();

    let payload = json!({});
    let mut headers = HashMap::new();
    headers.insert("x-github-event".to_string(), "push".to_string());

    let err = state
        .trigger_webhook("partial", &payload, &headers)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Webhook(WebhookError::SchemaViolation(_))
    ));
}

#[tokio::test]
async fn test_unknown_webhook_path_is_not_found() {
    let state = test_state().await;
    let err = state
        .trigger_webhook("ghost", &json!({}), &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}
