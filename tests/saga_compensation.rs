//! S4 (SPEC_FULL §8): a saga whose final step fails terminally compensates
//! every succeeded step in strict reverse order, and never invokes the
//! failed step's own compensation (it never committed in the first place).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mcp_orchestrator::config::SagaConfig;
use mcp_orchestrator::saga::{InMemorySagaStore, SagaDefinition, SagaEngine, SagaStepDef, SagaStore, StepExecutor};
use mcp_orchestrator::types::{DefinitionId, SagaStatus, StepClassification, TaskId};

struct RecordingExecutor {
    calls: Arc<Mutex<Vec<String>>>,
    fail_on: &'static str,
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(
        &self,
        key: &str,
        _saga_id: TaskId,
        _step_name: &str,
        _attempt: u32,
        _params: &serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        self.calls.lock().unwrap().push(key.to_string());
        if key == self.fail_on {
            return Err(format!("{key} failed"));
        }
        Ok(serde_json::json!("ok"))
    }
}

fn reserve_charge_ship_definition() -> SagaDefinition {
    SagaDefinition {
        definition_id: DefinitionId("reserve-charge-ship".to_string()),
        steps: vec![
            SagaStepDef {
                name: "reserve".to_string(),
                classification: StepClassification::Compensatable,
                action_key: "reserve.action".to_string(),
                compensation_key: Some("reserve.compensate".to_string()),
                params: serde_json::json!({}),
            },
            SagaStepDef {
                name: "charge".to_string(),
                classification: StepClassification::Compensatable,
                action_key: "charge.action".to_string(),
                compensation_key: Some("charge.compensate".to_string()),
                params: serde_json::json!({}),
            },
            SagaStepDef {
                name: "ship".to_string(),
                classification: StepClassification::Final,
                action_key: "ship.action".to_string(),
                compensation_key: None,
                params: serde_json::json!({}),
            },
        ],
    }
}

#[tokio::test]
async fn ship_failure_compensates_charge_then_reserve_in_reverse_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let executor = Arc::new(RecordingExecutor { calls: calls.clone(), fail_on: "ship.action" });
    let store = Arc::new(InMemorySagaStore::default());
    let engine = SagaEngine::new(executor, store.clone(), SagaConfig::default());

    let definition = reserve_charge_ship_definition();
    let definition_id = definition.definition_id.clone();
    engine.register_definition(definition).unwrap();

    let saga_id = TaskId::new();
    let saga = engine.start(saga_id, definition_id).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);

    let recorded = calls.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec![
            "reserve.action".to_string(),
            "charge.action".to_string(),
            "ship.action".to_string(),
            "charge.compensate".to_string(),
            "reserve.compensate".to_string(),
        ]
    );

    let persisted = store.load(saga_id).await.unwrap();
    assert_eq!(persisted.status, SagaStatus::Compensated);
}

#[tokio::test]
async fn saga_with_all_steps_succeeding_never_invokes_compensation() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let executor = Arc::new(RecordingExecutor { calls: calls.clone(), fail_on: "" });
    let store = Arc::new(InMemorySagaStore::default());
    let engine = SagaEngine::new(executor, store, SagaConfig::default());

    let definition = reserve_charge_ship_definition();
    let definition_id = definition.definition_id.clone();
    engine.register_definition(definition).unwrap();

    let saga = engine.start(TaskId::new(), definition_id).await.unwrap();

    assert_eq!(saga.status, SagaStatus::Succeeded);
    let recorded = calls.lock().unwrap().clone();
    assert_eq!(recorded, vec!["reserve.action", "charge.action", "ship.action"]);
}
